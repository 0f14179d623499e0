//! Result files of an `eigs-trans` run.
//!
//! Every output goes to a temporary file next to its destination and is only
//! moved into place once all of them have been produced.

use crate::eigdecomp::{EigenvectorTable, EigsResult};
use crate::error::EigsError;
use log::{debug, info};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::NamedTempFile;

const BIGWIG_ENV_BIN: &str = "HICTRANS_BEDGRAPHTOBIGWIG";
const DEFAULT_BIGWIG_BIN: &str = "bedGraphToBigWig";
/// Eigenvector exported to bigWig.
pub const BIGWIG_VALUE_FIELD: &str = "E1";

#[derive(Debug, Clone, PartialEq)]
pub struct OutputPaths {
    pub eigenvalues: PathBuf,
    pub eigenvectors: PathBuf,
    pub bigwig: Option<PathBuf>,
}

impl OutputPaths {
    pub fn new(prefix: &str, bigwig: bool) -> Self {
        Self {
            eigenvalues: PathBuf::from(format!("{}.trans.lam.txt", prefix)),
            eigenvectors: PathBuf::from(format!("{}.trans.vecs.tsv", prefix)),
            bigwig: bigwig.then(|| PathBuf::from(format!("{}.trans.bw", prefix))),
        }
    }
}

fn staging_file(dest: &Path) -> io::Result<NamedTempFile> {
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    tempfile::Builder::new().prefix(".hictrans.").tempfile_in(dir)
}

fn write_staged<F>(dest: &Path, write: F) -> io::Result<NamedTempFile>
where
    F: FnOnce(&mut BufWriter<&mut NamedTempFile>) -> io::Result<()>,
{
    let mut staged = staging_file(dest)?;
    {
        let mut writer = BufWriter::new(&mut staged);
        write(&mut writer)?;
        writer.flush()?;
    }
    Ok(staged)
}

/// Write the eigenvalue and eigenvector tables, and the E1 bigWig when asked.
pub fn write_outputs(result: &EigsResult, paths: &OutputPaths) -> Result<(), EigsError> {
    let mut staged = vec![
        (
            write_staged(&paths.eigenvalues, |w| result.eigenvalues.write_tsv(w))?,
            paths.eigenvalues.as_path(),
        ),
        (
            write_staged(&paths.eigenvectors, |w| result.eigenvectors.write_tsv(w))?,
            paths.eigenvectors.as_path(),
        ),
    ];
    if let Some(bw) = &paths.bigwig {
        staged.push((stage_bigwig(&result.eigenvectors, bw)?, bw.as_path()));
    }

    let mut persisted: Vec<&Path> = Vec::with_capacity(staged.len());
    for (file, dest) in staged {
        if let Err(e) = file.persist(dest) {
            for done in &persisted {
                let _ = std::fs::remove_file(done);
            }
            return Err(EigsError::Io(e.error));
        }
        persisted.push(dest);
    }
    for path in persisted {
        info!("Wrote {}", path.display());
    }
    Ok(())
}

/// bedGraph lines of one eigenvector column, sorted by chromosome name then
/// start as `bedGraphToBigWig` expects. Excluded bins are skipped.
pub fn bedgraph_records(table: &EigenvectorTable, column: &str) -> Result<Vec<String>, EigsError> {
    let values = table.column(column).ok_or_else(|| {
        EigsError::Config(format!("No eigenvector column named {}", column))
    })?;
    let mut rows: Vec<(&str, u64, u64, f64)> = table
        .bins
        .bins()
        .iter()
        .enumerate()
        .filter_map(|(idx, bin)| {
            values[idx].map(|v| (table.bins.chrom_name(idx), bin.start, bin.end, v))
        })
        .collect();
    rows.sort_by(|a, b| a.0.cmp(b.0).then(a.1.cmp(&b.1)));
    Ok(rows
        .into_iter()
        .map(|(chrom, start, end, v)| format!("{}\t{}\t{}\t{}", chrom, start, end, v))
        .collect())
}

fn bigwig_executable() -> String {
    std::env::var(BIGWIG_ENV_BIN)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_BIGWIG_BIN.to_string())
}

fn stage_bigwig(table: &EigenvectorTable, dest: &Path) -> Result<NamedTempFile, EigsError> {
    let records = bedgraph_records(table, BIGWIG_VALUE_FIELD)?;
    let bedgraph = write_staged(dest, |w| {
        for line in &records {
            writeln!(w, "{}", line)?;
        }
        Ok(())
    })?;
    let chromsizes = write_staged(dest, |w| {
        for (name, length) in table.bins.chromsizes().iter() {
            writeln!(w, "{}\t{}", name, length)?;
        }
        Ok(())
    })?;
    let staged = staging_file(dest)?;

    let executable = bigwig_executable();
    debug!(
        "Running {} on {} bedGraph records",
        executable,
        records.len()
    );
    let output = Command::new(&executable)
        .arg(bedgraph.path())
        .arg(chromsizes.path())
        .arg(staged.path())
        .output()
        .map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                EigsError::Io(io::Error::new(
                    ErrorKind::NotFound,
                    format!(
                        "{} not found; install the UCSC tool or set {}",
                        executable, BIGWIG_ENV_BIN
                    ),
                ))
            } else {
                EigsError::Io(io::Error::new(
                    e.kind(),
                    format!("Could not run {}: {}", executable, e),
                ))
            }
        })?;
    if !output.status.success() {
        return Err(EigsError::Io(io::Error::new(
            ErrorKind::Other,
            format!(
                "{} failed ({}): {}",
                executable,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        )));
    }
    Ok(staged)
}
