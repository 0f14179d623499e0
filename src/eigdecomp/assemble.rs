use super::orient::Ranked;
use crate::genome::BinTable;
use crate::track::AlignedTrack;
use std::io::{self, Write};

/// One row per eigenvector, in rank order.
#[derive(Debug, Clone, PartialEq)]
pub struct EigenvalueTable {
    pub rows: Vec<(String, Option<f64>)>,
}

/// The bin table extended with the track column (when given) and one column
/// per eigenvector.
#[derive(Debug, Clone)]
pub struct EigenvectorTable {
    pub bins: BinTable,
    pub track: Option<(String, Vec<Option<f64>>)>,
    pub columns: Vec<(String, Vec<Option<f64>>)>,
}

#[derive(Debug, Clone)]
pub struct EigsResult {
    pub eigenvalues: EigenvalueTable,
    pub eigenvectors: EigenvectorTable,
}

pub fn assemble(aligned: AlignedTrack, ranked: Ranked) -> EigsResult {
    let Ranked {
        names,
        eigenvalues,
        eigenvectors,
        ..
    } = ranked;

    let eigenvalue_table = EigenvalueTable {
        rows: names.iter().cloned().zip(eigenvalues).collect(),
    };
    let AlignedTrack { bins, name, values } = aligned;
    EigsResult {
        eigenvalues: eigenvalue_table,
        eigenvectors: EigenvectorTable {
            bins,
            track: name.map(|name| (name, values)),
            columns: names.into_iter().zip(eigenvectors).collect(),
        },
    }
}

/// Missing values are written as empty fields.
fn fmt_value(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

impl EigenvalueTable {
    pub fn write_tsv<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writeln!(writer, "eigvec\teigval")?;
        for (name, value) in &self.rows {
            writeln!(writer, "{}\t{}", name, fmt_value(*value))?;
        }
        Ok(())
    }
}

impl EigenvectorTable {
    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }

    pub fn write_tsv<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write!(writer, "chrom\tstart\tend")?;
        if let Some((name, _)) = &self.track {
            write!(writer, "\t{}", name)?;
        }
        for (name, _) in &self.columns {
            write!(writer, "\t{}", name)?;
        }
        writeln!(writer)?;

        for (idx, bin) in self.bins.bins().iter().enumerate() {
            write!(
                writer,
                "{}\t{}\t{}",
                self.bins.chrom_name(idx),
                bin.start,
                bin.end
            )?;
            if let Some((_, values)) = &self.track {
                write!(writer, "\t{}", fmt_value(values[idx]))?;
            }
            for (_, values) in &self.columns {
                write!(writer, "\t{}", fmt_value(values[idx]))?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }
}
