use noodles::bgzf;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Open a text table, transparently decompressing `.gz`/`.bgz` files as BGZF.
pub fn open_text(path: &Path) -> io::Result<Box<dyn BufRead>> {
    let file = File::open(path).map_err(|e| {
        io::Error::new(e.kind(), format!("Failed to open '{}': {}", path.display(), e))
    })?;
    let name = path.to_string_lossy();
    if [".gz", ".bgz"].iter().any(|e| name.ends_with(e)) {
        Ok(Box::new(BufReader::new(bgzf::io::Reader::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Iterate over the non-empty, non-comment lines of a table as
/// `(1-based line number, line)`.
pub fn data_lines(
    reader: Box<dyn BufRead>,
) -> impl Iterator<Item = io::Result<(usize, String)>> {
    reader
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| match line {
            Ok(line) => {
                let trimmed = line.trim_end_matches(['\r', '\n']);
                if trimmed.trim().is_empty() || trimmed.starts_with('#') {
                    None
                } else {
                    Some(Ok((idx + 1, trimmed.to_string())))
                }
            }
            Err(e) => Some(Err(e)),
        })
}

/// Missing-value spellings accepted in numeric columns.
pub fn parse_optional_f64(field: &str) -> Result<Option<f64>, std::num::ParseFloatError> {
    match field.trim() {
        "" | "." | "NA" | "na" | "nan" | "NaN" | "NAN" => Ok(None),
        s => {
            let v = s.parse::<f64>()?;
            Ok(if v.is_finite() { Some(v) } else { None })
        }
    }
}
