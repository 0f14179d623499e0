//! Reference (phasing) tracks: parsing and exact alignment onto the bin table.

use crate::error::EigsError;
use crate::genome::BinTable;
use crate::reader::{data_lines, open_text, parse_optional_f64};
use log::{info, warn};
use std::path::{Path, PathBuf};

/// Name given to the track column when the file has no header.
pub const DEFAULT_TRACK_NAME: &str = "ref";
/// 0-based column read when none is specified.
pub const DEFAULT_TRACK_COLUMN: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum TrackColumn {
    Index(usize),
    Name(String),
}

/// `PATH[::COLUMN]` as given on the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSpec {
    pub path: PathBuf,
    pub column: TrackColumn,
}

impl std::str::FromStr for TrackSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, column) = match s.rsplit_once("::") {
            Some((path, col)) if !col.is_empty() => {
                let column = match col.parse::<usize>() {
                    Ok(idx) => TrackColumn::Index(idx),
                    Err(_) => TrackColumn::Name(col.to_string()),
                };
                (path, column)
            }
            Some((path, _)) => (path, TrackColumn::Index(DEFAULT_TRACK_COLUMN)),
            None => (s, TrackColumn::Index(DEFAULT_TRACK_COLUMN)),
        };
        if path.is_empty() {
            return Err("Track path is empty".to_string());
        }
        Ok(TrackSpec {
            path: PathBuf::from(path),
            column,
        })
    }
}

/// One typed track record.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRow {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub value: Option<f64>,
}

/// Typed track rows and the name of their value column.
#[derive(Debug, Clone)]
pub struct Track {
    pub name: String,
    pub rows: Vec<TrackRow>,
}

/// Read a bedGraph-like track, resolving the value column by index or header
/// name.
pub fn read_track(spec: &TrackSpec) -> Result<Track, EigsError> {
    let path = spec.path.as_path();
    let mut lines = data_lines(open_text(path)?).peekable();

    let header: Option<Vec<String>> = match lines.peek() {
        Some(Ok((_, first))) if is_header(first) => {
            Some(first.split('\t').map(|s| s.trim().to_string()).collect())
        }
        _ => None,
    };
    if header.is_some() {
        lines.next();
    }

    let (name, columns) = resolve_columns(path, &spec.column, header.as_deref())?;
    let [chrom_col, start_col, end_col, value_col] = columns;

    let mut rows = Vec::new();
    for line in lines {
        let (line_no, line) = line?;
        let fields: Vec<&str> = line.split('\t').collect();
        let field = |idx: usize| {
            fields.get(idx).copied().ok_or_else(|| EigsError::Parse {
                path: path.display().to_string(),
                line: line_no,
                msg: format!("Missing column {}", idx),
            })
        };
        let parse_pos = |idx: usize| -> Result<u64, EigsError> {
            field(idx)?.trim().parse::<u64>().map_err(|e| EigsError::Parse {
                path: path.display().to_string(),
                line: line_no,
                msg: format!("Invalid coordinate in column {}: {}", idx, e),
            })
        };
        let value = parse_optional_f64(field(value_col)?).map_err(|e| EigsError::Parse {
            path: path.display().to_string(),
            line: line_no,
            msg: format!("Invalid {} value: {}", name, e),
        })?;
        rows.push(TrackRow {
            chrom: field(chrom_col)?.trim().to_string(),
            start: parse_pos(start_col)?,
            end: parse_pos(end_col)?,
            value,
        });
    }
    info!("Read {} rows of track {} from {}", rows.len(), name, path.display());

    Ok(Track { name, rows })
}

/// A first line whose start/end fields are not integers is a header.
fn is_header(line: &str) -> bool {
    let fields: Vec<&str> = line.split('\t').collect();
    fields.len() < 3
        || fields[1].trim().parse::<u64>().is_err()
        || fields[2].trim().parse::<u64>().is_err()
}

fn resolve_columns(
    path: &Path,
    column: &TrackColumn,
    header: Option<&[String]>,
) -> Result<(String, [usize; 4]), EigsError> {
    match header {
        None => match column {
            TrackColumn::Index(idx) if *idx >= 3 => {
                Ok((DEFAULT_TRACK_NAME.to_string(), [0, 1, 2, *idx]))
            }
            TrackColumn::Index(idx) => Err(EigsError::Config(format!(
                "Column #{} of {} is a coordinate column, not a track",
                idx,
                path.display()
            ))),
            TrackColumn::Name(name) => Err(EigsError::Config(format!(
                "No header found in {}. Cannot find \"{}\" column without a header.",
                path.display(),
                name
            ))),
        },
        Some(names) => {
            let position = |col: &str| names.iter().position(|n| n == col);
            let coords = match (position("chrom"), position("start"), position("end")) {
                (Some(c), Some(s), Some(e)) => [c, s, e],
                _ => {
                    return Err(EigsError::Config(format!(
                        "Header \"{}\" of {} lacks chrom, start and end columns",
                        names.join(","),
                        path.display()
                    )))
                }
            };
            let value_col = match column {
                TrackColumn::Index(idx) if *idx < names.len() => *idx,
                TrackColumn::Index(idx) => {
                    return Err(EigsError::Config(format!(
                        "Column #{} not compatible with header \"{}\"",
                        idx,
                        names.join(",")
                    )))
                }
                TrackColumn::Name(name) => position(name).ok_or_else(|| {
                    EigsError::Config(format!(
                        "Column \"{}\" not found in header \"{}\"",
                        name,
                        names.join(",")
                    ))
                })?,
            };
            if coords.contains(&value_col) {
                return Err(EigsError::Config(format!(
                    "Column \"{}\" is a coordinate column, not a track",
                    names[value_col]
                )));
            }
            Ok((
                names[value_col].clone(),
                [coords[0], coords[1], coords[2], value_col],
            ))
        }
    }
}

/// The bin table seen through an optional reference track: one value slot per
/// bin, `None` where the track has no usable value.
#[derive(Debug, Clone)]
pub struct AlignedTrack {
    pub bins: BinTable,
    pub name: Option<String>,
    pub values: Vec<Option<f64>>,
}

impl AlignedTrack {
    /// Track values when a track is present.
    pub fn track(&self) -> Option<&[Option<f64>]> {
        self.name.as_ref().map(|_| self.values.as_slice())
    }
}

/// Left-join a track onto the bins by exact `(chrom, start, end)`. Bin order
/// and count are preserved; duplicated track coordinates would multiply bins
/// and are rejected.
pub fn align_track(bins: BinTable, track: Option<Track>) -> Result<AlignedTrack, EigsError> {
    let Some(track) = track else {
        let n = bins.len();
        return Ok(AlignedTrack {
            bins,
            name: None,
            values: vec![None; n],
        });
    };

    let index = bins.coordinate_index();
    let chromsizes = bins.chromsizes();
    let mut values: Vec<Option<f64>> = vec![None; bins.len()];
    let mut matched = vec![false; bins.len()];
    let mut unmatched = 0usize;
    for row in &track.rows {
        let bin_idx = chromsizes
            .get_id(&row.chrom)
            .and_then(|chrom_id| index.get(&(chrom_id, row.start, row.end)));
        match bin_idx {
            Some(&idx) => {
                if matched[idx] {
                    return Err(EigsError::DataIntegrity(format!(
                        "Track {} has more than one row for bin {}:{}-{}; merging it with the bins would add rows",
                        track.name, row.chrom, row.start, row.end
                    )));
                }
                matched[idx] = true;
                values[idx] = row.value;
            }
            None => unmatched += 1,
        }
    }

    if unmatched > 0 {
        warn!(
            "{} rows of track {} do not match any bin and were ignored",
            unmatched, track.name
        );
    }
    let n_matched = matched.iter().filter(|m| **m).count();
    info!(
        "Aligned track {} onto {} of {} bins",
        track.name,
        n_matched,
        bins.len()
    );

    Ok(AlignedTrack {
        bins,
        name: Some(track.name),
        values,
    })
}
