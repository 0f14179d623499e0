//! Cooler-like contact matrix store
//!
//! A store is a directory holding three tab-separated tables, each of which
//! may be BGZF-compressed (`.tsv.gz`):
//!
//! - `chroms.tsv`: `name length`, no header (optional, derived from the bins
//!   when absent);
//! - `bins.tsv`: header `chrom start end [weight columns...]`;
//! - `pixels.tsv`: `bin1_id bin2_id count`, upper triangle, optional header.
//!
//! Pixels are loaded on demand and cached next to the tables in
//! `pixels.hictrans`, so repeated runs skip the text parsing.

use crate::error::EigsError;
use crate::genome::{Bin, BinTable, ChromSizes};
use crate::reader::{data_lines, open_text, parse_optional_f64};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const CACHE_MAGIC: &[u8; 8] = b"HICTRPX1";
const CACHE_VERSION: u32 = 1;
const CACHE_FILE: &str = "pixels.hictrans";

/// Raw contact count between two bins, `bin1 <= bin2`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pixel {
    pub bin1: u32,
    pub bin2: u32,
    pub count: f64,
}

/// Access to a genome-wide contact matrix and its balancing weights.
pub trait ContactSource {
    fn chromsizes(&self) -> &ChromSizes {
        self.bins().chromsizes()
    }

    fn bins(&self) -> &BinTable;

    /// Per-bin balancing weights for the named column; `None` marks a bin
    /// the balancing left out.
    fn weights(&self, name: &str) -> Option<&[Option<f64>]>;

    /// Upper-triangle raw pixels of the whole genome.
    fn pixels(&self) -> Result<Vec<Pixel>, EigsError>;

    /// Upper-triangle pixels balanced with the named weight:
    /// `count * w[bin1] * w[bin2]`. Pixels touching an unweighted bin are
    /// dropped.
    fn balanced(&self, weight_name: &str) -> Result<Vec<Pixel>, EigsError> {
        let weights = self.weights(weight_name).ok_or_else(|| {
            EigsError::DataIntegrity(format!(
                "Balancing weight column '{}' not found in the bin table",
                weight_name
            ))
        })?;
        let n_bins = self.bins().len();
        let mut balanced = Vec::new();
        for pixel in self.pixels()? {
            if pixel.bin1 as usize >= n_bins || pixel.bin2 as usize >= n_bins {
                return Err(EigsError::DataIntegrity(format!(
                    "Pixel ({}, {}) refers to a bin beyond the {} bins of the store",
                    pixel.bin1, pixel.bin2, n_bins
                )));
            }
            if let (Some(w1), Some(w2)) = (weights[pixel.bin1 as usize], weights[pixel.bin2 as usize])
            {
                balanced.push(Pixel {
                    count: pixel.count * w1 * w2,
                    ..pixel
                });
            }
        }
        Ok(balanced)
    }
}

/// Contact matrix held in memory, either built directly or opened from a
/// store directory.
pub struct ContactStore {
    bins: BinTable,
    weights: Vec<(String, Vec<Option<f64>>)>,
    pixels: PixelSource,
}

enum PixelSource {
    Memory(Vec<Pixel>),
    Directory {
        table: PathBuf,
        cache: PathBuf,
        force_reindex: bool,
    },
}

impl ContactStore {
    pub fn new(
        bins: BinTable,
        weights: Vec<(String, Vec<Option<f64>>)>,
        pixels: Vec<Pixel>,
    ) -> Result<Self, EigsError> {
        for (name, column) in &weights {
            if column.len() != bins.len() {
                return Err(EigsError::DataIntegrity(format!(
                    "Weight column '{}' has {} values for {} bins",
                    name,
                    column.len(),
                    bins.len()
                )));
            }
        }
        Ok(Self {
            bins,
            weights,
            pixels: PixelSource::Memory(pixels),
        })
    }

    /// Open a store directory. Only the chromosome and bin tables are read
    /// here; pixels are read when first requested.
    pub fn open(dir: &Path, force_reindex: bool) -> Result<Self, EigsError> {
        if !dir.is_dir() {
            return Err(EigsError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Contact matrix store '{}' is not a directory", dir.display()),
            )));
        }
        let bins_path = find_table(dir, "bins")?;
        let pixels_path = find_table(dir, "pixels")?;
        let chroms_path = find_table(dir, "chroms").ok();

        let chromsizes = match &chroms_path {
            Some(path) => Some(read_chromsizes(path)?),
            None => None,
        };
        let (bins, weights) = read_bins(&bins_path, chromsizes)?;
        info!(
            "Opened contact store {} with {} chromosomes and {} bins",
            dir.display(),
            bins.chromsizes().len(),
            bins.len()
        );
        debug!(
            "Weight columns: {}",
            weights
                .iter()
                .map(|(name, _)| name.as_str())
                .collect::<Vec<_>>()
                .join(",")
        );

        Ok(Self {
            bins,
            weights,
            pixels: PixelSource::Directory {
                table: pixels_path,
                cache: dir.join(CACHE_FILE),
                force_reindex,
            },
        })
    }
}

impl ContactSource for ContactStore {
    fn bins(&self) -> &BinTable {
        &self.bins
    }

    fn weights(&self, name: &str) -> Option<&[Option<f64>]> {
        self.weights
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, w)| w.as_slice())
    }

    fn pixels(&self) -> Result<Vec<Pixel>, EigsError> {
        match &self.pixels {
            PixelSource::Memory(pixels) => Ok(pixels.clone()),
            PixelSource::Directory {
                table,
                cache,
                force_reindex,
            } => load_or_generate_pixels(table, cache, *force_reindex),
        }
    }
}

fn find_table(dir: &Path, stem: &str) -> Result<PathBuf, EigsError> {
    for ext in ["tsv", "tsv.gz", "tsv.bgz"] {
        let path = dir.join(format!("{}.{}", stem, ext));
        if path.exists() {
            return Ok(path);
        }
    }
    Err(EigsError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("No {}.tsv table found in '{}'", stem, dir.display()),
    )))
}

fn parse_err(path: &Path, line: usize, msg: String) -> EigsError {
    EigsError::Parse {
        path: path.display().to_string(),
        line,
        msg,
    }
}

fn read_chromsizes(path: &Path) -> Result<ChromSizes, EigsError> {
    let mut chromsizes = ChromSizes::new();
    for line in data_lines(open_text(path)?) {
        let (line_no, line) = line?;
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 2 {
            return Err(parse_err(path, line_no, "Expected `name length`".to_string()));
        }
        let length = fields[1]
            .parse::<u64>()
            .map_err(|e| parse_err(path, line_no, format!("Invalid length: {}", e)))?;
        chromsizes.push(fields[0], length)?;
    }
    Ok(chromsizes)
}

type WeightColumns = Vec<(String, Vec<Option<f64>>)>;

fn read_bins(
    path: &Path,
    chromsizes: Option<ChromSizes>,
) -> Result<(BinTable, WeightColumns), EigsError> {
    let mut lines = data_lines(open_text(path)?);
    let header = match lines.next() {
        Some(line) => line?.1,
        None => {
            return Err(parse_err(path, 1, "Empty bin table".to_string()));
        }
    };
    let columns: Vec<&str> = header.split('\t').collect();
    if columns.len() < 3 || columns[..3] != ["chrom", "start", "end"] {
        return Err(parse_err(
            path,
            1,
            "Bin table header must start with `chrom start end`".to_string(),
        ));
    }
    let mut weights: WeightColumns = columns[3..]
        .iter()
        .map(|name| (name.to_string(), Vec::new()))
        .collect();

    let derive_sizes = chromsizes.is_none();
    let mut chromsizes = chromsizes.unwrap_or_default();
    let mut bins = Vec::new();
    for line in lines {
        let (line_no, line) = line?;
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != columns.len() {
            return Err(parse_err(
                path,
                line_no,
                format!("Expected {} fields, found {}", columns.len(), fields.len()),
            ));
        }
        let start = fields[1]
            .parse::<u64>()
            .map_err(|e| parse_err(path, line_no, format!("Invalid start: {}", e)))?;
        let end = fields[2]
            .parse::<u64>()
            .map_err(|e| parse_err(path, line_no, format!("Invalid end: {}", e)))?;
        let chrom_id = match chromsizes.get_id(fields[0]) {
            Some(id) => id,
            None if derive_sizes => chromsizes.push(fields[0], 0)?,
            None => {
                return Err(parse_err(
                    path,
                    line_no,
                    format!("Chromosome {} is not in the chromosome table", fields[0]),
                ))
            }
        };
        bins.push(Bin {
            chrom_id,
            start,
            end,
        });
        for (column, field) in weights.iter_mut().zip(&fields[3..]) {
            let value = parse_optional_f64(field).map_err(|e| {
                parse_err(path, line_no, format!("Invalid {} value: {}", column.0, e))
            })?;
            column.1.push(value);
        }
    }

    if derive_sizes {
        chromsizes = derive_chromsizes(&chromsizes, &bins)?;
    }
    Ok((BinTable::new(chromsizes, bins)?, weights))
}

/// Chromosome lengths taken from the end of each chromosome's last bin.
fn derive_chromsizes(names: &ChromSizes, bins: &[Bin]) -> Result<ChromSizes, EigsError> {
    let mut lengths = vec![0u64; names.len()];
    for bin in bins {
        let length = &mut lengths[bin.chrom_id as usize];
        *length = (*length).max(bin.end);
    }
    let mut chromsizes = ChromSizes::new();
    for ((name, _), length) in names.iter().zip(lengths) {
        chromsizes.push(name, length)?;
    }
    Ok(chromsizes)
}

fn read_pixels(path: &Path) -> Result<Vec<Pixel>, EigsError> {
    let mut pixels = Vec::new();
    for (n, line) in data_lines(open_text(path)?).enumerate() {
        let (line_no, line) = line?;
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 3 {
            return Err(parse_err(
                path,
                line_no,
                "Expected `bin1_id bin2_id count`".to_string(),
            ));
        }
        if n == 0 && fields[0].parse::<u32>().is_err() {
            // header
            continue;
        }
        let bin1 = fields[0]
            .parse::<u32>()
            .map_err(|e| parse_err(path, line_no, format!("Invalid bin1_id: {}", e)))?;
        let bin2 = fields[1]
            .parse::<u32>()
            .map_err(|e| parse_err(path, line_no, format!("Invalid bin2_id: {}", e)))?;
        let count = fields[2]
            .parse::<f64>()
            .map_err(|e| parse_err(path, line_no, format!("Invalid count: {}", e)))?;
        let (bin1, bin2) = if bin1 <= bin2 { (bin1, bin2) } else { (bin2, bin1) };
        pixels.push(Pixel { bin1, bin2, count });
    }
    Ok(pixels)
}

fn load_or_generate_pixels(
    table: &Path,
    cache: &Path,
    force_reindex: bool,
) -> Result<Vec<Pixel>, EigsError> {
    if !force_reindex && cache.exists() {
        if cache_is_fresh(table, cache) {
            match load_cache(cache) {
                Ok(pixels) => {
                    info!("Loaded {} pixels from {}", pixels.len(), cache.display());
                    return Ok(pixels);
                }
                Err(e) => warn!("Ignoring unreadable pixel cache {}: {}", cache.display(), e),
            }
        } else {
            warn!(
                "Pixel table {} has been modified since the cache was written, rebuilding",
                table.display()
            );
        }
    }

    let pixels = read_pixels(table)?;
    info!("Parsed {} pixels from {}", pixels.len(), table.display());
    if let Err(e) = write_cache(cache, &pixels) {
        warn!("Unable to write pixel cache {}: {}", cache.display(), e);
    }
    Ok(pixels)
}

fn cache_is_fresh(table: &Path, cache: &Path) -> bool {
    let modified = |p: &Path| fs::metadata(p).and_then(|m| m.modified()).ok();
    match (modified(table), modified(cache)) {
        (Some(table_ts), Some(cache_ts)) => table_ts <= cache_ts,
        _ => {
            warn!("Unable to compare timestamps of pixel table and cache");
            false
        }
    }
}

fn load_cache(cache: &Path) -> io::Result<Vec<Pixel>> {
    let mut reader = BufReader::new(File::open(cache)?);
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != CACHE_MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid magic bytes in {:?}", cache),
        ));
    }
    let mut version = [0u8; 4];
    reader.read_exact(&mut version)?;
    let version = u32::from_le_bytes(version);
    if version != CACHE_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Unsupported pixel cache version: {} (expected {})",
                version, CACHE_VERSION
            ),
        ));
    }
    bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard()).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to deserialize pixels: {e}"),
        )
    })
}

fn write_cache(cache: &Path, pixels: &[Pixel]) -> io::Result<()> {
    let stamp = SystemTime::now();
    let mut writer = BufWriter::new(File::create(cache)?);
    writer.write_all(CACHE_MAGIC)?;
    writer.write_all(&CACHE_VERSION.to_le_bytes())?;
    bincode::serde::encode_into_std_write(pixels, &mut writer, bincode::config::standard())
        .map_err(io::Error::other)?;
    writer.flush()?;
    debug!(
        "Wrote pixel cache {} in {:?}",
        cache.display(),
        stamp.elapsed().unwrap_or_default()
    );
    Ok(())
}
