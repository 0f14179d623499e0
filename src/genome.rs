//! Chromosome sizes and the genome bin table
//!
//! Bins are ordered by chromosome (in chromosome-size order) and then by
//! position. Everything downstream refers to bins by their index in this
//! table.

use crate::error::EigsError;
use rustc_hash::FxHashMap;

/// Ordered chromosome names and lengths; the order is the genome order.
#[derive(Debug, Clone, Default)]
pub struct ChromSizes {
    names: Vec<String>,
    lengths: Vec<u64>,
    name_to_id: FxHashMap<String, u32>,
}

impl ChromSizes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, length: u64) -> Result<u32, EigsError> {
        if self.name_to_id.contains_key(name) {
            return Err(EigsError::DataIntegrity(format!(
                "Chromosome {} is listed more than once",
                name
            )));
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_string());
        self.lengths.push(length);
        self.name_to_id.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get_id(&self, name: &str) -> Option<u32> {
        self.name_to_id.get(name).copied()
    }

    pub fn get_name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(|s| s.as_str())
    }

    pub fn get_len(&self, id: u32) -> Option<u64> {
        self.lengths.get(id as usize).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.names
            .iter()
            .map(|s| s.as_str())
            .zip(self.lengths.iter().copied())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bin {
    pub chrom_id: u32,
    pub start: u64,
    pub end: u64,
}

impl Bin {
    pub fn midpoint(&self) -> u64 {
        self.start + (self.end - self.start) / 2
    }
}

/// Genome-ordered bins, sharing chromosome names with a [`ChromSizes`].
#[derive(Debug, Clone)]
pub struct BinTable {
    chromsizes: ChromSizes,
    bins: Vec<Bin>,
}

impl BinTable {
    /// Build a bin table, checking that every chromosome is tiled by
    /// contiguous bins from 0 to its length, in genome order.
    pub fn new(chromsizes: ChromSizes, bins: Vec<Bin>) -> Result<Self, EigsError> {
        let mut prev: Option<Bin> = None;
        for (idx, bin) in bins.iter().enumerate() {
            let chrom_len = chromsizes.get_len(bin.chrom_id).ok_or_else(|| {
                EigsError::DataIntegrity(format!(
                    "Bin {} refers to unknown chromosome id {}",
                    idx, bin.chrom_id
                ))
            })?;
            if bin.start >= bin.end || bin.end > chrom_len {
                return Err(EigsError::DataIntegrity(format!(
                    "Bin {} ({}:{}-{}) is empty or exceeds the chromosome length {}",
                    idx,
                    chromsizes.get_name(bin.chrom_id).unwrap_or("?"),
                    bin.start,
                    bin.end,
                    chrom_len
                )));
            }
            let expected_start = match prev {
                Some(p) if p.chrom_id == bin.chrom_id => p.end,
                Some(p) if p.chrom_id > bin.chrom_id => {
                    return Err(EigsError::DataIntegrity(format!(
                        "Bin {} is out of chromosome order",
                        idx
                    )));
                }
                Some(p) => {
                    check_chrom_closed(&chromsizes, &p)?;
                    0
                }
                None => 0,
            };
            if bin.start != expected_start {
                return Err(EigsError::DataIntegrity(format!(
                    "Bin {} ({}:{}-{}) does not start where the previous bin ends ({})",
                    idx,
                    chromsizes.get_name(bin.chrom_id).unwrap_or("?"),
                    bin.start,
                    bin.end,
                    expected_start
                )));
            }
            prev = Some(*bin);
        }
        if let Some(p) = prev {
            check_chrom_closed(&chromsizes, &p)?;
        }

        Ok(Self { chromsizes, bins })
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn chromsizes(&self) -> &ChromSizes {
        &self.chromsizes
    }

    pub fn bins(&self) -> &[Bin] {
        &self.bins
    }

    pub fn chrom_name(&self, idx: usize) -> &str {
        self.chromsizes
            .get_name(self.bins[idx].chrom_id)
            .unwrap_or_default()
    }

    /// Bin index lookup by exact coordinates.
    pub fn coordinate_index(&self) -> FxHashMap<(u32, u64, u64), usize> {
        self.bins
            .iter()
            .enumerate()
            .map(|(idx, bin)| ((bin.chrom_id, bin.start, bin.end), idx))
            .collect()
    }
}

fn check_chrom_closed(chromsizes: &ChromSizes, last: &Bin) -> Result<(), EigsError> {
    let chrom_len = chromsizes.get_len(last.chrom_id).unwrap_or_default();
    if last.end != chrom_len {
        return Err(EigsError::DataIntegrity(format!(
            "Bins of {} end at {} but the chromosome length is {}",
            chromsizes.get_name(last.chrom_id).unwrap_or("?"),
            last.end,
            chrom_len
        )));
    }
    Ok(())
}

/// Fixed-width bins over every chromosome.
pub fn make_bins(chromsizes: &ChromSizes, binsize: u64) -> Vec<Bin> {
    let mut bins = Vec::new();
    for (id, (_, length)) in chromsizes.iter().enumerate() {
        let mut start = 0;
        while start < length {
            let end = std::cmp::min(start + binsize, length);
            bins.push(Bin {
                chrom_id: id as u32,
                start,
                end,
            });
            start = end;
        }
    }
    bins
}
