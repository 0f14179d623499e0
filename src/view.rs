//! Genomic views: the ordered, non-overlapping regions whose internal
//! contacts are masked when only trans contacts are decomposed.

use crate::error::EigsError;
use crate::genome::{BinTable, ChromSizes};
use crate::reader::{data_lines, open_text};
use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub name: String,
}

impl Region {
    /// UCSC-style `chrom:start-end`.
    pub fn ucsc_string(&self) -> String {
        format!("{}:{}-{}", self.chrom, self.start, self.end)
    }
}

/// Regions as read from a BED-like file, before validation.
#[derive(Debug, Clone)]
pub struct RegionRow {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct View {
    regions: Vec<Region>,
}

impl View {
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Region index for every bin, using the region that contains the bin's
    /// midpoint. Bins outside the view get `None`.
    pub fn assign_bins(&self, bins: &BinTable) -> Vec<Option<usize>> {
        // (start, end, region index) per chromosome, sorted by start; regions
        // never overlap.
        let mut per_chrom: FxHashMap<&str, Vec<(u64, u64, usize)>> = FxHashMap::default();
        for (idx, region) in self.regions.iter().enumerate() {
            per_chrom
                .entry(region.chrom.as_str())
                .or_default()
                .push((region.start, region.end, idx));
        }
        for spans in per_chrom.values_mut() {
            spans.sort_unstable();
        }

        let mut assignment = vec![None; bins.len()];
        let mut counts = vec![0usize; self.regions.len()];
        for (idx, bin) in bins.bins().iter().enumerate() {
            let Some(spans) = per_chrom.get(bins.chrom_name(idx)) else {
                continue;
            };
            let mid = bin.midpoint();
            let pos = spans.partition_point(|&(start, _, _)| start <= mid);
            if pos == 0 {
                continue;
            }
            let (_, end, region_idx) = spans[pos - 1];
            if mid < end {
                assignment[idx] = Some(region_idx);
                counts[region_idx] += 1;
            }
        }
        for (region, count) in self.regions.iter().zip(counts) {
            debug!("Region {} covers {} bins", region.name, count);
        }
        assignment
    }
}

/// One region per chromosome spanning its whole length.
pub fn make_genome_view(chromsizes: &ChromSizes) -> View {
    View {
        regions: chromsizes
            .iter()
            .map(|(name, length)| Region {
                chrom: name.to_string(),
                start: 0,
                end: length,
                name: name.to_string(),
            })
            .collect(),
    }
}

/// Resolve the view: the whole genome when no regions are given, otherwise
/// the validated regions.
pub fn resolve_view(
    chromsizes: &ChromSizes,
    regions: Option<Vec<RegionRow>>,
    check_sorting: bool,
) -> Result<View, EigsError> {
    match regions {
        None => Ok(make_genome_view(chromsizes)),
        Some(rows) => validate_view(chromsizes, rows, check_sorting),
    }
}

fn validate_view(
    chromsizes: &ChromSizes,
    rows: Vec<RegionRow>,
    check_sorting: bool,
) -> Result<View, EigsError> {
    if rows.is_empty() {
        return Err(EigsError::Config("The view contains no regions".to_string()));
    }

    let mut regions = Vec::with_capacity(rows.len());
    let mut names = FxHashSet::default();
    for row in rows {
        let chrom_id = chromsizes.get_id(&row.chrom).ok_or_else(|| {
            EigsError::Config(format!(
                "View region {}:{}-{} is on a chromosome absent from the contact matrix",
                row.chrom, row.start, row.end
            ))
        })?;
        let length = chromsizes.get_len(chrom_id).unwrap_or_default();
        if row.start >= row.end || row.end > length {
            return Err(EigsError::Config(format!(
                "View region {}:{}-{} is empty or exceeds the chromosome length {}",
                row.chrom, row.start, row.end, length
            )));
        }
        let mut region = Region {
            chrom: row.chrom,
            start: row.start,
            end: row.end,
            name: String::new(),
        };
        region.name = row.name.unwrap_or_else(|| region.ucsc_string());
        if !names.insert(region.name.clone()) {
            return Err(EigsError::Config(format!(
                "View region name {} is not unique",
                region.name
            )));
        }
        regions.push((chrom_id, region));
    }

    // Overlaps are always an error, whatever the order of the file.
    let mut sorted: Vec<&(u32, Region)> = regions.iter().collect();
    sorted.sort_by_key(|(chrom_id, region)| (*chrom_id, region.start, region.end));
    for pair in sorted.windows(2) {
        let (chrom_a, a) = pair[0];
        let (chrom_b, b) = pair[1];
        if chrom_a == chrom_b && b.start < a.end {
            return Err(EigsError::Config(format!(
                "View regions {} and {} overlap",
                a.name, b.name
            )));
        }
    }

    if check_sorting {
        for pair in regions.windows(2) {
            let (chrom_a, a) = &pair[0];
            let (chrom_b, b) = &pair[1];
            if (chrom_a, a.start) > (chrom_b, b.start) {
                return Err(EigsError::Config(format!(
                    "View regions are not sorted in genome order: {} comes before {}",
                    a.name, b.name
                )));
            }
        }
    }

    Ok(View {
        regions: regions.into_iter().map(|(_, region)| region).collect(),
    })
}

/// Read a BED-like region file: `chrom start end [name]`. A first line whose
/// coordinates are not integers is taken as a header.
pub fn read_regions(path: &Path) -> Result<Vec<RegionRow>, EigsError> {
    let mut rows = Vec::new();
    for (n, line) in data_lines(open_text(path)?).enumerate() {
        let (line_no, line) = line?;
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 3 {
            return Err(EigsError::Parse {
                path: path.display().to_string(),
                line: line_no,
                msg: "Expected at least `chrom start end`".to_string(),
            });
        }
        let parsed = (fields[1].parse::<u64>(), fields[2].parse::<u64>());
        let (start, end) = match parsed {
            (Ok(start), Ok(end)) => (start, end),
            _ if n == 0 => continue,
            _ => {
                return Err(EigsError::Parse {
                    path: path.display().to_string(),
                    line: line_no,
                    msg: format!("Invalid coordinates {}-{}", fields[1], fields[2]),
                })
            }
        };
        rows.push(RegionRow {
            chrom: fields[0].to_string(),
            start,
            end,
            name: fields
                .get(3)
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::make_bins;

    fn chromsizes() -> ChromSizes {
        let mut cs = ChromSizes::new();
        cs.push("chr1", 1000).unwrap();
        cs.push("chr2", 500).unwrap();
        cs
    }

    fn row(chrom: &str, start: u64, end: u64, name: Option<&str>) -> RegionRow {
        RegionRow {
            chrom: chrom.to_string(),
            start,
            end,
            name: name.map(|s| s.to_string()),
        }
    }

    #[test]
    fn test_default_view_is_one_region_per_chromosome() {
        let view = resolve_view(&chromsizes(), None, true).unwrap();
        assert_eq!(view.len(), 2);
        assert_eq!(
            view.regions()[1],
            Region {
                chrom: "chr2".to_string(),
                start: 0,
                end: 500,
                name: "chr2".to_string()
            }
        );
    }

    #[test]
    fn test_region_names_default_to_ucsc() {
        let rows = vec![
            row("chr1", 0, 400, Some("arm_p")),
            row("chr1", 400, 1000, None),
        ];
        let view = resolve_view(&chromsizes(), Some(rows), true).unwrap();
        assert_eq!(view.regions()[0].name, "arm_p");
        assert_eq!(view.regions()[1].name, "chr1:400-1000");
    }

    #[test]
    fn test_overlapping_regions_fail() {
        let rows = vec![row("chr1", 0, 500, None), row("chr1", 400, 1000, None)];
        assert!(matches!(
            resolve_view(&chromsizes(), Some(rows.clone()), true),
            Err(EigsError::Config(_))
        ));
        // overlaps fail even without the sorting check
        assert!(resolve_view(&chromsizes(), Some(rows), false).is_err());
    }

    #[test]
    fn test_unsorted_regions() {
        let rows = vec![row("chr2", 0, 500, None), row("chr1", 0, 1000, None)];
        assert!(resolve_view(&chromsizes(), Some(rows.clone()), true).is_err());
        let view = resolve_view(&chromsizes(), Some(rows), false).unwrap();
        assert_eq!(view.regions()[0].chrom, "chr2");
    }

    #[test]
    fn test_out_of_bounds_regions() {
        let rows = vec![row("chr2", 0, 600, None)];
        assert!(resolve_view(&chromsizes(), Some(rows), true).is_err());
        let rows = vec![row("chrX", 0, 10, None)];
        assert!(resolve_view(&chromsizes(), Some(rows), true).is_err());
        let rows = vec![row("chr1", 10, 10, None)];
        assert!(resolve_view(&chromsizes(), Some(rows), true).is_err());
    }

    #[test]
    fn test_duplicate_names() {
        let rows = vec![
            row("chr1", 0, 500, Some("a")),
            row("chr2", 0, 500, Some("a")),
        ];
        assert!(resolve_view(&chromsizes(), Some(rows), true).is_err());
    }

    #[test]
    fn test_assign_bins_by_midpoint() {
        let cs = chromsizes();
        let bins = BinTable::new(cs.clone(), make_bins(&cs, 100)).unwrap();
        let rows = vec![row("chr1", 0, 250, None), row("chr1", 250, 600, None)];
        let view = resolve_view(&cs, Some(rows), true).unwrap();
        let assignment = view.assign_bins(&bins);

        assert_eq!(assignment.len(), 15);
        assert_eq!(&assignment[..3], &[Some(0), Some(0), Some(1)]);
        assert_eq!(assignment[5], Some(1));
        assert_eq!(assignment[6], None);
        assert!(assignment[10..].iter().all(|a| a.is_none()));
    }

    #[test]
    fn test_assign_bins_beyond_32bit_coordinates() {
        let mut cs = ChromSizes::new();
        cs.push("chr1", 3_000_000_000).unwrap();
        cs.push("chr2", 1_000).unwrap();
        let bins = BinTable::new(cs.clone(), make_bins(&cs, 500_000_000)).unwrap();
        assert_eq!(bins.len(), 7);

        let assignment = resolve_view(&cs, None, true).unwrap().assign_bins(&bins);
        assert_eq!(assignment[..6], [Some(0); 6]);
        assert_eq!(assignment[6], Some(1));

        let rows = vec![row("chr1", 2_500_000_000, 3_000_000_000, None)];
        let view = resolve_view(&cs, Some(rows), true).unwrap();
        let assignment = view.assign_bins(&bins);
        assert_eq!(assignment[..5], [None; 5]);
        assert_eq!(assignment[5], Some(0));
        assert_eq!(assignment[6], None);
    }

    #[test]
    fn test_read_regions_with_header() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("view.bed");
        std::fs::write(
            &path,
            "chrom\tstart\tend\tname\nchr1\t0\t500\tleft\nchr1\t500\t1000\n",
        )
        .unwrap();
        let rows = read_regions(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name.as_deref(), Some("left"));
        assert_eq!(rows[1].name, None);
        assert_eq!(rows[1].start, 500);
    }
}
