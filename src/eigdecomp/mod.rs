//! Eigendecomposition of trans contacts
//!
//! `eigs_trans` runs the whole pipeline: mask cis contacts of the view, take
//! the leading eigenpairs of the trans matrix, orient and rank them against
//! the reference track, and lay the results out per bin.

pub mod assemble;
pub mod orient;
pub mod solver;
pub mod trans;

pub use assemble::{assemble, EigenvalueTable, EigenvectorTable, EigsResult};
pub use orient::{orient_and_rank, CorrMetric, Ranked};
pub use solver::{decompose, EigenResult};
pub use trans::{build_trans_matrix, MatrixLayout, TransMatrix, TransOpts};

use crate::cooler::ContactSource;
use crate::error::EigsError;
use crate::track::AlignedTrack;
use crate::view::View;
use log::info;

#[derive(Debug, Clone)]
pub struct EigsTransOpts {
    pub n_eigs: usize,
    pub clr_weight_name: String,
    pub corr_metric: CorrMetric,
    pub trans: TransOpts,
}

impl Default for EigsTransOpts {
    fn default() -> Self {
        Self {
            n_eigs: 3,
            clr_weight_name: "weight".to_string(),
            corr_metric: CorrMetric::default(),
            trans: TransOpts::default(),
        }
    }
}

pub fn eigs_trans<S: ContactSource + ?Sized>(
    source: &S,
    view: &View,
    track: AlignedTrack,
    opts: &EigsTransOpts,
) -> Result<EigsResult, EigsError> {
    if opts.n_eigs == 0 {
        return Err(EigsError::Config(
            "The number of eigenvectors must be positive".to_string(),
        ));
    }
    opts.trans.validate()?;
    if track.bins.len() != source.bins().len() || track.values.len() != track.bins.len() {
        return Err(EigsError::DataIntegrity(format!(
            "Track-aligned table has {} rows but the contact matrix has {} bins",
            track.values.len(),
            source.bins().len()
        )));
    }

    let matrix = build_trans_matrix(
        source,
        &track.bins,
        view,
        &opts.clr_weight_name,
        &opts.trans,
    )?;
    let eigs = decompose(&matrix, opts.n_eigs)?;
    drop(matrix);

    let ranked = orient_and_rank(eigs, track.track(), opts.corr_metric);
    if let Some(name) = &track.name {
        info!(
            "Ranked eigenvectors by {} correlation with {}: {}",
            opts.corr_metric,
            name,
            correlation_summary(&ranked)
        );
    }
    Ok(assemble(track, ranked))
}

/// `E1 0.9812, E2 n/a, ...` for the log.
fn correlation_summary(ranked: &Ranked) -> String {
    ranked
        .names
        .iter()
        .zip(&ranked.correlations)
        .map(|(name, corr)| match corr {
            Some(c) => format!("{} {:.4}", name, c),
            None => format!("{} n/a", name),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooler::{ContactStore, Pixel};
    use crate::genome::{make_bins, BinTable, ChromSizes};
    use crate::track::{align_track, Track, TrackRow};
    use crate::view::{make_genome_view, resolve_view, RegionRow};

    const PER_CHROM: usize = 100;

    /// Four chromosomes of 100 bins. Cis contacts are uniform; chrA-chrB and
    /// chrC-chrD trans contacts are twice as frequent as the other pairs.
    fn checkerboard() -> ContactStore {
        let mut cs = ChromSizes::new();
        for name in ["chrA", "chrB", "chrC", "chrD"] {
            cs.push(name, (PER_CHROM * 10) as u64).unwrap();
        }
        let bins = BinTable::new(cs.clone(), make_bins(&cs, 10)).unwrap();
        let n = bins.len();
        let mut pixels = Vec::with_capacity(n * (n + 1) / 2);
        for i in 0..n {
            for j in i..n {
                let (a, b) = (i / PER_CHROM, j / PER_CHROM);
                let count = if a == b {
                    50.0
                } else if (a, b) == (0, 1) || (a, b) == (2, 3) {
                    2.0
                } else {
                    1.0
                };
                pixels.push(Pixel {
                    bin1: i as u32,
                    bin2: j as u32,
                    count,
                });
            }
        }
        ContactStore::new(bins, vec![("weight".to_string(), vec![Some(1.0); n])], pixels)
            .unwrap()
    }

    fn opts(n_eigs: usize) -> EigsTransOpts {
        EigsTransOpts {
            n_eigs,
            ..EigsTransOpts::default()
        }
    }

    fn track_rows(store: &ContactStore, values: &[Option<f64>]) -> Track {
        let bins = store.bins();
        Track {
            name: "phase".to_string(),
            rows: (0..bins.len())
                .map(|idx| TrackRow {
                    chrom: bins.chrom_name(idx).to_string(),
                    start: bins.bins()[idx].start,
                    end: bins.bins()[idx].end,
                    value: values[idx],
                })
                .collect(),
        }
    }

    #[test]
    fn test_checkerboard_splits_ab_from_cd() {
        let store = checkerboard();
        let view = make_genome_view(store.chromsizes());
        let track = align_track(store.bins().clone(), None).unwrap();
        let result = eigs_trans(&store, &view, track, &opts(2)).unwrap();

        assert_eq!(result.eigenvalues.rows.len(), 2);
        let l1 = result.eigenvalues.rows[0].1.unwrap();
        let l2 = result.eigenvalues.rows[1].1.unwrap();
        assert!(l1.abs() > l2.abs());

        let e1 = result.eigenvectors.column("E1").unwrap();
        assert_eq!(e1.len(), 4 * PER_CHROM);
        let sign_ab = e1[0].unwrap().signum();
        for (idx, value) in e1.iter().enumerate() {
            let value = value.unwrap();
            let expected = if idx < 2 * PER_CHROM { sign_ab } else { -sign_ab };
            assert_eq!(value.signum(), expected);
        }
    }

    #[test]
    fn test_sparse_layout_agrees_with_dense() {
        let store = checkerboard();
        let view = make_genome_view(store.chromsizes());
        let dense = eigs_trans(
            &store,
            &view,
            align_track(store.bins().clone(), None).unwrap(),
            &opts(2),
        )
        .unwrap();
        let mut sparse_opts = opts(2);
        sparse_opts.trans.layout = MatrixLayout::Sparse;
        let sparse = eigs_trans(
            &store,
            &view,
            align_track(store.bins().clone(), None).unwrap(),
            &sparse_opts,
        )
        .unwrap();

        for k in 0..2 {
            let a = dense.eigenvalues.rows[k].1.unwrap();
            let b = sparse.eigenvalues.rows[k].1.unwrap();
            assert!((a - b).abs() < 1e-6 * a.abs());
        }
        let a = dense.eigenvectors.column("E1").unwrap();
        let b = sparse.eigenvectors.column("E1").unwrap();
        let sign = (a[0].unwrap() * b[0].unwrap()).signum();
        for (x, y) in a.iter().zip(b) {
            assert!((x.unwrap() - sign * y.unwrap()).abs() < 1e-6);
        }
    }

    #[test]
    fn test_track_equal_to_eigenvector_ranks_it_first() {
        let store = checkerboard();
        let view = make_genome_view(store.chromsizes());
        let raw = eigs_trans(
            &store,
            &view,
            align_track(store.bins().clone(), None).unwrap(),
            &opts(3),
        )
        .unwrap();

        // use the second raw eigenvector, scaled and negated, as the track
        let second = raw.eigenvectors.column("E2").unwrap().to_vec();
        let phase: Vec<Option<f64>> = second.iter().map(|v| v.map(|v| -3.0 * v)).collect();
        let track = align_track(store.bins().clone(), Some(track_rows(&store, &phase))).unwrap();
        let result = eigs_trans(&store, &view, track, &opts(3)).unwrap();

        assert_eq!(result.eigenvalues.rows[0].1, raw.eigenvalues.rows[1].1);
        let e1 = result.eigenvectors.column("E1").unwrap();
        let r = orient::correlation(e1, &phase, CorrMetric::Pearson).unwrap();
        assert!((r - 1.0).abs() < 1e-9);
        assert_eq!(result.eigenvectors.track.as_ref().unwrap().0, "phase");
    }

    #[test]
    fn test_anticorrelated_track_flips_sign_only() {
        let store = checkerboard();
        let view = make_genome_view(store.chromsizes());
        let raw = eigs_trans(
            &store,
            &view,
            align_track(store.bins().clone(), None).unwrap(),
            &opts(1),
        )
        .unwrap();
        let e1_raw = raw.eigenvectors.column("E1").unwrap().to_vec();
        let phase: Vec<Option<f64>> = e1_raw.iter().map(|v| v.map(|v| -v)).collect();

        let track = align_track(store.bins().clone(), Some(track_rows(&store, &phase))).unwrap();
        let result = eigs_trans(&store, &view, track, &opts(1)).unwrap();

        assert_eq!(result.eigenvalues.rows, raw.eigenvalues.rows);
        let e1 = result.eigenvectors.column("E1").unwrap();
        for (x, y) in e1.iter().zip(&e1_raw) {
            assert_eq!(x.unwrap(), -y.unwrap());
        }
    }

    #[test]
    fn test_row_and_column_counts() {
        let store = checkerboard();
        let view = make_genome_view(store.chromsizes());
        let track = align_track(store.bins().clone(), None).unwrap();
        let result = eigs_trans(&store, &view, track, &opts(3)).unwrap();
        assert_eq!(result.eigenvalues.rows.len(), 3);
        assert_eq!(result.eigenvectors.columns.len(), 3);
        for (_, column) in &result.eigenvectors.columns {
            assert_eq!(column.len(), store.bins().len());
        }
        let names: Vec<&str> = result
            .eigenvectors
            .columns
            .iter()
            .map(|(n, _)| n.as_str())
            .collect();
        assert_eq!(names, vec!["E1", "E2", "E3"]);
    }

    #[test]
    fn test_bins_outside_view_are_excluded_everywhere() {
        let store = checkerboard();
        let rows = ["chrA", "chrB", "chrC"]
            .iter()
            .map(|chrom| RegionRow {
                chrom: chrom.to_string(),
                start: 0,
                end: (PER_CHROM * 10) as u64,
                name: None,
            })
            .collect();
        let view = resolve_view(store.chromsizes(), Some(rows), true).unwrap();
        let track = align_track(store.bins().clone(), None).unwrap();
        let result = eigs_trans(&store, &view, track, &opts(2)).unwrap();

        for (_, column) in &result.eigenvectors.columns {
            if column.iter().all(|v| v.is_none()) {
                continue;
            }
            for (idx, value) in column.iter().enumerate() {
                assert_eq!(value.is_none(), idx >= 3 * PER_CHROM);
            }
        }
    }

    #[test]
    fn test_too_many_eigenvectors() {
        let store = checkerboard();
        let view = make_genome_view(store.chromsizes());
        let track = align_track(store.bins().clone(), None).unwrap();
        let result = eigs_trans(&store, &view, track, &opts(4 * PER_CHROM + 1));
        assert!(matches!(result, Err(EigsError::Config(_))));
    }

    /// Hands out bins and weights but fails on any pixel access.
    struct UnreadablePixels(ContactStore);

    impl ContactSource for UnreadablePixels {
        fn bins(&self) -> &BinTable {
            self.0.bins()
        }

        fn weights(&self, name: &str) -> Option<&[Option<f64>]> {
            self.0.weights(name)
        }

        fn pixels(&self) -> Result<Vec<Pixel>, EigsError> {
            Err(EigsError::DataIntegrity("pixel table is truncated".to_string()))
        }
    }

    #[test]
    fn test_clip_percentile_checked_before_pixels() {
        let source = UnreadablePixels(checkerboard());
        let view = make_genome_view(source.chromsizes());
        let track = align_track(source.bins().clone(), None).unwrap();
        let mut bad = opts(1);
        bad.trans.clip_percentile = Some(150.0);
        let result = eigs_trans(&source, &view, track.clone(), &bad);
        assert!(matches!(result, Err(EigsError::Config(_))));

        // a valid percentile reaches the pixel table
        let mut good = opts(1);
        good.trans.clip_percentile = Some(99.0);
        let result = eigs_trans(&source, &view, track, &good);
        assert!(matches!(result, Err(EigsError::DataIntegrity(_))));
    }

    #[test]
    fn test_correlation_summary() {
        let ranked = Ranked {
            names: vec!["E1".to_string(), "E2".to_string()],
            eigenvalues: vec![Some(2.0), Some(1.0)],
            eigenvectors: vec![vec![Some(1.0)], vec![Some(-1.0)]],
            correlations: vec![Some(0.98123), None],
        };
        assert_eq!(correlation_summary(&ranked), "E1 0.9812, E2 n/a");
    }
}
