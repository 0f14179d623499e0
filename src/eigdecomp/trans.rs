//! Trans-only contact matrix
//!
//! Contacts between bins of the same view region are masked. The remaining
//! trans contacts are optionally re-balanced among themselves, clipped, and
//! turned into observed/expected - 1, where the expected value is the mean
//! over every trans bin pair. Masked pairs sit at the expected value (0) and
//! so carry no signal into the decomposition.

use crate::cooler::ContactSource;
use crate::error::EigsError;
use crate::genome::BinTable;
use crate::view::View;
use log::{debug, info, warn};
use nalgebra::DMatrix;

const ICE_TOLERANCE: f64 = 1e-5;
const ICE_MAX_ITER: usize = 1000;

/// In-memory representation of the masked matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixLayout {
    /// `n x n` over valid bins; O(n²) memory.
    Dense,
    /// Observed trans pixels only, expected value applied implicitly;
    /// O(pixels + n) memory.
    Sparse,
}

impl std::str::FromStr for MatrixLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dense" => Ok(MatrixLayout::Dense),
            "sparse" => Ok(MatrixLayout::Sparse),
            _ => Err(format!("Unknown matrix layout '{}' (dense, sparse)", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransOpts {
    pub layout: MatrixLayout,
    /// Iteratively correct the trans-only matrix before taking O/E.
    pub balance: bool,
    /// Clip trans values above this percentile (0-100) of observed pixels.
    pub clip_percentile: Option<f64>,
}

impl Default for TransOpts {
    fn default() -> Self {
        Self {
            layout: MatrixLayout::Dense,
            balance: true,
            clip_percentile: None,
        }
    }
}

impl TransOpts {
    /// Reject options that cannot apply to any matrix.
    pub fn validate(&self) -> Result<(), EigsError> {
        match self.clip_percentile {
            Some(percentile) => check_clip_percentile(percentile),
            None => Ok(()),
        }
    }
}

/// Trans pixel between two valid bins in compact coordinates, `i < j`.
#[derive(Debug, Clone, Copy)]
struct TransPixel {
    i: usize,
    j: usize,
    value: f64,
}

/// The masked trans matrix over the valid bins.
pub struct TransMatrix {
    n_bins: usize,
    /// compact index -> bin index
    valid: Vec<usize>,
    /// bin index -> compact index
    compact: Vec<Option<usize>>,
    /// compact index -> region label
    region: Vec<usize>,
    n_regions: usize,
    repr: MatrixRepr,
}

enum MatrixRepr {
    Dense(DMatrix<f64>),
    Sparse(SparseTrans),
}

/// Symmetric CSR of `A / mean` plus the implicit `-1` over every trans pair.
struct SparseTrans {
    row_ptr: Vec<usize>,
    cols: Vec<usize>,
    vals: Vec<f64>,
}

impl TransMatrix {
    /// Number of bins in the genome bin table.
    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    /// Number of bins taking part in the decomposition.
    pub fn n_valid(&self) -> usize {
        self.valid.len()
    }

    /// Bin indices of the valid bins, in genome order.
    pub fn valid_bins(&self) -> &[usize] {
        &self.valid
    }

    /// Whether the pair of bins is left out of the decomposition.
    pub fn is_masked(&self, bin_i: usize, bin_j: usize) -> bool {
        match (self.compact[bin_i], self.compact[bin_j]) {
            (Some(i), Some(j)) => self.region[i] == self.region[j],
            _ => true,
        }
    }

    /// Normalised (O/E - 1) value of a pair of bins, `None` when masked.
    pub fn value(&self, bin_i: usize, bin_j: usize) -> Option<f64> {
        if self.is_masked(bin_i, bin_j) {
            return None;
        }
        let (i, j) = (self.compact[bin_i]?, self.compact[bin_j]?);
        match &self.repr {
            MatrixRepr::Dense(m) => Some(m[(i, j)]),
            MatrixRepr::Sparse(s) => {
                let row = &s.cols[s.row_ptr[i]..s.row_ptr[i + 1]];
                let observed = row
                    .binary_search(&j)
                    .map(|pos| s.vals[s.row_ptr[i] + pos])
                    .unwrap_or(0.0);
                Some(observed - 1.0)
            }
        }
    }

    pub(crate) fn dense(&self) -> Option<&DMatrix<f64>> {
        match &self.repr {
            MatrixRepr::Dense(m) => Some(m),
            MatrixRepr::Sparse(_) => None,
        }
    }

    /// `Y = M X` for a block of column vectors over valid bins.
    pub(crate) fn apply(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        match &self.repr {
            MatrixRepr::Dense(m) => m * x,
            MatrixRepr::Sparse(s) => {
                let n = self.valid.len();
                let mut y = DMatrix::zeros(n, x.ncols());
                let mut region_sums = vec![0.0; self.n_regions];
                for c in 0..x.ncols() {
                    let col = x.column(c);
                    region_sums.iter_mut().for_each(|v| *v = 0.0);
                    for (i, &r) in self.region.iter().enumerate() {
                        region_sums[r] += col[i];
                    }
                    let total: f64 = region_sums.iter().sum();
                    for i in 0..n {
                        let mut acc = 0.0;
                        for k in s.row_ptr[i]..s.row_ptr[i + 1] {
                            acc += s.vals[k] * col[s.cols[k]];
                        }
                        // every trans partner contributes -1
                        y[(i, c)] = acc - (total - region_sums[self.region[i]]);
                    }
                }
                y
            }
        }
    }
}

/// Build the masked trans matrix for the bins of `view`, balanced with the
/// named weight column.
pub fn build_trans_matrix<S: ContactSource + ?Sized>(
    source: &S,
    bins: &BinTable,
    view: &View,
    weight_name: &str,
    opts: &TransOpts,
) -> Result<TransMatrix, EigsError> {
    opts.validate()?;
    let n_bins = bins.len();
    if source.bins().len() != n_bins {
        return Err(EigsError::DataIntegrity(format!(
            "Bin table has {} bins but the contact matrix has {}",
            n_bins,
            source.bins().len()
        )));
    }
    let weights = source.weights(weight_name).ok_or_else(|| {
        EigsError::DataIntegrity(format!(
            "Balancing weight column '{}' not found in the bin table",
            weight_name
        ))
    })?;

    let assignment = view.assign_bins(bins);
    let candidate: Vec<bool> = (0..n_bins)
        .map(|idx| assignment[idx].is_some() && weights[idx].is_some())
        .collect();
    let is_trans = |a: usize, b: usize| {
        candidate[a] && candidate[b] && assignment[a] != assignment[b]
    };

    let mut trans: Vec<(usize, usize, f64)> = Vec::new();
    let mut row_sums = vec![0.0; n_bins];
    for pixel in source.balanced(weight_name)? {
        let (a, b) = (pixel.bin1 as usize, pixel.bin2 as usize);
        if !is_trans(a, b) || !pixel.count.is_finite() || pixel.count == 0.0 {
            continue;
        }
        row_sums[a] += pixel.count;
        row_sums[b] += pixel.count;
        trans.push((a, b, pixel.count));
    }

    // Bins without any trans signal are dropped along with the masked ones.
    let mut compact = vec![None; n_bins];
    let mut valid = Vec::new();
    for idx in 0..n_bins {
        if candidate[idx] && row_sums[idx] > 0.0 {
            compact[idx] = Some(valid.len());
            valid.push(idx);
        }
    }
    let n = valid.len();
    info!(
        "{} of {} bins are valid for trans decomposition ({} in view, {} weighted)",
        n,
        n_bins,
        assignment.iter().filter(|a| a.is_some()).count(),
        weights.iter().filter(|w| w.is_some()).count()
    );

    // Relabel regions densely over the valid bins.
    let mut labels = vec![usize::MAX; view.len()];
    let mut region = Vec::with_capacity(n);
    let mut n_regions = 0;
    for &idx in &valid {
        let r = assignment[idx].unwrap_or_default();
        if labels[r] == usize::MAX {
            labels[r] = n_regions;
            n_regions += 1;
        }
        region.push(labels[r]);
    }
    if n > 0 && n_regions < 2 {
        warn!("All valid bins fall into a single view region; there are no trans contacts");
    }

    let mut pixels: Vec<TransPixel> = trans
        .into_iter()
        .filter_map(|(a, b, value)| {
            Some(TransPixel {
                i: compact[a]?,
                j: compact[b]?,
                value,
            })
        })
        .collect();

    if opts.balance {
        iterative_correction(&mut pixels, n);
    }
    if let Some(percentile) = opts.clip_percentile {
        clip_to_percentile(&mut pixels, percentile)?;
    }

    let mut region_sizes = vec![0usize; n_regions];
    for &r in &region {
        region_sizes[r] += 1;
    }
    let trans_pairs = (n * n) as f64 - region_sizes.iter().map(|s| (s * s) as f64).sum::<f64>();
    let trans_total = 2.0 * pixels.iter().map(|p| p.value).sum::<f64>();
    let expected = if trans_pairs > 0.0 && trans_total > 0.0 {
        trans_total / trans_pairs
    } else {
        1.0
    };
    debug!(
        "{} trans pixels over {} trans bin pairs, expected {:.6e}",
        pixels.len(),
        trans_pairs,
        expected
    );

    let repr = match opts.layout {
        MatrixLayout::Dense => {
            info!(
                "Building dense {}x{} trans matrix (~{:.1} MiB)",
                n,
                n,
                (n * n * std::mem::size_of::<f64>()) as f64 / (1024.0 * 1024.0)
            );
            let mut m = DMatrix::from_fn(n, n, |i, j| {
                if region[i] == region[j] {
                    0.0
                } else {
                    -1.0
                }
            });
            for p in &pixels {
                m[(p.i, p.j)] += p.value / expected;
                m[(p.j, p.i)] += p.value / expected;
            }
            MatrixRepr::Dense(m)
        }
        MatrixLayout::Sparse => {
            info!(
                "Building sparse trans matrix over {} bins with {} pixels",
                n,
                pixels.len()
            );
            MatrixRepr::Sparse(SparseTrans::from_pixels(&pixels, n, expected))
        }
    };

    Ok(TransMatrix {
        n_bins,
        valid,
        compact,
        region,
        n_regions,
        repr,
    })
}

impl SparseTrans {
    fn from_pixels(pixels: &[TransPixel], n: usize, expected: f64) -> Self {
        let mut entries: Vec<(usize, usize, f64)> = Vec::with_capacity(2 * pixels.len());
        for p in pixels {
            entries.push((p.i, p.j, p.value / expected));
            entries.push((p.j, p.i, p.value / expected));
        }
        entries.sort_by_key(|&(i, j, _)| (i, j));

        let mut row_ptr = vec![0usize; n + 1];
        let mut cols = Vec::with_capacity(entries.len());
        let mut vals: Vec<f64> = Vec::with_capacity(entries.len());
        let mut prev: Option<(usize, usize)> = None;
        for (i, j, v) in entries {
            // duplicated pixels are summed
            if prev == Some((i, j)) {
                if let Some(last) = vals.last_mut() {
                    *last += v;
                }
                continue;
            }
            prev = Some((i, j));
            cols.push(j);
            vals.push(v);
            row_ptr[i + 1] += 1;
        }
        for i in 0..n {
            row_ptr[i + 1] += row_ptr[i];
        }
        Self {
            row_ptr,
            cols,
            vals,
        }
    }
}

/// Scale trans pixels until every valid bin has the same trans coverage.
fn iterative_correction(pixels: &mut [TransPixel], n: usize) {
    let mut scale = vec![0.0; n];
    for iter in 0..ICE_MAX_ITER {
        scale.iter_mut().for_each(|s| *s = 0.0);
        for p in pixels.iter() {
            scale[p.i] += p.value;
            scale[p.j] += p.value;
        }
        let nonzero: Vec<f64> = scale.iter().copied().filter(|s| *s > 0.0).collect();
        if nonzero.is_empty() {
            return;
        }
        let mean = nonzero.iter().sum::<f64>() / nonzero.len() as f64;
        for s in scale.iter_mut() {
            *s = if *s > 0.0 { *s / mean } else { 1.0 };
        }
        let var = nonzero
            .iter()
            .map(|s| (s / mean - 1.0).powi(2))
            .sum::<f64>()
            / nonzero.len() as f64;
        for p in pixels.iter_mut() {
            p.value /= scale[p.i] * scale[p.j];
        }
        if var < ICE_TOLERANCE {
            debug!("Trans balancing converged after {} iterations", iter + 1);
            return;
        }
    }
    warn!(
        "Trans balancing did not converge after {} iterations",
        ICE_MAX_ITER
    );
}

fn check_clip_percentile(percentile: f64) -> Result<(), EigsError> {
    if !(0.0..=100.0).contains(&percentile) {
        return Err(EigsError::Config(format!(
            "Clip percentile must be within 0-100, got {}",
            percentile
        )));
    }
    Ok(())
}

fn clip_to_percentile(pixels: &mut [TransPixel], percentile: f64) -> Result<(), EigsError> {
    check_clip_percentile(percentile)?;
    if pixels.is_empty() || percentile >= 100.0 {
        return Ok(());
    }
    let mut values: Vec<f64> = pixels.iter().map(|p| p.value).collect();
    values.sort_by(|a, b| a.total_cmp(b));
    // linear interpolation between closest ranks
    let pos = percentile / 100.0 * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let threshold = values[lo] + (values[hi] - values[lo]) * (pos - lo as f64);
    debug!("Clipping trans pixels above {:.6e}", threshold);
    for p in pixels.iter_mut() {
        p.value = p.value.min(threshold);
    }
    Ok(())
}
