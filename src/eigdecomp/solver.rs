//! Leading eigenpairs of the trans matrix
//!
//! The dense layout goes through a full symmetric eigendecomposition. The
//! sparse layout uses subspace iteration with a Rayleigh-Ritz step, which only
//! needs products with the implicit operator.

use super::trans::TransMatrix;
use crate::error::EigsError;
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector, SymmetricEigen};

/// Eigenvalues below this fraction of the largest magnitude are degenerate.
const DEGENERATE_RTOL: f64 = 1e-10;
const SUBSPACE_MAX_ITER: usize = 2000;
const SUBSPACE_RTOL: f64 = 1e-9;

/// Eigenpairs in decomposition order (descending |eigenvalue|), scattered
/// back onto the whole bin table. Excluded bins and padded slots are `None`.
#[derive(Debug, Clone)]
pub struct EigenResult {
    pub eigenvalues: Vec<Option<f64>>,
    pub eigenvectors: Vec<Vec<Option<f64>>>,
}

impl EigenResult {
    pub fn len(&self) -> usize {
        self.eigenvalues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eigenvalues.is_empty()
    }
}

/// Compute the `n_eigs` eigenpairs of largest magnitude.
pub fn decompose(matrix: &TransMatrix, n_eigs: usize) -> Result<EigenResult, EigsError> {
    let n = matrix.n_valid();
    if n_eigs == 0 {
        return Err(EigsError::Config(
            "The number of eigenvectors must be positive".to_string(),
        ));
    }
    if n_eigs > n {
        return Err(EigsError::Config(format!(
            "Requested {} eigenvectors but only {} bins are valid for decomposition",
            n_eigs, n
        )));
    }

    let (pairs, max_abs) = match matrix.dense() {
        Some(m) => dense_eigenpairs(m, n_eigs),
        None => subspace_eigenpairs(matrix, n_eigs),
    };

    let threshold = DEGENERATE_RTOL * max_abs;
    let mut eigenvalues = Vec::with_capacity(n_eigs);
    let mut eigenvectors = Vec::with_capacity(n_eigs);
    for (k, (lambda, vector)) in pairs.into_iter().enumerate() {
        if max_abs == 0.0 || lambda.abs() <= threshold {
            warn!(
                "Eigenvalue #{} ({:.3e}) is numerically zero; leaving its slot empty",
                k + 1,
                lambda
            );
            eigenvalues.push(None);
            eigenvectors.push(vec![None; matrix.n_bins()]);
            continue;
        }
        let norm = vector.norm();
        let scale = if norm > 0.0 {
            lambda.abs().sqrt() / norm
        } else {
            0.0
        };
        let mut full = vec![None; matrix.n_bins()];
        for (&bin, value) in matrix.valid_bins().iter().zip(vector.iter()) {
            full[bin] = Some(value * scale);
        }
        eigenvalues.push(Some(lambda));
        eigenvectors.push(full);
    }
    info!(
        "Eigenvalues: {}",
        eigenvalues
            .iter()
            .map(|l| l.map_or("nan".to_string(), |l| format!("{:.6}", l)))
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(EigenResult {
        eigenvalues,
        eigenvectors,
    })
}

/// Sort eigenpairs by descending magnitude, keeping the original order on ties.
fn by_magnitude(eigenvalues: &DVector<f64>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..eigenvalues.len()).collect();
    order.sort_by(|&a, &b| eigenvalues[b].abs().total_cmp(&eigenvalues[a].abs()));
    order
}

fn dense_eigenpairs(m: &DMatrix<f64>, k: usize) -> (Vec<(f64, DVector<f64>)>, f64) {
    debug!("Dense symmetric eigendecomposition of a {}x{} matrix", m.nrows(), m.ncols());
    let eigen = SymmetricEigen::new(m.clone());
    let order = by_magnitude(&eigen.eigenvalues);
    let max_abs = order
        .first()
        .map(|&i| eigen.eigenvalues[i].abs())
        .unwrap_or(0.0);
    let pairs = order
        .into_iter()
        .take(k)
        .map(|i| (eigen.eigenvalues[i], eigen.eigenvectors.column(i).into_owned()))
        .collect();
    (pairs, max_abs)
}

/// Deterministic, well-spread starting block.
fn start_block(n: usize, m: usize) -> DMatrix<f64> {
    DMatrix::from_fn(n, m, |i, j| {
        let x = ((i * 7919 + j * 104_729 + 1) as f64 * 0.618_033_988_749_895).fract();
        x - 0.5
    })
}

fn subspace_eigenpairs(matrix: &TransMatrix, k: usize) -> (Vec<(f64, DVector<f64>)>, f64) {
    let n = matrix.n_valid();
    let m = n.min((2 * k).max(k + 8));
    let mut q = start_block(n, m).qr().q();

    let mut ritz_values = DVector::zeros(m);
    let mut ritz_vectors = DMatrix::zeros(n, m);
    let mut order: Vec<usize> = (0..m).collect();
    for iter in 0..SUBSPACE_MAX_ITER {
        let z = matrix.apply(&q);
        let h = q.transpose() * &z;
        let h = (&h + h.transpose()) * 0.5;
        let eigen = SymmetricEigen::new(h);
        order = by_magnitude(&eigen.eigenvalues);
        ritz_vectors = &q * &eigen.eigenvectors;
        let images = &z * &eigen.eigenvectors;
        ritz_values = eigen.eigenvalues;

        let scale = ritz_values.amax();
        let converged = scale == 0.0
            || order.iter().take(k).all(|&c| {
                let residual = images.column(c) - ritz_vectors.column(c) * ritz_values[c];
                residual.norm() <= SUBSPACE_RTOL * scale
            });
        if converged {
            debug!("Subspace iteration converged after {} iterations", iter + 1);
            break;
        }
        if iter + 1 == SUBSPACE_MAX_ITER {
            warn!(
                "Subspace iteration did not converge after {} iterations",
                SUBSPACE_MAX_ITER
            );
        }
        q = z.qr().q();
    }

    let max_abs = ritz_values.amax();
    let pairs = order
        .into_iter()
        .take(k)
        .map(|c| (ritz_values[c], ritz_vectors.column(c).into_owned()))
        .collect();
    (pairs, max_abs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooler::{ContactSource, ContactStore, Pixel};
    use crate::eigdecomp::trans::{build_trans_matrix, MatrixLayout, TransOpts};
    use crate::genome::{make_bins, BinTable, ChromSizes};
    use crate::view::make_genome_view;

    /// Three chromosomes of `per_chrom` bins; chrA-chrB contacts are twice as
    /// frequent as contacts with chrC.
    fn store(per_chrom: u64, weights: Option<Vec<Option<f64>>>) -> ContactStore {
        let mut cs = ChromSizes::new();
        for name in ["chrA", "chrB", "chrC"] {
            cs.push(name, per_chrom * 10).unwrap();
        }
        let bins = BinTable::new(cs.clone(), make_bins(&cs, 10)).unwrap();
        let n = bins.len() as u32;
        let chrom = |b: u32| b / per_chrom as u32;
        let mut pixels = Vec::new();
        for i in 0..n {
            for j in i..n {
                let count = match (chrom(i), chrom(j)) {
                    (a, b) if a == b => 10.0,
                    (0, 1) => 2.0,
                    _ => 1.0,
                };
                pixels.push(Pixel { bin1: i, bin2: j, count });
            }
        }
        let weights = weights.unwrap_or_else(|| vec![Some(1.0); n as usize]);
        ContactStore::new(bins, vec![("weight".to_string(), weights)], pixels).unwrap()
    }

    fn matrix(store: &ContactStore, layout: MatrixLayout) -> TransMatrix {
        let view = make_genome_view(store.chromsizes());
        let opts = TransOpts {
            layout,
            balance: false,
            clip_percentile: None,
        };
        build_trans_matrix(store, store.bins(), &view, "weight", &opts).unwrap()
    }

    #[test]
    fn test_n_eigs_bounds() {
        let store = store(2, None);
        let m = matrix(&store, MatrixLayout::Dense);
        assert!(matches!(decompose(&m, 0), Err(EigsError::Config(_))));
        assert!(matches!(decompose(&m, 7), Err(EigsError::Config(_))));
        assert_eq!(decompose(&m, 6).unwrap().len(), 6);
    }

    #[test]
    fn test_excluded_bins_are_empty_in_every_vector() {
        let mut weights = vec![Some(1.0); 12];
        weights[5] = None;
        weights[9] = None;
        let store = store(4, Some(weights));
        let m = matrix(&store, MatrixLayout::Dense);
        let result = decompose(&m, 3).unwrap();

        for vector in &result.eigenvectors {
            assert_eq!(vector.len(), 12);
            let missing: Vec<usize> = (0..12).filter(|&i| vector[i].is_none()).collect();
            if vector.iter().any(|v| v.is_some()) {
                assert_eq!(missing, vec![5, 9]);
            }
        }
    }

    #[test]
    fn test_vectors_are_orthogonal_and_scaled() {
        let store = store(5, None);
        let m = matrix(&store, MatrixLayout::Dense);
        let result = decompose(&m, 2).unwrap();
        let dot = |a: &[Option<f64>], b: &[Option<f64>]| -> f64 {
            a.iter()
                .zip(b)
                .filter_map(|(x, y)| Some((*x)? * (*y)?))
                .sum()
        };
        let (v1, v2) = (&result.eigenvectors[0], &result.eigenvectors[1]);
        assert!(dot(v1, v2).abs() < 1e-9);
        let lambda = result.eigenvalues[0].unwrap();
        assert!((dot(v1, v1) - lambda.abs()).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_slots_are_padded() {
        // Two chromosomes with constant trans contacts: O/E - 1 is zero.
        let mut cs = ChromSizes::new();
        cs.push("chr1", 30).unwrap();
        cs.push("chr2", 30).unwrap();
        let bins = BinTable::new(cs.clone(), make_bins(&cs, 10)).unwrap();
        let mut pixels = Vec::new();
        for i in 0..3 {
            for j in 3..6 {
                pixels.push(Pixel { bin1: i, bin2: j, count: 1.0 });
            }
        }
        let store =
            ContactStore::new(bins, vec![("weight".to_string(), vec![Some(1.0); 6])], pixels)
                .unwrap();
        let m = matrix(&store, MatrixLayout::Dense);
        let result = decompose(&m, 2).unwrap();
        assert_eq!(result.eigenvalues, vec![None, None]);
        assert!(result.eigenvectors[0].iter().all(|v| v.is_none()));
    }

    #[test]
    fn test_sparse_matches_dense() {
        let store = store(6, None);
        let dense = decompose(&matrix(&store, MatrixLayout::Dense), 2).unwrap();
        let sparse = decompose(&matrix(&store, MatrixLayout::Sparse), 2).unwrap();

        let l_dense = dense.eigenvalues[0].unwrap();
        let l_sparse = sparse.eigenvalues[0].unwrap();
        assert!((l_dense - l_sparse).abs() < 1e-6 * l_dense.abs());

        // leading vector agrees up to sign
        let (a, b) = (&dense.eigenvectors[0], &sparse.eigenvectors[0]);
        let sign = if a[0].unwrap() * b[0].unwrap() < 0.0 { -1.0 } else { 1.0 };
        for (x, y) in a.iter().zip(b) {
            assert!((x.unwrap() - sign * y.unwrap()).abs() < 1e-6);
        }
    }
}
