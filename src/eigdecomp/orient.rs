//! Orientation and ranking of eigenvectors against a reference track.

use super::solver::EigenResult;
use log::debug;

/// How an eigenvector is compared with the reference track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorrMetric {
    #[default]
    Pearson,
    Spearman,
    /// Pearson r², carrying the sign of r.
    VarExplained,
}

impl std::str::FromStr for CorrMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pearson" | "pearsonr" => Ok(CorrMetric::Pearson),
            "spearman" | "spearmanr" => Ok(CorrMetric::Spearman),
            "var-explained" | "var_explained" => Ok(CorrMetric::VarExplained),
            _ => Err(format!(
                "Unknown correlation metric '{}' (pearson, spearman, var-explained)",
                s
            )),
        }
    }
}

impl std::fmt::Display for CorrMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CorrMetric::Pearson => "pearson",
            CorrMetric::Spearman => "spearman",
            CorrMetric::VarExplained => "var-explained",
        };
        write!(f, "{}", name)
    }
}

fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        let (dx, dy) = (a - mean_x, b - mean_y);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    let r = sxy / (sxx.sqrt() * syy.sqrt());
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

/// 1-based ranks, ties sharing their average rank.
fn ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        let rank = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = rank;
        }
        start = end;
    }
    ranks
}

/// Correlation between an eigenvector and the track over the bins where both
/// have a value. `None` when it is undefined (fewer than two shared bins or
/// no variance).
pub fn correlation(vector: &[Option<f64>], track: &[Option<f64>], metric: CorrMetric) -> Option<f64> {
    let (x, y): (Vec<f64>, Vec<f64>) = vector
        .iter()
        .zip(track)
        .filter_map(|(v, t)| Some(((*v)?, (*t)?)))
        .unzip();
    if x.len() < 2 {
        return None;
    }
    match metric {
        CorrMetric::Pearson => pearson(&x, &y),
        CorrMetric::Spearman => pearson(&ranks(&x), &ranks(&y)),
        CorrMetric::VarExplained => pearson(&x, &y).map(|r| r * r.abs()),
    }
}

/// Flip the sign of an eigenvector that is anti-correlated with the track.
/// Returns the correlation after orientation, which is never negative.
pub fn orient(vector: &mut [Option<f64>], track: &[Option<f64>], metric: CorrMetric) -> Option<f64> {
    let corr = correlation(vector, track, metric)?;
    if corr < 0.0 {
        for value in vector.iter_mut().flatten() {
            *value = -*value;
        }
        return Some(-corr);
    }
    Some(corr)
}

/// Eigenpairs in their final order with their output names.
#[derive(Debug, Clone)]
pub struct Ranked {
    pub names: Vec<String>,
    pub eigenvalues: Vec<Option<f64>>,
    pub eigenvectors: Vec<Vec<Option<f64>>>,
    /// Correlation with the track after orientation; `None` without a track.
    pub correlations: Vec<Option<f64>>,
}

/// Orient every eigenvector by the track and rank by descending absolute
/// correlation (stable; undefined correlations last). Without a track the
/// decomposition order and signs are kept.
pub fn orient_and_rank(result: EigenResult, track: Option<&[Option<f64>]>, metric: CorrMetric) -> Ranked {
    let EigenResult {
        eigenvalues,
        mut eigenvectors,
    } = result;

    let mut correlations = vec![None; eigenvalues.len()];
    let mut order: Vec<usize> = (0..eigenvalues.len()).collect();
    if let Some(track) = track {
        for (k, vector) in eigenvectors.iter_mut().enumerate() {
            correlations[k] = orient(vector, track, metric);
            debug!(
                "Eigenvector #{} {} correlation with track: {:?}",
                k + 1,
                metric,
                correlations[k]
            );
        }
        order.sort_by(|&a, &b| match (correlations[a], correlations[b]) {
            (Some(x), Some(y)) => y.abs().total_cmp(&x.abs()),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
    }

    let mut slots: Vec<Option<Vec<Option<f64>>>> = eigenvectors.into_iter().map(Some).collect();
    let mut ranked = Ranked {
        names: Vec::with_capacity(order.len()),
        eigenvalues: Vec::with_capacity(order.len()),
        eigenvectors: Vec::with_capacity(order.len()),
        correlations: Vec::with_capacity(order.len()),
    };
    for (rank, &k) in order.iter().enumerate() {
        ranked.names.push(format!("E{}", rank + 1));
        ranked.eigenvalues.push(eigenvalues[k]);
        ranked.eigenvectors.push(slots[k].take().unwrap_or_default());
        ranked.correlations.push(correlations[k]);
    }
    ranked
}
