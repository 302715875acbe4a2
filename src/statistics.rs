use crate::data::ReturnSeries;
use crate::error::{SimResult, SimulationError};
use serde::Serialize;

/// Annualized first and second moments of a return matrix.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AssetStatistics {
    pub assets: Vec<String>,
    pub periods_per_year: u32,
    /// Per-period mean × periods per year, one entry per asset.
    pub annualized_mean_return: Vec<f64>,
    /// Sample covariance (n − 1) × periods per year, N×N symmetric.
    pub annualized_covariance: Vec<Vec<f64>>,
}

impl AssetStatistics {
    pub fn asset_count(&self) -> usize {
        self.annualized_mean_return.len()
    }

    pub fn annualized_volatility(&self, asset: usize) -> f64 {
        self.annualized_covariance[asset][asset].max(0.0).sqrt()
    }
}

/// Computes annualized mean returns and covariance once per run.
pub fn compute_asset_statistics(
    returns: &ReturnSeries,
    periods_per_year: u32,
) -> SimResult<AssetStatistics> {
    let rows = returns.len();
    let columns = returns.asset_count();
    if rows < 2 || columns < 1 {
        return Err(SimulationError::InsufficientData { rows, columns });
    }
    if periods_per_year == 0 {
        return Err(SimulationError::invalid_argument(
            "periods_per_year must be >= 1",
        ));
    }

    let scale = periods_per_year as f64;
    let means = column_means(returns);
    let covariance = sample_covariance(returns, &means);

    Ok(AssetStatistics {
        assets: returns.assets().to_vec(),
        periods_per_year,
        annualized_mean_return: means.iter().map(|m| m * scale).collect(),
        annualized_covariance: covariance
            .into_iter()
            .map(|row| row.into_iter().map(|c| c * scale).collect())
            .collect(),
    })
}

fn column_means(returns: &ReturnSeries) -> Vec<f64> {
    let n = returns.len() as f64;
    let mut sums = vec![0.0; returns.asset_count()];
    for row in returns.rows() {
        for (sum, r) in sums.iter_mut().zip(row.iter()) {
            *sum += r;
        }
    }
    sums.into_iter().map(|s| s / n).collect()
}

fn sample_covariance(returns: &ReturnSeries, means: &[f64]) -> Vec<Vec<f64>> {
    let n = means.len();
    let denom = returns.len() as f64 - 1.0;
    let mut cov = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in i..n {
            let sum: f64 = returns
                .rows()
                .iter()
                .map(|row| (row[i] - means[i]) * (row[j] - means[j]))
                .sum();
            let covariance = sum / denom;
            cov[i][j] = covariance;
            cov[j][i] = covariance;
        }
    }
    cov
}

/// Standalone risk/return profile of a single asset.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AssetSummary {
    pub asset: String,
    pub annual_return: f64,
    pub annual_volatility: f64,
    pub sharpe_ratio: f64,
}

pub fn asset_summaries(stats: &AssetStatistics) -> Vec<AssetSummary> {
    stats
        .assets
        .iter()
        .enumerate()
        .map(|(i, asset)| {
            let annual_return = stats.annualized_mean_return[i];
            let annual_volatility = stats.annualized_volatility(i);
            let sharpe_ratio = if annual_volatility > 0.0 {
                annual_return / annual_volatility
            } else {
                0.0
            };
            AssetSummary {
                asset: asset.clone(),
                annual_return,
                annual_volatility,
                sharpe_ratio,
            }
        })
        .collect()
}

/// Pearson correlation derived from the covariance matrix.
///
/// A zero-variance asset has no defined correlation; it is reported as 1 with
/// itself and 0 with every other asset.
pub fn correlation_matrix(stats: &AssetStatistics) -> Vec<Vec<f64>> {
    let n = stats.asset_count();
    let vols: Vec<f64> = (0..n).map(|i| stats.annualized_volatility(i)).collect();
    let mut corr = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            corr[i][j] = if i == j {
                1.0
            } else if vols[i] > 0.0 && vols[j] > 0.0 {
                (stats.annualized_covariance[i][j] / (vols[i] * vols[j])).clamp(-1.0, 1.0)
            } else {
                0.0
            };
        }
    }
    corr
}

/// Descriptive statistics of one return column.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ColumnDescription {
    pub asset: String,
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub max: f64,
}

pub fn describe(returns: &ReturnSeries) -> Vec<ColumnDescription> {
    returns
        .assets()
        .iter()
        .enumerate()
        .map(|(i, asset)| {
            let mut values = returns.column(i);
            let count = values.len();
            if count == 0 {
                return ColumnDescription {
                    asset: asset.clone(),
                    count,
                    mean: f64::NAN,
                    std: f64::NAN,
                    min: f64::NAN,
                    p25: f64::NAN,
                    p50: f64::NAN,
                    p75: f64::NAN,
                    max: f64::NAN,
                };
            }
            let mean = values.iter().sum::<f64>() / count as f64;
            let std = if count > 1 {
                let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                    / (count as f64 - 1.0);
                var.sqrt()
            } else {
                f64::NAN
            };
            values.sort_by(|a, b| a.total_cmp(b));
            ColumnDescription {
                asset: asset.clone(),
                count,
                mean,
                std,
                min: values[0],
                p25: quantile_sorted(&values, 0.25),
                p50: quantile_sorted(&values, 0.50),
                p75: quantile_sorted(&values, 0.75),
                max: values[count - 1],
            }
        })
        .collect()
}

/// Linear interpolation between closest ranks; `sorted` must be non-empty.
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
