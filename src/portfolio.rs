use crate::config::{MAX_WEIGHT_REDRAWS, PARALLEL_CHUNK_TRIALS, RISK_EPSILON, VARIANCE_TOLERANCE};
use crate::data::ReturnSeries;
use crate::error::{SimResult, SimulationError};
use crate::statistics::{AssetStatistics, compute_asset_statistics};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// ──────────────────────────────────────────────────────────────────────────────
// Data Structures
// ──────────────────────────────────────────────────────────────────────────────

/// How raw weights are drawn before normalization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WeightSampling {
    /// Independent U[0, 1) draws divided by their sum.
    #[default]
    Uniform,
    /// Unit exponential draws divided by their sum (flat Dirichlet, uniform on the simplex).
    Dirichlet,
}

/// Long-only allocation summing to 1, in `ReturnSeries` column order.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct WeightVector(Vec<f64>);

impl WeightVector {
    /// Normalizes non-negative raw values by their sum.
    pub fn from_raw(raw: Vec<f64>) -> SimResult<Self> {
        if raw.is_empty() {
            return Err(SimulationError::invalid_argument("weight vector is empty"));
        }
        if raw.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(SimulationError::invalid_argument(
                "weights must be finite and non-negative",
            ));
        }
        let sum: f64 = raw.iter().sum();
        if sum == 0.0 {
            return Err(SimulationError::DegenerateSample);
        }
        Ok(Self(raw.into_iter().map(|w| w / sum).collect()))
    }

    pub fn equal(asset_count: usize) -> SimResult<Self> {
        if asset_count == 0 {
            return Err(SimulationError::invalid_argument("asset_count must be >= 1"));
        }
        Ok(Self(vec![1.0 / asset_count as f64; asset_count]))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One simulated trial.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PortfolioSample {
    pub weights: WeightVector,
    pub expected_return: f64,
    pub risk: f64,
    pub sharpe_ratio: f64,
}

/// Every sample of a run in generation order, plus the max-Sharpe entry.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimulationResult {
    pub samples: Vec<PortfolioSample>,
    pub best_index: usize,
    pub best: PortfolioSample,
}

impl SimulationResult {
    fn from_samples(samples: Vec<PortfolioSample>) -> SimResult<Self> {
        let best_index = select_best(&samples)
            .ok_or_else(|| SimulationError::invalid_argument("no samples were generated"))?;
        let best = samples[best_index].clone();
        Ok(Self {
            samples,
            best_index,
            best,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Index of the maximum Sharpe ratio; the earliest sample wins ties.
fn select_best(samples: &[PortfolioSample]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, s) in samples.iter().enumerate() {
        match best {
            Some((_, sharpe)) if s.sharpe_ratio <= sharpe => {}
            _ => best = Some((i, s.sharpe_ratio)),
        }
    }
    best.map(|(i, _)| i)
}

// ──────────────────────────────────────────────────────────────────────────────
// Weight Sampling
// ──────────────────────────────────────────────────────────────────────────────

/// Draws a random weight vector from U[0, 1) values normalized by their sum.
pub fn sample_weights<R: Rng>(asset_count: usize, rng: &mut R) -> SimResult<WeightVector> {
    sample_weights_with(asset_count, WeightSampling::Uniform, rng)
}

/// Draws a random weight vector using `sampling`.
///
/// A zero-sum draw is redrawn up to `MAX_WEIGHT_REDRAWS` times, then replaced by
/// equal weights, so the result always sums to 1.
pub fn sample_weights_with<R: Rng>(
    asset_count: usize,
    sampling: WeightSampling,
    rng: &mut R,
) -> SimResult<WeightVector> {
    if asset_count == 0 {
        return Err(SimulationError::invalid_argument("asset_count must be >= 1"));
    }

    for _ in 0..=MAX_WEIGHT_REDRAWS {
        let raw: Vec<f64> = match sampling {
            WeightSampling::Uniform => (0..asset_count).map(|_| rng.gen_range(0.0..1.0)).collect(),
            WeightSampling::Dirichlet => (0..asset_count).map(|_| Exp1.sample(rng)).collect(),
        };
        match WeightVector::from_raw(raw) {
            Ok(weights) => return Ok(weights),
            Err(SimulationError::DegenerateSample) => debug!("Zero-sum weight draw, redrawing"),
            Err(e) => return Err(e),
        }
    }

    warn!(
        "{} consecutive zero-sum weight draws; falling back to equal weights",
        MAX_WEIGHT_REDRAWS + 1
    );
    WeightVector::equal(asset_count)
}

// ──────────────────────────────────────────────────────────────────────────────
// Scoring
// ──────────────────────────────────────────────────────────────────────────────

fn portfolio_return(weights: &[f64], means: &[f64]) -> f64 {
    weights.iter().zip(means.iter()).map(|(w, r)| w * r).sum()
}

fn portfolio_variance(weights: &[f64], cov: &[Vec<f64>]) -> f64 {
    let n = weights.len();
    let mut var = 0.0;
    for i in 0..n {
        for j in 0..n {
            var += weights[i] * weights[j] * cov[i][j];
        }
    }
    var
}

/// Scores one allocation: annualized return, volatility and Sharpe ratio.
pub fn score_portfolio(weights: WeightVector, stats: &AssetStatistics) -> SimResult<PortfolioSample> {
    if weights.len() != stats.asset_count() {
        return Err(SimulationError::invalid_argument(format!(
            "weight vector has {} entries for {} assets",
            weights.len(),
            stats.asset_count()
        )));
    }

    let expected_return = portfolio_return(weights.as_slice(), &stats.annualized_mean_return);
    let variance = portfolio_variance(weights.as_slice(), &stats.annualized_covariance);
    if variance < -VARIANCE_TOLERANCE || variance.is_nan() {
        return Err(SimulationError::InvalidResult { radicand: variance });
    }

    let risk = variance.max(0.0).sqrt();
    let (risk, sharpe_ratio) = if risk > RISK_EPSILON {
        (risk, expected_return / risk)
    } else {
        (0.0, 0.0)
    };

    Ok(PortfolioSample {
        weights,
        expected_return,
        risk,
        sharpe_ratio,
    })
}

/// Scores the 1/N allocation.
pub fn equal_weight_portfolio(stats: &AssetStatistics) -> SimResult<PortfolioSample> {
    score_portfolio(WeightVector::equal(stats.asset_count())?, stats)
}

// ──────────────────────────────────────────────────────────────────────────────
// Simulation
// ──────────────────────────────────────────────────────────────────────────────

fn check_trial_count(trial_count: usize) -> SimResult<()> {
    if trial_count == 0 {
        return Err(SimulationError::invalid_argument("trial_count must be >= 1"));
    }
    Ok(())
}

fn simulate_trials<R: Rng>(
    stats: &AssetStatistics,
    trial_count: usize,
    sampling: WeightSampling,
    rng: &mut R,
) -> SimResult<Vec<PortfolioSample>> {
    let n = stats.asset_count();
    (0..trial_count)
        .map(|_| score_portfolio(sample_weights_with(n, sampling, rng)?, stats))
        .collect()
}

/// Monte Carlo search over random allocations using the uniform sampling scheme.
pub fn run_simulation<R: Rng>(
    returns: &ReturnSeries,
    trial_count: usize,
    periods_per_year: u32,
    rng: &mut R,
) -> SimResult<SimulationResult> {
    run_simulation_with(returns, trial_count, periods_per_year, WeightSampling::Uniform, rng)
}

/// Sequential simulation drawing every trial from the single supplied random source.
pub fn run_simulation_with<R: Rng>(
    returns: &ReturnSeries,
    trial_count: usize,
    periods_per_year: u32,
    sampling: WeightSampling,
    rng: &mut R,
) -> SimResult<SimulationResult> {
    check_trial_count(trial_count)?;
    let stats = compute_asset_statistics(returns, periods_per_year)?;

    info!(
        "Simulating {} portfolios over {} assets ({} periods)",
        trial_count,
        stats.asset_count(),
        returns.len()
    );

    let samples = simulate_trials(&stats, trial_count, sampling, rng)?;
    SimulationResult::from_samples(samples)
}

fn chunk_rng(seed: u64, chunk: usize) -> StdRng {
    StdRng::seed_from_u64(seed ^ (chunk as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15))
}

/// Rayon-parallel simulation.
///
/// Trials are split into `PARALLEL_CHUNK_TRIALS`-sized chunks, each with its own
/// generator seeded from `(seed, chunk index)`, and collected in index order. The
/// output for a given seed is therefore identical regardless of thread count,
/// though it differs from the sequential `run_simulation_with` stream.
pub fn run_simulation_parallel(
    returns: &ReturnSeries,
    trial_count: usize,
    periods_per_year: u32,
    seed: u64,
    sampling: WeightSampling,
) -> SimResult<SimulationResult> {
    check_trial_count(trial_count)?;
    let stats = compute_asset_statistics(returns, periods_per_year)?;
    let n_chunks = trial_count.div_ceil(PARALLEL_CHUNK_TRIALS);

    info!(
        "Simulating {} portfolios over {} assets in {} parallel chunks",
        trial_count,
        stats.asset_count(),
        n_chunks
    );

    let chunks: Vec<Vec<PortfolioSample>> = (0..n_chunks)
        .into_par_iter()
        .map(|chunk| {
            let start = chunk * PARALLEL_CHUNK_TRIALS;
            let end = (start + PARALLEL_CHUNK_TRIALS).min(trial_count);
            let mut rng = chunk_rng(seed, chunk);
            simulate_trials(&stats, end - start, sampling, &mut rng)
        })
        .collect::<SimResult<Vec<_>>>()?;

    SimulationResult::from_samples(chunks.into_iter().flatten().collect())
}

// ──────────────────────────────────────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────────────────────────────────────
