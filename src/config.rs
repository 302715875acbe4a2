use crate::portfolio::WeightSampling;
use rayon::ThreadPoolBuilder;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::{info, warn};

static RAYON_INIT: OnceLock<()> = OnceLock::new();

pub fn init_cpu_parallelism() {
    RAYON_INIT.get_or_init(|| {
        let num_threads = num_cpus::get().max(1);
        match ThreadPoolBuilder::new().num_threads(num_threads).build_global() {
            Ok(_) => info!(
                "Initialized Rayon thread pool with {} threads (all logical CPU cores)",
                num_threads
            ),
            Err(e) => warn!(
                "Rayon thread pool already initialized or unavailable ({}). Using existing configuration.",
                e
            ),
        }
    });
}

/// Loads a `.env` file from the working directory if one exists.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("Failed to read .env file: {}", e),
    }
}

/// Annual trading days for annualization of daily returns.
pub const TRADING_DAYS: u32 = 252;

/// Default number of random portfolios per run.
pub const DEFAULT_TRIALS: usize = 10_000;

/// Bounds applied by the CLI and web layers (the core only requires >= 1).
pub const MIN_TRIALS: usize = 1_000;
pub const MAX_TRIALS: usize = 50_000;

/// Trials per parallel work unit. Fixed so seeded output does not depend on thread count.
pub const PARALLEL_CHUNK_TRIALS: usize = 1_024;

/// Tolerance below zero tolerated for wᵀΣw before it is treated as corrupt input.
pub const VARIANCE_TOLERANCE: f64 = 1e-10;

/// Annualized volatility below this is indistinguishable from rounding noise and scored as zero risk.
pub const RISK_EPSILON: f64 = 1e-12;

/// Redraws attempted before a zero-sum weight draw falls back to equal weights.
pub const MAX_WEIGHT_REDRAWS: usize = 8;

pub const DEFAULT_TICKERS: &[&str] = &["AAPL", "MSFT", "AMZN", "GOOGL", "META"];

pub const DEFAULT_WEBUI_PORT: u16 = 8080;

/// Knobs shared by the CLI and the web server.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimulationSettings {
    pub periods_per_year: u32,
    pub trials: usize,
    pub seed: Option<u64>,
    pub sampling: WeightSampling,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            periods_per_year: TRADING_DAYS,
            trials: DEFAULT_TRIALS,
            seed: None,
            sampling: WeightSampling::Uniform,
        }
    }
}

impl SimulationSettings {
    /// Reads `FINANSMART_*` overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(raw) = lookup("FINANSMART_PERIODS_PER_YEAR") {
            match raw.trim().parse::<u32>() {
                Ok(v) if v > 0 => settings.periods_per_year = v,
                _ => warn!(
                    "Invalid FINANSMART_PERIODS_PER_YEAR={} ; defaulting to {}",
                    raw, TRADING_DAYS
                ),
            }
        }

        if let Some(raw) = lookup("FINANSMART_TRIALS") {
            match raw.trim().parse::<usize>() {
                Ok(v) if (MIN_TRIALS..=MAX_TRIALS).contains(&v) => settings.trials = v,
                _ => warn!(
                    "Invalid FINANSMART_TRIALS={} (allowed {}..={}); defaulting to {}",
                    raw, MIN_TRIALS, MAX_TRIALS, DEFAULT_TRIALS
                ),
            }
        }

        if let Some(raw) = lookup("FINANSMART_SEED") {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                match trimmed.parse::<u64>() {
                    Ok(v) => settings.seed = Some(v),
                    Err(_) => warn!("Invalid FINANSMART_SEED={} ; using a random seed", raw),
                }
            }
        }

        if let Some(raw) = lookup("FINANSMART_SAMPLING") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "uniform" => settings.sampling = WeightSampling::Uniform,
                "dirichlet" => settings.sampling = WeightSampling::Dirichlet,
                other => warn!(
                    "Unknown FINANSMART_SAMPLING={} ; defaulting to uniform. Allowed values: uniform | dirichlet",
                    other
                ),
            }
        }

        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let settings = SimulationSettings::from_lookup(|_| None);
        assert_eq!(settings, SimulationSettings::default());
        assert_eq!(settings.periods_per_year, 252);
        assert_eq!(settings.trials, 10_000);
        assert!(settings.seed.is_none());
    }

    #[test]
    fn test_env_overrides_are_applied() {
        let settings = SimulationSettings::from_lookup(lookup_from(&[
            ("FINANSMART_PERIODS_PER_YEAR", "52"),
            ("FINANSMART_TRIALS", "2000"),
            ("FINANSMART_SEED", " 7 "),
            ("FINANSMART_SAMPLING", "Dirichlet"),
        ]));
        assert_eq!(settings.periods_per_year, 52);
        assert_eq!(settings.trials, 2000);
        assert_eq!(settings.seed, Some(7));
        assert_eq!(settings.sampling, WeightSampling::Dirichlet);
    }

    #[test]
    fn test_invalid_env_values_fall_back() {
        let settings = SimulationSettings::from_lookup(lookup_from(&[
            ("FINANSMART_PERIODS_PER_YEAR", "0"),
            ("FINANSMART_TRIALS", "10"),
            ("FINANSMART_SEED", "abc"),
            ("FINANSMART_SAMPLING", "sobol"),
        ]));
        assert_eq!(settings, SimulationSettings::default());
    }
}
