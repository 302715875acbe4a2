//! FinanSmart - Monte Carlo portfolio simulation.
//!
//! Loads historical close prices, derives period returns, and searches random
//! long-only allocations for the best risk-adjusted (Sharpe) portfolio.

pub mod analysis;
pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod portfolio;
pub mod statistics;
pub mod webui;

pub use data::{PriceTable, ReturnSeries};
pub use error::{SimResult, SimulationError};
pub use portfolio::{
    PortfolioSample, SimulationResult, WeightSampling, WeightVector, run_simulation,
    run_simulation_parallel, sample_weights, score_portfolio,
};
pub use statistics::{AssetStatistics, compute_asset_statistics};
