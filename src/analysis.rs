use crate::config::SimulationSettings;
use crate::data::PriceTable;
use crate::portfolio::{
    self, PortfolioSample, SimulationResult, WeightSampling, equal_weight_portfolio,
};
use crate::statistics::{
    self, AssetStatistics, AssetSummary, ColumnDescription, compute_asset_statistics,
};
use anyhow::{Result, anyhow};
use chrono::NaiveDate;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::info;

/// What to analyse: which tickers, which dates, and how to simulate.
#[derive(Clone, Debug, Default, Serialize)]
pub struct AnalysisRequest {
    /// Empty means every ticker in the price table.
    pub tickers: Vec<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub settings: SimulationSettings,
    pub parallel: bool,
}

/// Everything a presentation layer needs to render one run.
#[derive(Clone, Debug, Serialize)]
pub struct AnalysisReport {
    pub assets: Vec<String>,
    pub periods: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub periods_per_year: u32,
    pub trials: usize,
    pub seed: u64,
    pub sampling: WeightSampling,
    pub statistics: AssetStatistics,
    pub asset_summaries: Vec<AssetSummary>,
    pub correlation: Vec<Vec<f64>>,
    pub descriptions: Vec<ColumnDescription>,
    pub equal_weight: PortfolioSample,
    pub simulation: SimulationResult,
}

/// Full pipeline: select → returns → statistics → equal-weight reference → simulation.
pub fn run_analysis(table: &PriceTable, request: &AnalysisRequest) -> Result<AnalysisReport> {
    if let (Some(start), Some(end)) = (request.start, request.end) {
        if start > end {
            return Err(anyhow!("Start date {} is after end date {}", start, end));
        }
    }

    let tickers = if request.tickers.is_empty() {
        table.assets.clone()
    } else {
        request.tickers.clone()
    };

    let selected = table.select(&tickers)?.between(request.start, request.end);
    let returns = selected.to_returns()?;
    let settings = &request.settings;

    info!(
        "=== FinanSmart Portfolio Analysis ===\n  Assets: {:?}\n  Periods: {}\n  Trials: {}\n  Sampling: {:?}",
        returns.assets(),
        returns.len(),
        settings.trials,
        settings.sampling
    );

    let stats = compute_asset_statistics(&returns, settings.periods_per_year)?;
    let asset_summaries = statistics::asset_summaries(&stats);
    for s in &asset_summaries {
        info!(
            "  {}: E[r]={:.4}, σ={:.4}, Sharpe={:.2}",
            s.asset, s.annual_return, s.annual_volatility, s.sharpe_ratio
        );
    }

    let equal_weight = equal_weight_portfolio(&stats)?;

    let seed = settings.seed.unwrap_or_else(rand::random::<u64>);
    if settings.seed.is_none() {
        info!("No seed supplied; drew seed {} (pass it back to reproduce this run)", seed);
    }

    let simulation = if request.parallel {
        portfolio::run_simulation_parallel(
            &returns,
            settings.trials,
            settings.periods_per_year,
            seed,
            settings.sampling,
        )?
    } else {
        let mut rng = StdRng::seed_from_u64(seed);
        portfolio::run_simulation_with(
            &returns,
            settings.trials,
            settings.periods_per_year,
            settings.sampling,
            &mut rng,
        )?
    };

    info!(
        "Best portfolio #{}: E[r]={:.4}, σ={:.4}, Sharpe={:.3}",
        simulation.best_index,
        simulation.best.expected_return,
        simulation.best.risk,
        simulation.best.sharpe_ratio
    );

    Ok(AnalysisReport {
        assets: returns.assets().to_vec(),
        periods: returns.len(),
        first_date: returns.dates().and_then(|d| d.first().copied()),
        last_date: returns.dates().and_then(|d| d.last().copied()),
        periods_per_year: settings.periods_per_year,
        trials: simulation.len(),
        seed,
        sampling: settings.sampling,
        correlation: statistics::correlation_matrix(&stats),
        descriptions: statistics::describe(&returns),
        statistics: stats,
        asset_summaries,
        equal_weight,
        simulation,
    })
}

/// Pretty-prints the report to stdout.
pub fn print_report(report: &AnalysisReport) {
    let span = match (report.first_date, report.last_date) {
        (Some(a), Some(b)) => format!("{} → {}", a, b),
        _ => "n/a".to_string(),
    };

    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║           FinanSmart Portfolio Analysis                    ║");
    println!("╠════════════════════════════════════════════════════════════╣");
    println!("║  Period        : {:<42}║", span);
    println!("║  Observations  : {:<42}║", report.periods);
    println!("║  Simulations   : {:<42}║", report.trials);
    println!("║  Seed          : {:<42}║", report.seed);
    println!("╠════════════════════════════════════════════════════════════╣");
    println!("║  Symbol    Ann.Return   Ann.Vol    Sharpe                  ║");
    println!("╠════════════════════════════════════════════════════════════╣");
    for s in &report.asset_summaries {
        println!(
            "║  {:<8} {:>+9.2}%  {:>8.2}%  {:>8.2}                  ║",
            s.asset,
            s.annual_return * 100.0,
            s.annual_volatility * 100.0,
            s.sharpe_ratio
        );
    }

    println!("╠════════════════════════════════════════════════════════════╣");
    println!("║  Correlation                                               ║");
    for (asset, row) in report.assets.iter().zip(report.correlation.iter()) {
        let cells = row
            .iter()
            .map(|c| format!("{:>6.2}", c))
            .collect::<Vec<_>>()
            .join(" ");
        println!("║    {:<8} {}", asset, cells);
    }

    println!("╠════════════════════════════════════════════════════════════╣");
    print_sample("Equal Weights", &report.equal_weight, &report.assets);
    println!("╠════════════════════════════════════════════════════════════╣");
    print_sample("Optimal (Max Sharpe)", &report.simulation.best, &report.assets);
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();
    println!("⚠  Educational use only. Not financial advice.");
}

fn print_sample(title: &str, sample: &PortfolioSample, assets: &[String]) {
    println!("║  {:<58}║", title);
    println!(
        "║    Expected Return : {:>+7.2}%                              ║",
        sample.expected_return * 100.0
    );
    println!(
        "║    Risk (Vol)      : {:>7.2}%                              ║",
        sample.risk * 100.0
    );
    println!(
        "║    Sharpe Ratio    : {:>7.2}                               ║",
        sample.sharpe_ratio
    );

    let mut weights: Vec<(&String, f64)> = assets
        .iter()
        .zip(sample.weights.as_slice().iter().copied())
        .collect();
    weights.sort_by(|a, b| b.1.total_cmp(&a.1));
    for (asset, w) in weights {
        println!("║      {:<8} {:>7.2}%                                   ║", asset, w * 100.0);
    }
}
