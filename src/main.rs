use clap::Parser;
use finansmart::analysis::{self, AnalysisRequest};
use finansmart::config::{self, SimulationSettings};
use finansmart::{PriceTable, SimulationError, WeightSampling, data, export, webui};
use std::io;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "FinanSmart: Monte Carlo portfolio simulation over historical prices",
    after_help = "EXAMPLES:
    # Simulate 10,000 portfolios over every ticker in the file
    cargo run --release -- --prices prices.csv

    # Pick tickers and a date range, reproducible with a seed, export CSV
    cargo run --release -- --prices prices.csv --tickers AAPL,MSFT,NVDA \\
        --start 2020-01-01 --end 2023-12-31 --seed 42 --output resultados_portafolio.csv

    # Serve the JSON API
    cargo run --release -- --prices prices.csv --webui"
)]
struct Args {
    /// CSV of close prices: a `date` column (YYYY-MM-DD) followed by one column per ticker
    #[arg(long)]
    prices: PathBuf,

    /// Comma-separated tickers to analyse (default: every column in the price file)
    #[arg(long)]
    tickers: Option<String>,

    /// First date to include (YYYY-MM-DD)
    #[arg(long)]
    start: Option<String>,

    /// Last date to include (YYYY-MM-DD)
    #[arg(long)]
    end: Option<String>,

    /// Number of random portfolios (1000-50000). Overrides FINANSMART_TRIALS.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1_000..=50_000))]
    trials: Option<u64>,

    /// Return periods per year used for annualization. Overrides FINANSMART_PERIODS_PER_YEAR.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    periods_per_year: Option<u32>,

    /// Seed for reproducible runs. Overrides FINANSMART_SEED.
    #[arg(long)]
    seed: Option<u64>,

    /// Weight sampling scheme. Overrides FINANSMART_SAMPLING.
    #[arg(long, value_enum)]
    sampling: Option<WeightSampling>,

    /// Spread trials across all CPU cores. Seeded output is reproducible but differs from a sequential run.
    #[arg(long)]
    parallel: bool,

    /// Write risk/return/sharpe of every simulated portfolio to this CSV file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Save the full report as JSON under log/
    #[arg(long)]
    save_log: bool,

    /// Launch the JSON web API instead of a one-shot run
    #[arg(long)]
    webui: bool,

    /// WebUI server port
    #[arg(long, default_value_t = config::DEFAULT_WEBUI_PORT)]
    webui_port: u16,
}

impl Args {
    fn settings(&self) -> SimulationSettings {
        let mut settings = SimulationSettings::from_env();
        if let Some(trials) = self.trials {
            settings.trials = trials as usize;
        }
        if let Some(ppy) = self.periods_per_year {
            settings.periods_per_year = ppy;
        }
        if self.seed.is_some() {
            settings.seed = self.seed;
        }
        if let Some(sampling) = self.sampling {
            settings.sampling = sampling;
        }
        settings
    }

    fn request(&self) -> anyhow::Result<AnalysisRequest> {
        Ok(AnalysisRequest {
            tickers: self
                .tickers
                .as_deref()
                .map(data::parse_tickers)
                .unwrap_or_default(),
            start: self.start.as_deref().map(data::parse_date).transpose()?,
            end: self.end.as_deref().map(data::parse_date).transpose()?,
            settings: self.settings(),
            parallel: self.parallel,
        })
    }
}

#[tokio::main]
async fn main() -> io::Result<()> {
    config::load_dotenv();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("finansmart=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    let args = Args::parse();

    config::init_cpu_parallelism();

    let prices = match PriceTable::from_csv_path(&args.prices) {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to load prices: {:#}", e);
            error!(
                "Expected a CSV like:\n  date,{}\n  2020-01-02,75.09,160.62,...",
                config::DEFAULT_TICKERS.join(",")
            );
            return Ok(());
        }
    };

    if args.webui {
        match webui::run_webui_server(args.webui_port, prices, args.settings()).await {
            Ok(_) => info!("WebUI exited."),
            Err(e) => error!("WebUI failed: {}", e),
        }
        return Ok(());
    }

    let request = match args.request() {
        Ok(r) => r,
        Err(e) => {
            error!("{}", e);
            return Ok(());
        }
    };

    let report = match analysis::run_analysis(&prices, &request) {
        Ok(r) => r,
        Err(e) => {
            error!("Analysis failed: {:#}", e);
            if let Some(sim_err) = e.downcast_ref::<SimulationError>() {
                error!("Hint: {}", sim_err.hint());
            } else {
                error!("Hint: verify the tickers are columns of the price file and the date range contains data.");
            }
            return Ok(());
        }
    };

    analysis::print_report(&report);

    if let Some(path) = &args.output {
        if let Err(e) = export::export_samples_csv(path, &report.simulation) {
            error!("Failed to write {}: {}", path.display(), e);
        }
    }

    if args.save_log {
        match export::persist_run_log(&report) {
            Ok(path) => info!("Run log saved to {}", path.display()),
            Err(e) => error!("Failed to save run log: {}", e),
        }
    }

    Ok(())
}
