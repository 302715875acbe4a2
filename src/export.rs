use crate::analysis::AnalysisReport;
use crate::portfolio::SimulationResult;
use anyhow::Result;
use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Writes `risk,return,sharpe`, one row per sample in generation order.
pub fn write_samples_csv<W: Write>(writer: W, result: &SimulationResult) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(["risk", "return", "sharpe"])?;
    for sample in &result.samples {
        writer.write_record(&[
            sample.risk.to_string(),
            sample.expected_return.to_string(),
            sample.sharpe_ratio.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn samples_csv_string(result: &SimulationResult) -> Result<String> {
    let mut buf = Vec::new();
    write_samples_csv(&mut buf, result)?;
    Ok(String::from_utf8(buf)?)
}

pub fn export_samples_csv<P: AsRef<Path>>(path: P, result: &SimulationResult) -> Result<()> {
    let path = path.as_ref();
    let file = std::fs::File::create(path)?;
    write_samples_csv(std::io::BufWriter::new(file), result)?;
    info!("Wrote {} samples to {}", result.len(), path.display());
    Ok(())
}

/// Saves the whole report as pretty JSON under `log/`.
pub fn persist_run_log(report: &AnalysisReport) -> Result<PathBuf> {
    persist_run_log_in(Path::new("log"), report)
}

pub fn persist_run_log_in(log_dir: &Path, report: &AnalysisReport) -> Result<PathBuf> {
    if !log_dir.exists() {
        std::fs::create_dir_all(log_dir)?;
    }

    let file_name = format!(
        "simulation_{}_{}.json",
        Utc::now().format("%Y%m%d_%H%M%S"),
        report.seed
    );
    let file_path = log_dir.join(file_name);

    let file = std::fs::File::create(&file_path)?;
    let writer = std::io::BufWriter::new(file);
    serde_json::to_writer_pretty(writer, report)?;

    Ok(file_path)
}
