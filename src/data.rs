use crate::error::{SimResult, SimulationError};
use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Per-period fractional returns, one column per asset, one row per time step.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReturnSeries {
    assets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dates: Option<Vec<NaiveDate>>,
    rows: Vec<Vec<f64>>,
}

impl ReturnSeries {
    /// Builds a return matrix, rejecting duplicate assets, ragged rows and non-finite values.
    pub fn new(assets: Vec<String>, rows: Vec<Vec<f64>>) -> SimResult<Self> {
        let mut seen = HashSet::new();
        for asset in &assets {
            if !seen.insert(asset.as_str()) {
                return Err(SimulationError::invalid_argument(format!(
                    "duplicate asset identifier '{}'",
                    asset
                )));
            }
        }

        for (t, row) in rows.iter().enumerate() {
            if row.len() != assets.len() {
                return Err(SimulationError::invalid_argument(format!(
                    "row {} has {} values, expected {}",
                    t,
                    row.len(),
                    assets.len()
                )));
            }
            if let Some(col) = row.iter().position(|v| !v.is_finite()) {
                return Err(SimulationError::invalid_argument(format!(
                    "non-finite return at row {} for '{}'",
                    t, assets[col]
                )));
            }
        }

        Ok(Self {
            assets,
            dates: None,
            rows,
        })
    }

    /// Attaches the observation date of each row.
    pub fn with_dates(mut self, dates: Vec<NaiveDate>) -> SimResult<Self> {
        if dates.len() != self.rows.len() {
            return Err(SimulationError::invalid_argument(format!(
                "{} dates supplied for {} rows",
                dates.len(),
                self.rows.len()
            )));
        }
        self.dates = Some(dates);
        Ok(self)
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn dates(&self) -> Option<&[NaiveDate]> {
        self.dates.as_deref()
    }

    pub fn column(&self, asset: usize) -> Vec<f64> {
        self.rows.iter().map(|row| row[asset]).collect()
    }
}

/// Close prices by date, as exported from a market-data provider.
///
/// Missing observations are kept as `None` until returns are derived.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceTable {
    pub assets: Vec<String>,
    pub dates: Vec<NaiveDate>,
    pub rows: Vec<Vec<Option<f64>>>,
}

impl PriceTable {
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open price file {}", path.display()))?;
        let table = Self::from_reader(file)
            .with_context(|| format!("Failed to parse price file {}", path.display()))?;
        info!(
            "Loaded {} rows x {} tickers from {}",
            table.dates.len(),
            table.assets.len(),
            path.display()
        );
        Ok(table)
    }

    /// Parses `date,TICKER1,TICKER2,...` CSV. Empty and `NaN` cells are missing values.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        if headers.len() < 2 {
            return Err(anyhow!(
                "Price CSV needs a date column followed by at least one ticker column"
            ));
        }
        let assets: Vec<String> = headers.iter().skip(1).map(|h| h.to_uppercase()).collect();

        let mut records: Vec<(NaiveDate, Vec<Option<f64>>)> = Vec::new();
        for (line, result) in reader.records().enumerate() {
            let record = result?;
            let raw_date = record.get(0).unwrap_or_default();
            let date = NaiveDate::parse_from_str(raw_date, DATE_FORMAT)
                .map_err(|_| anyhow!("Invalid date '{}' on data row {}", raw_date, line + 1))?;

            let mut prices = Vec::with_capacity(assets.len());
            for (col, asset) in assets.iter().enumerate() {
                let cell = record.get(col + 1).unwrap_or_default();
                prices.push(parse_price(cell).ok_or_else(|| {
                    anyhow!("Invalid price '{}' for {} on {}", cell, asset, raw_date)
                })?);
            }
            records.push((date, prices));
        }

        if !records.windows(2).all(|w| w[0].0 <= w[1].0) {
            warn!("Price rows are not in chronological order; sorting by date");
            records.sort_by_key(|(date, _)| *date);
        }
        if let Some(pair) = records.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(anyhow!("Date {} appears more than once in the price table", pair[0].0));
        }

        let table = Self {
            assets,
            dates: records.iter().map(|(d, _)| *d).collect(),
            rows: records.into_iter().map(|(_, p)| p).collect(),
        };
        table.check_unique_assets()?;
        Ok(table)
    }

    fn check_unique_assets(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for asset in &self.assets {
            if !seen.insert(asset) {
                return Err(anyhow!("Ticker {} appears more than once in the price table", asset));
            }
        }
        Ok(())
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    /// Keeps only `tickers`, in the given order.
    pub fn select(&self, tickers: &[String]) -> Result<Self> {
        let indices = tickers
            .iter()
            .map(|ticker| {
                self.assets
                    .iter()
                    .position(|a| a.eq_ignore_ascii_case(ticker))
                    .ok_or_else(|| anyhow!("Ticker {} not found in price table", ticker))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            assets: indices.iter().map(|&i| self.assets[i].clone()).collect(),
            dates: self.dates.clone(),
            rows: self
                .rows
                .iter()
                .map(|row| indices.iter().map(|&i| row[i]).collect())
                .collect(),
        })
    }

    /// Keeps rows dated within `[start, end]`; either bound may be open.
    pub fn between(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        let keep = |d: &NaiveDate| start.is_none_or(|s| *d >= s) && end.is_none_or(|e| *d <= e);
        let (dates, rows) = self
            .dates
            .iter()
            .zip(self.rows.iter())
            .filter(|(d, _)| keep(d))
            .map(|(d, r)| (*d, r.clone()))
            .unzip();
        Self {
            assets: self.assets.clone(),
            dates,
            rows,
        }
    }

    /// Period-over-period percentage change, after dropping rows with any missing price.
    pub fn to_returns(&self) -> Result<ReturnSeries> {
        let complete: Vec<(NaiveDate, Vec<f64>)> = self
            .dates
            .iter()
            .zip(self.rows.iter())
            .filter_map(|(d, row)| {
                row.iter()
                    .copied()
                    .collect::<Option<Vec<f64>>>()
                    .map(|prices| (*d, prices))
            })
            .collect();

        let dropped = self.rows.len() - complete.len();
        if dropped > 0 {
            warn!("Dropped {} price rows with missing values", dropped);
        }

        let mut dates = Vec::with_capacity(complete.len().saturating_sub(1));
        let mut rows = Vec::with_capacity(complete.len().saturating_sub(1));
        for pair in complete.windows(2) {
            let (_, prev) = &pair[0];
            let (date, curr) = &pair[1];
            let mut row = Vec::with_capacity(curr.len());
            for (col, (p0, p1)) in prev.iter().zip(curr.iter()).enumerate() {
                if *p0 <= 0.0 {
                    return Err(anyhow!(
                        "Non-positive price {} for {} before {}",
                        p0,
                        self.assets[col],
                        date
                    ));
                }
                row.push(p1 / p0 - 1.0);
            }
            dates.push(*date);
            rows.push(row);
        }

        let series = ReturnSeries::new(self.assets.clone(), rows)?.with_dates(dates)?;
        Ok(series)
    }
}

fn parse_price(cell: &str) -> Option<Option<f64>> {
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") || cell.eq_ignore_ascii_case("null") {
        return Some(None);
    }
    match cell.parse::<f64>() {
        Ok(v) if v.is_finite() => Some(Some(v)),
        _ => None,
    }
}

/// Normalizes a comma-separated ticker list: trimmed, uppercased, de-duplicated.
pub fn parse_tickers(input: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    input
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

pub fn parse_date(input: &str) -> Result<NaiveDate> {
    let trimmed = input.trim();
    NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
        .map_err(|_| anyhow!("Invalid date '{}', use YYYY-MM-DD", trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PRICES: &str = "\
date,aapl,msft,nvda
2023-01-03,100.0,200.0,50.0
2023-01-04,110.0,190.0,
2023-01-05,121.0,209.0,55.0
2023-01-06,108.9,209.0,60.5
";

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn test_return_series_rejects_bad_shapes() {
        let dup = ReturnSeries::new(vec!["A".into(), "A".into()], vec![]);
        assert!(matches!(dup, Err(SimulationError::InvalidArgument(_))));

        let ragged = ReturnSeries::new(vec!["A".into(), "B".into()], vec![vec![0.1]]);
        assert!(matches!(ragged, Err(SimulationError::InvalidArgument(_))));

        let nan = ReturnSeries::new(vec!["A".into()], vec![vec![f64::NAN]]);
        assert!(matches!(nan, Err(SimulationError::InvalidArgument(_))));
    }

    #[test]
    fn test_parse_price_table() {
        let table = PriceTable::from_reader(PRICES.as_bytes()).unwrap();
        assert_eq!(table.assets, vec!["AAPL", "MSFT", "NVDA"]);
        assert_eq!(table.dates.len(), 4);
        assert_eq!(table.rows[1][2], None);
        assert_eq!(table.first_date(), Some(d("2023-01-03")));
        assert_eq!(table.last_date(), Some(d("2023-01-06")));
    }

    #[test]
    fn test_unsorted_rows_are_sorted() {
        let csv = "date,A\n2023-01-05,3\n2023-01-03,1\n2023-01-04,2\n";
        let table = PriceTable::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(table.dates, vec![d("2023-01-03"), d("2023-01-04"), d("2023-01-05")]);
        assert_eq!(table.rows[0][0], Some(1.0));
    }

    #[test]
    fn test_duplicate_dates_rejected() {
        let csv = "date,A\n2023-01-03,100\n2023-01-03,110\n2023-01-04,121\n";
        let err = PriceTable::from_reader(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("2023-01-03"));

        let unsorted = "date,A\n2023-01-04,121\n2023-01-03,100\n2023-01-04,110\n";
        let err = PriceTable::from_reader(unsorted.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("2023-01-04"));
    }

    #[test]
    fn test_invalid_cells_are_reported() {
        let bad_date = "date,A\n03/01/2023,1\n";
        assert!(PriceTable::from_reader(bad_date.as_bytes()).is_err());

        let bad_price = "date,A\n2023-01-03,abc\n";
        let err = PriceTable::from_reader(bad_price.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_returns_drop_incomplete_rows() {
        let table = PriceTable::from_reader(PRICES.as_bytes()).unwrap();
        let returns = table.to_returns().unwrap();

        // Row 2023-01-04 is dropped, so the first return spans 01-03 -> 01-05.
        assert_eq!(returns.len(), 2);
        assert_eq!(returns.dates().unwrap(), &[d("2023-01-05"), d("2023-01-06")]);
        let first = &returns.rows()[0];
        assert!((first[0] - 0.21).abs() < 1e-12);
        assert!((first[1] - 0.045).abs() < 1e-12);
        assert!((first[2] - 0.10).abs() < 1e-12);
        let second = &returns.rows()[1];
        assert!((second[0] + 0.1).abs() < 1e-12);
        assert_eq!(second[1], 0.0);
    }

    #[test]
    fn test_non_positive_price_rejected() {
        let csv = "date,A\n2023-01-03,0\n2023-01-04,1\n";
        let table = PriceTable::from_reader(csv.as_bytes()).unwrap();
        assert!(table.to_returns().is_err());
    }

    #[test]
    fn test_select_and_between() {
        let table = PriceTable::from_reader(PRICES.as_bytes()).unwrap();

        let subset = table.select(&["nvda".to_string(), "AAPL".to_string()]).unwrap();
        assert_eq!(subset.assets, vec!["NVDA", "AAPL"]);
        assert_eq!(subset.rows[0], vec![Some(50.0), Some(100.0)]);

        assert!(table.select(&["TSLA".to_string()]).is_err());

        let window = table.between(Some(d("2023-01-04")), Some(d("2023-01-05")));
        assert_eq!(window.dates, vec![d("2023-01-04"), d("2023-01-05")]);
        let open_start = table.between(None, Some(d("2023-01-03")));
        assert_eq!(open_start.dates.len(), 1);
    }

    #[test]
    fn test_parse_tickers() {
        assert_eq!(
            parse_tickers(" aapl, msft,,NVDA ,AAPL"),
            vec!["AAPL".to_string(), "MSFT".to_string(), "NVDA".to_string()]
        );
        assert!(parse_tickers(" , ").is_empty());
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PRICES.as_bytes()).unwrap();
        let table = PriceTable::from_csv_path(file.path()).unwrap();
        assert_eq!(table.assets.len(), 3);

        assert!(PriceTable::from_csv_path("does/not/exist.csv").is_err());
    }
}
