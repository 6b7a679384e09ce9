//! Data sources for benchmark and constituent returns.
//!
//! A [`ReturnSource`] hands out aligned, gap-free return panels for a date
//! range. [`CsvPriceSource`] reads a wide price file laid out as
//!
//! ```text
//! Dates,Index,AAA,BBB,...
//! 2020-01-02,3257.85,74.33,1898.01,...
//! ```
//!
//! and converts prices to simple returns.

use crate::error::{Result, TrackerError};
use crate::types::ReturnPanel;
use chrono::NaiveDate;
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Sampling frequency of returned observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Daily,
    /// Daily returns compounded per ISO week.
    Weekly,
}

/// Anything that can produce a return panel for a date range.
pub trait ReturnSource {
    /// Observations dated within `[start, end]`, pre-aligned and free of
    /// missing values.
    fn get_returns(&self, start: NaiveDate, end: NaiveDate, frequency: Frequency)
        -> Result<ReturnPanel>;
}

impl ReturnSource for ReturnPanel {
    fn get_returns(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        frequency: Frequency,
    ) -> Result<ReturnPanel> {
        let panel = self.between(start, end);
        Ok(match frequency {
            Frequency::Daily => panel,
            Frequency::Weekly => panel.to_weekly(),
        })
    }
}

/// Settings for reading a wide price file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvPriceConfig {
    /// Name of the date column.
    pub date_column: String,
    /// Name of the benchmark price column.
    pub index_column: String,
    /// Explicit date format, tried before the built-in ones.
    pub date_format: Option<String>,
    pub delimiter: u8,
}

impl Default for CsvPriceConfig {
    fn default() -> Self {
        Self {
            date_column: "Dates".to_string(),
            index_column: "Index".to_string(),
            date_format: None,
            delimiter: b',',
        }
    }
}

/// Price table held in memory after loading.
#[derive(Debug, Clone)]
struct PriceTable {
    dates: Vec<NaiveDate>,
    index: Vec<Option<f64>>,
    tickers: Vec<String>,
    /// `prices[column][row]`.
    prices: Vec<Vec<Option<f64>>>,
}

/// Return source backed by a wide CSV of prices.
#[derive(Debug, Clone)]
pub struct CsvPriceSource {
    path: PathBuf,
    table: PriceTable,
}

impl CsvPriceSource {
    /// Load with default column names.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, &CsvPriceConfig::default())
    }

    /// Load the whole file into memory.
    pub fn open_with(path: impl AsRef<Path>, config: &CsvPriceConfig) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading prices from: {}", path.display());

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .delimiter(config.delimiter)
            .from_path(path)?;

        let headers = reader.headers()?.clone();
        let find = |name: &str| {
            headers.iter().position(|h| h.trim() == name).ok_or_else(|| {
                TrackerError::DataError(format!("column '{}' not found in {}", name, path.display()))
            })
        };
        let date_idx = find(&config.date_column)?;
        let index_idx = find(&config.index_column)?;
        let ticker_cols: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != date_idx && *i != index_idx)
            .map(|(i, h)| (i, h.trim().to_string()))
            .collect();

        let mut rows: Vec<(NaiveDate, Option<f64>, Vec<Option<f64>>)> = Vec::new();
        for record in reader.records() {
            let record = record?;
            let raw_date = record.get(date_idx).unwrap_or_default();
            let date = parse_date(raw_date, config.date_format.as_deref())?;
            let index = record.get(index_idx).and_then(parse_price);
            let prices = ticker_cols
                .iter()
                .map(|(i, _)| record.get(*i).and_then(parse_price))
                .collect();
            rows.push((date, index, prices));
        }

        rows.sort_by_key(|(date, _, _)| *date);
        if let Some(pair) = rows.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(TrackerError::DataAlignment(format!(
                "duplicate date {} in {}",
                pair[0].0,
                path.display()
            )));
        }

        let mut prices = vec![Vec::with_capacity(rows.len()); ticker_cols.len()];
        let mut dates = Vec::with_capacity(rows.len());
        let mut index = Vec::with_capacity(rows.len());
        for (date, idx, row) in rows {
            dates.push(date);
            index.push(idx);
            for (column, value) in prices.iter_mut().zip(row) {
                column.push(value);
            }
        }

        debug!("Loaded {} rows and {} tickers", dates.len(), ticker_cols.len());

        Ok(Self {
            path: path.to_path_buf(),
            table: PriceTable {
                dates,
                index,
                tickers: ticker_cols.into_iter().map(|(_, name)| name).collect(),
                prices,
            },
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All tickers in the file, before any filtering.
    pub fn tickers(&self) -> &[String] {
        &self.table.tickers
    }

    /// Full date range of the file.
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((*self.table.dates.first()?, *self.table.dates.last()?))
    }
}

impl ReturnSource for CsvPriceSource {
    fn get_returns(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        frequency: Frequency,
    ) -> Result<ReturnPanel> {
        let table = &self.table;
        let from = table.dates.partition_point(|d| *d < start);
        let to = table.dates.partition_point(|d| *d <= end).max(from);
        if to - from < 2 {
            return Err(TrackerError::DataError(format!(
                "fewer than two prices between {} and {}",
                start, end
            )));
        }

        let index: Vec<f64> = table.index[from..to]
            .iter()
            .zip(&table.dates[from..to])
            .map(|(price, date)| {
                price.ok_or_else(|| {
                    TrackerError::DataAlignment(format!("missing benchmark price on {}", date))
                })
            })
            .collect::<Result<_>>()?;

        let mut tickers = Vec::new();
        let mut columns = Vec::new();
        for (name, column) in table.tickers.iter().zip(&table.prices) {
            let window = &column[from..to];
            if window.iter().all(|p| matches!(p, Some(v) if *v > 0.0)) {
                tickers.push(name.clone());
                columns.push(window.iter().flatten().copied().collect::<Vec<f64>>());
            } else {
                warn!("Dropping {}: missing prices in requested range", name);
            }
        }

        if tickers.is_empty() {
            return Err(TrackerError::DataError(format!(
                "no ticker has complete prices between {} and {}",
                start, end
            )));
        }

        let benchmark = simple_returns(&index);
        let n = benchmark.len();
        let asset_returns: Vec<Vec<f64>> = columns.iter().map(|c| simple_returns(c)).collect();
        let assets = (0..n)
            .map(|t| asset_returns.iter().map(|col| col[t]).collect())
            .collect();

        let panel = ReturnPanel::new(table.dates[from + 1..to].to_vec(), benchmark, assets, tickers)?;
        info!(
            "Prepared {} {:?} observations for {} assets",
            panel.len(),
            frequency,
            panel.n_assets()
        );

        Ok(match frequency {
            Frequency::Daily => panel,
            Frequency::Weekly => panel.to_weekly(),
        })
    }
}

/// `p[t] / p[t-1] - 1`.
pub fn simple_returns(prices: &[f64]) -> Vec<f64> {
    prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

fn parse_price(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a date, trying an explicit format first and then common ones.
fn parse_date(raw: &str, format: Option<&str>) -> Result<NaiveDate> {
    let raw = raw.trim();
    if let Some(fmt) = format {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return Ok(d);
        }
    }

    let formats = ["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y", "%m/%d/%Y", "%Y%m%d"];
    for fmt in &formats {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return Ok(d);
        }
    }

    // timestamps such as "2020-01-02 00:00:00"
    if let Some((date, _)) = raw.split_once(' ') {
        if let Ok(d) = NaiveDate::parse_from_str(date, "%Y-%m-%d") {
            return Ok(d);
        }
    }

    Err(TrackerError::DataError(format!("Could not parse date: '{}'", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn write_prices(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_prices_to_returns() {
        let file = write_prices(
            "Dates,Index,AAA,BBB\n\
             2024-01-02,100,10,20\n\
             2024-01-03,101,11,20\n\
             2024-01-04,99.99,11,21\n",
        );
        let source = CsvPriceSource::open(file.path()).unwrap();
        let panel = source
            .get_returns(date(2024, 1, 1), date(2024, 1, 31), Frequency::Daily)
            .unwrap();

        assert_eq!(panel.len(), 2);
        assert_eq!(panel.dates()[0], date(2024, 1, 3));
        assert!((panel.benchmark()[0] - 0.01).abs() < 1e-12);
        assert!((panel.assets()[0][0] - 0.1).abs() < 1e-12);
        assert!((panel.assets()[1][1] - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_incomplete_tickers_dropped() {
        let file = write_prices(
            "Dates,Index,AAA,BBB\n\
             2024-01-02,100,10,\n\
             2024-01-03,101,11,20\n\
             2024-01-04,102,12,21\n",
        );
        let source = CsvPriceSource::open(file.path()).unwrap();

        let full = source
            .get_returns(date(2024, 1, 1), date(2024, 1, 31), Frequency::Daily)
            .unwrap();
        assert_eq!(full.tickers(), &["AAA".to_string()]);

        // BBB is complete once the first day is excluded
        let later = source
            .get_returns(date(2024, 1, 3), date(2024, 1, 31), Frequency::Daily)
            .unwrap();
        assert_eq!(later.n_assets(), 2);
    }

    #[test]
    fn test_missing_benchmark_is_alignment_error() {
        let file = write_prices(
            "Dates,Index,AAA\n\
             2024-01-02,100,10\n\
             2024-01-03,,11\n",
        );
        let source = CsvPriceSource::open(file.path()).unwrap();
        let result = source.get_returns(date(2024, 1, 1), date(2024, 1, 31), Frequency::Daily);
        assert!(matches!(result, Err(TrackerError::DataAlignment(_))));
    }

    #[test]
    fn test_unsorted_rows_and_date_formats() {
        let file = write_prices(
            "Dates,Index,AAA\n\
             01/04/2024,102,12\n\
             01/02/2024,100,10\n\
             01/03/2024,101,11\n",
        );
        let config = CsvPriceConfig {
            date_format: Some("%m/%d/%Y".to_string()),
            ..Default::default()
        };
        let source = CsvPriceSource::open_with(file.path(), &config).unwrap();
        assert_eq!(source.date_range(), Some((date(2024, 1, 2), date(2024, 1, 4))));
    }

    #[test]
    fn test_panel_source_weekly() {
        let panel = ReturnPanel::from_returns(vec![0.01; 10], vec![vec![0.0]; 10]).unwrap();
        let weekly = panel
            .get_returns(date(2000, 1, 1), date(2000, 12, 31), Frequency::Weekly)
            .unwrap();
        assert_eq!(weekly.len(), 2);
    }
}
