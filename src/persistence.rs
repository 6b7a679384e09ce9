//! Persistence of flat result arrays with a shape manifest.
//!
//! Arrays are written flattened in row-major order. The manifest is a
//! `key: value` text block whose `recover:` line holds the original tensor
//! shape, so a reader can reshape the flat data.

use crate::error::{Result, TrackerError};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Name of the shared log that collects every manifest in a folder.
pub const EXPERIMENT_LOG: &str = "ExperimentLog.txt";

/// Ordered `key: value` description of a persisted array.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    entries: Vec<(String, String)>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry; a repeated key replaces the earlier value.
    pub fn with(mut self, key: &str, value: impl fmt::Display) -> Self {
        let value = value.to_string();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
        self
    }

    /// Append a comma separated list.
    pub fn with_list<T: fmt::Display>(self, key: &str, values: &[T]) -> Self {
        let joined = values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.with(key, joined)
    }

    /// Record the tensor shape under `recover`.
    pub fn with_shape(self, shape: &[usize]) -> Self {
        self.with_list("recover", shape)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Shape recorded under `recover`, if present and well formed.
    pub fn shape(&self) -> Option<Vec<usize>> {
        self.get("recover")?
            .split(',')
            .map(|part| part.trim().parse::<usize>().ok())
            .collect()
    }

    /// Parse a block produced by the `Display` impl. Lines without a colon
    /// are ignored.
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        Self { entries }
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.entries {
            writeln!(f, "{}: {}", key, value)?;
        }
        Ok(())
    }
}

/// Destination for flat result arrays.
pub trait ResultSink {
    fn persist(&mut self, name: &str, data: &[f64], manifest: &Manifest) -> Result<()>;
}

/// Writes `id{n}_{name}_Experiment{k}.csv` files into a folder and appends
/// each manifest to the folder's experiment log.
#[derive(Debug, Clone)]
pub struct ExperimentLogSink {
    folder: PathBuf,
    experiment: u32,
}

impl ExperimentLogSink {
    /// Create the folder if needed.
    pub fn new(folder: impl AsRef<Path>, experiment: u32) -> Result<Self> {
        let folder = folder.as_ref().to_path_buf();
        fs::create_dir_all(&folder)?;
        Ok(Self { folder, experiment })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// One more than the largest id already used for `name` in this
    /// experiment, starting at 1.
    pub fn next_id(&self, name: &str) -> Result<u32> {
        let suffix = format!("_{}_Experiment{}.csv", name, self.experiment);
        let mut latest = 0;

        for entry in fs::read_dir(&self.folder)? {
            let file_name = entry?.file_name();
            let file_name = file_name.to_string_lossy();
            let id = file_name
                .strip_prefix("id")
                .and_then(|rest| rest.strip_suffix(suffix.as_str()))
                .and_then(|digits| digits.parse::<u32>().ok());
            if let Some(id) = id {
                latest = latest.max(id);
            }
        }

        Ok(latest + 1)
    }

    /// Path of the data file for `name` with the given id.
    pub fn data_path(&self, id: u32, name: &str) -> PathBuf {
        self.folder
            .join(format!("id{}_{}_Experiment{}.csv", id, name, self.experiment))
    }

    /// Read back a flat array written by this sink.
    pub fn read_array(path: impl AsRef<Path>) -> Result<Vec<f64>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path.as_ref())?;

        let mut values = Vec::new();
        for record in reader.records() {
            let record = record?;
            for field in record.iter() {
                let value = field.trim().parse::<f64>().map_err(|e| {
                    TrackerError::DataError(format!("invalid value '{}': {}", field, e))
                })?;
                values.push(value);
            }
        }
        Ok(values)
    }
}

impl ResultSink for ExperimentLogSink {
    fn persist(&mut self, name: &str, data: &[f64], manifest: &Manifest) -> Result<()> {
        let id = self.next_id(name)?;
        let path = self.data_path(id, name);

        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);
        for value in data {
            writeln!(writer, "{:.18e}", value)?;
        }
        writer.flush()?;

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.folder.join(EXPERIMENT_LOG))?;
        let mut log = BufWriter::new(log);
        write!(
            log,
            "------- (id, experiment): ({}, {}) ------- \nfileName: {}\n{}\n",
            id, self.experiment, name, manifest
        )?;
        log.flush()?;

        info!("Persisted {} values to {}", data.len(), path.display());
        Ok(())
    }
}

/// A persisted array held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedArray {
    pub name: String,
    pub data: Vec<f64>,
    pub manifest: Manifest,
}

/// Sink that keeps everything in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub arrays: Vec<PersistedArray>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&PersistedArray> {
        self.arrays.iter().find(|a| a.name == name)
    }
}

impl ResultSink for MemorySink {
    fn persist(&mut self, name: &str, data: &[f64], manifest: &Manifest) -> Result<()> {
        self.arrays.push(PersistedArray {
            name: name.to_string(),
            data: data.to_vec(),
            manifest: manifest.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_manifest_render_and_parse() {
        let manifest = Manifest::new()
            .with("nSimulations", 10)
            .with_list("trainingSizes", &[63, 252])
            .with_shape(&[2, 2, 10]);

        let text = manifest.to_string();
        assert!(text.contains("trainingSizes: 63,252\n"));
        assert!(text.ends_with("recover: 2,2,10\n"));

        let parsed = Manifest::parse(&text);
        assert_eq!(parsed.shape(), Some(vec![2, 2, 10]));
        assert_eq!(parsed.get("nSimulations"), Some("10"));
    }

    #[test]
    fn test_log_sink_ids_increment() {
        let dir = TempDir::new().unwrap();
        let mut sink = ExperimentLogSink::new(dir.path(), 2).unwrap();
        let manifest = Manifest::new().with_shape(&[3]);

        sink.persist("TrackingDRO_J", &[1.0, 2.5, -3.0], &manifest).unwrap();
        sink.persist("TrackingDRO_J", &[4.0, 5.0, 6.0], &manifest).unwrap();
        sink.persist("TrackingDRO_epsOpt", &[0.1], &Manifest::new()).unwrap();

        assert_eq!(sink.next_id("TrackingDRO_J").unwrap(), 3);
        assert_eq!(sink.next_id("TrackingDRO_epsOpt").unwrap(), 2);

        let values = ExperimentLogSink::read_array(sink.data_path(1, "TrackingDRO_J")).unwrap();
        assert_eq!(values, vec![1.0, 2.5, -3.0]);

        let log = fs::read_to_string(dir.path().join(EXPERIMENT_LOG)).unwrap();
        assert!(log.contains("(id, experiment): (2, 2)"));
        assert!(log.contains("fileName: TrackingDRO_epsOpt"));
    }

    #[test]
    fn test_memory_sink() {
        let mut sink = MemorySink::new();
        sink.persist("a", &[1.0], &Manifest::new().with_shape(&[1])).unwrap();
        assert_eq!(sink.get("a").unwrap().data, vec![1.0]);
        assert!(sink.get("b").is_none());
    }
}
