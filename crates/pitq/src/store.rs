//! Dataset persistence and input loading.
//!
//! Derived datasets are written as Parquet files, each with a JSON metadata
//! sidecar recording generation time, shape, and input provenance (paths,
//! sizes, modification times, optional SHA-256). The sidecar is pure audit
//! trail; nothing reads it back for computation.
//!
//! Inputs arrive as JSON-lines files (one record per line) for observations
//! and prices, and a JSON object for fiscal calendars.

use crate::calendar::{CalendarResolver, FiscalCalendar};
use crate::error::{PitError, Result};
use crate::types::{PriceBar, RawObservation};
use chrono::{DateTime, SecondsFormat, Utc};
use polars::prelude::*;
use serde::de::DeserializeOwned;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

/// Writes derived datasets with provenance sidecars.
#[derive(Debug)]
pub struct DatasetWriter {
    out_dir: PathBuf,
    compute_sha256: bool,
}

impl DatasetWriter {
    /// Writer targeting `out_dir`, without input checksums.
    #[must_use]
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            compute_sha256: false,
        }
    }

    /// Enable SHA-256 checksums of input files in the sidecar.
    #[must_use]
    pub const fn with_checksums(mut self, enabled: bool) -> Self {
        self.compute_sha256 = enabled;
        self
    }

    /// Write `frame` as `<name>.parquet` plus `<name>.parquet.meta.json`.
    pub fn write(&self, name: &str, frame: &mut DataFrame, inputs: &[PathBuf]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.out_dir)?;
        let out_path = self.out_dir.join(format!("{name}.parquet"));

        let file = File::create(&out_path)?;
        ParquetWriter::new(file).finish(frame)?;

        let columns: Vec<String> = frame
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        let inputs_info: Vec<serde_json::Value> = inputs
            .iter()
            .map(|path| self.input_info(path))
            .collect::<Result<_>>()?;

        let meta = json!({
            "generated_at_utc": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            "output": out_path.to_string_lossy(),
            "nrows": frame.height(),
            "ncols": frame.width(),
            "columns": columns,
            "inputs": inputs_info,
        });

        let meta_path = self.out_dir.join(format!("{name}.parquet.meta.json"));
        std::fs::write(&meta_path, serde_json::to_string_pretty(&meta)?)?;
        Ok(out_path)
    }

    fn input_info(&self, path: &Path) -> Result<serde_json::Value> {
        let metadata = std::fs::metadata(path)?;
        let mtime: DateTime<Utc> = metadata.modified()?.into();
        let sha256 = if self.compute_sha256 {
            Some(sha256_file(path)?)
        } else {
            None
        };
        Ok(json!({
            "path": path.to_string_lossy(),
            "size": metadata.len(),
            "mtime_utc": mtime.to_rfc3339_opts(SecondsFormat::Secs, true),
            "sha256": sha256,
        }))
    }
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Read raw observations from a JSON-lines file.
pub fn read_observations(path: &Path) -> Result<Vec<RawObservation>> {
    read_jsonl(path)
}

/// Read daily price bars from a JSON-lines file.
pub fn read_prices(path: &Path) -> Result<Vec<PriceBar>> {
    read_jsonl(path)
}

/// Read the entity → fiscal-year-end map from a JSON object file.
pub fn read_calendars(path: &Path) -> Result<CalendarResolver> {
    let file = File::open(path)?;
    let map: HashMap<String, FiscalCalendar> = serde_json::from_reader(BufReader::new(file))?;
    Ok(CalendarResolver::from_map(map))
}

fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path)?;
    let mut out = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record =
            serde_json::from_str(&line).map_err(|source| PitError::InvalidRecord {
                line: idx + 1,
                source,
            })?;
        out.push(record);
    }
    Ok(out)
}
