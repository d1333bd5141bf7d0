// src/export/mod.rs

pub mod csv;
pub mod parquet;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

use crate::extract::ResultSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Parquet,
}

impl OutputFormat {
    /// Guess from the file extension; anything unrecognised is CSV.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("parquet") => OutputFormat::Parquet,
            _ => OutputFormat::Csv,
        }
    }
}

/// Where and how a result set is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub path: PathBuf,
    pub format: OutputFormat,
    /// Field delimiter for CSV output.
    pub delimiter: u8,
    /// Prefix CSV output with a UTF-8 byte-order mark for spreadsheet tools.
    pub bom: bool,
}

impl OutputTarget {
    pub fn csv(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            format: OutputFormat::Csv,
            delimiter: b',',
            bom: true,
        }
    }
}

/// Serialise `results` to `target`, atomically: the artifact is written to a
/// hidden temp file beside the destination and renamed over it.
#[instrument(level = "debug", skip(results), fields(rows = results.len()))]
pub fn write_result_set(results: &ResultSet, target: &OutputTarget) -> Result<()> {
    let path = &target.path;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).with_context(|| format!("creating {:?}", dir))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("output path {:?} has no file name", path))?;
    let tmp_path = dir.join(format!(".{}.tmp", file_name));

    let file = File::create(&tmp_path).with_context(|| format!("creating {:?}", tmp_path))?;
    let written = match target.format {
        OutputFormat::Csv => {
            csv::write_csv(results, BufWriter::new(file), target.delimiter, target.bom)
        }
        OutputFormat::Parquet => parquet::write_parquet(results, file),
    };
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    fs::rename(&tmp_path, path)
        .with_context(|| format!("renaming {:?} -> {:?}", tmp_path, path))?;
    debug!(path = %path.display(), "artifact written");
    Ok(())
}
