// src/export/csv.rs

use anyhow::{Context, Result};
use std::io::Write;

use crate::extract::ResultSet;

pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Header row of `results.columns`, then one row per record.
pub fn write_csv<W: Write>(results: &ResultSet, mut out: W, delimiter: u8, bom: bool) -> Result<()> {
    if bom {
        out.write_all(UTF8_BOM).context("writing byte-order mark")?;
    }
    let mut writer = ::csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(out);

    writer
        .write_record(&results.columns)
        .context("writing header")?;
    for (idx, record) in results.records.iter().enumerate() {
        writer
            .write_record(record.values().map(|v| v.to_string()))
            .with_context(|| format!("writing row {}", idx))?;
    }
    writer.flush().context("flushing csv")?;
    Ok(())
}
