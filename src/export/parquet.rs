// src/export/parquet.rs

use anyhow::{bail, Context, Result};
use arrow::array::{ArrayRef, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use ::parquet::arrow::ArrowWriter;
use ::parquet::basic::Compression;
use ::parquet::file::properties::WriterProperties;
use std::{fs::File, sync::Arc};

use crate::extract::{ResultSet, Value};

/// Arrow schema for `results`: Int64 for numeric fields, Utf8 otherwise.
pub fn build_schema(results: &ResultSet) -> Schema {
    Schema::new(
        results
            .columns
            .iter()
            .map(|c| {
                let ty = if results.is_numeric(c) {
                    DataType::Int64
                } else {
                    DataType::Utf8
                };
                Field::new(c, ty, false)
            })
            .collect::<Vec<_>>(),
    )
}

fn column_array(results: &ResultSet, idx: usize) -> Result<ArrayRef> {
    let name = &results.columns[idx];
    let cells = results.records.iter().enumerate().map(|(row, r)| {
        r.values()
            .nth(idx)
            .with_context(|| format!("row {} has no column `{}`", row, name))
    });

    if results.is_numeric(name) {
        let mut out = Vec::with_capacity(results.len());
        for cell in cells {
            match cell? {
                Value::Integer(n) => out.push(*n),
                Value::Text(t) => bail!("column `{}` holds non-integer {:?}", name, t),
            }
        }
        Ok(Arc::new(Int64Array::from(out)))
    } else {
        let out = cells
            .map(|c| c.map(|v| v.to_string()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Arc::new(StringArray::from(out)))
    }
}

/// Write `results` as a single-batch, Snappy-compressed Parquet file.
pub fn write_parquet(results: &ResultSet, file: File) -> Result<()> {
    let schema = Arc::new(build_schema(results));
    let arrays = (0..results.columns.len())
        .map(|i| column_array(results, i))
        .collect::<Result<Vec<_>>>()?;

    let batch = RecordBatch::try_new(schema.clone(), arrays).context("building record batch")?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer =
        ArrowWriter::try_new(file, schema, Some(props)).context("creating Arrow writer")?;
    writer.write(&batch).context("writing batch")?;
    writer.close().context("closing Parquet writer")?;
    Ok(())
}
