// src/normalize/mod.rs

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use std::path::Path;
use tracing::{info, instrument};

use crate::export::{write_result_set, OutputTarget};
use crate::extract::{Record, ResultSet, Value};

/// Highest `MANUALnn` step column in the recipe feed.
pub const MAX_STEPS: usize = 20;

pub const STEP_COLUMNS: [&str; 4] = ["RCP_NO", "RCP_ORDER", "DESCRIPTION", "IMAGE_NO"];

struct StepColumns {
    seq: usize,
    /// (step number, description column, image column)
    steps: Vec<(i64, usize, Option<usize>)>,
}

impl StepColumns {
    fn locate(headers: &csv::StringRecord) -> Result<Self> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim_start_matches('\u{feff}') == name)
        };
        let seq = find("RCP_SEQ").context("input has no RCP_SEQ column")?;
        let steps = (1..=MAX_STEPS)
            .filter_map(|i| {
                let desc = find(&format!("MANUAL{:02}", i))?;
                Some((i as i64, desc, find(&format!("MANUAL_IMG{:02}", i))))
            })
            .collect();
        Ok(Self { seq, steps })
    }
}

/// Turn wide recipe rows into one row per step.
///
/// Steps with a blank description are dropped; descriptions are trimmed and
/// a missing image becomes an empty string.
pub fn normalize_steps_from<R: std::io::Read>(input: R, delimiter: u8) -> Result<ResultSet> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(input);
    let cols = StepColumns::locate(reader.headers().context("reading header")?)?;

    let mut out = ResultSet::new(
        STEP_COLUMNS.iter().map(|c| c.to_string()).collect(),
        vec!["RCP_ORDER".to_string()],
    );
    for (line, row) in reader.records().enumerate() {
        let row = row.with_context(|| format!("reading row {}", line + 1))?;
        let seq = row.get(cols.seq).unwrap_or_default();
        for &(order, desc_idx, img_idx) in &cols.steps {
            let desc = row.get(desc_idx).unwrap_or_default().trim();
            if desc.is_empty() {
                continue;
            }
            let image = img_idx.and_then(|i| row.get(i)).unwrap_or_default();
            let mut rec = Record::new();
            rec.push("RCP_NO", Value::Text(seq.to_string()));
            rec.push("RCP_ORDER", Value::Integer(order));
            rec.push("DESCRIPTION", Value::Text(desc.to_string()));
            rec.push("IMAGE_NO", Value::Text(image.to_string()));
            out.records.push(rec);
        }
    }
    Ok(out)
}

/// File-to-file wrapper around [`normalize_steps_from`]. Returns the step count.
#[instrument(level = "info", skip(target), fields(output = %target.path.display()))]
pub fn normalize_steps(input: &Path, delimiter: u8, target: &OutputTarget) -> Result<usize> {
    let file = std::fs::File::open(input).with_context(|| format!("opening {:?}", input))?;
    let steps = normalize_steps_from(file, delimiter)?;
    write_result_set(&steps, target)?;
    info!(steps = steps.len(), "normalized recipe steps");
    Ok(steps.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const WIDE: &str = "\u{feff}RCP_SEQ\tRCP_NM\tMANUAL01\tMANUAL_IMG01\tMANUAL02\tMANUAL_IMG02\tMANUAL03\n\
28\t새우 두부 계란찜\t 1. 손질한 새우를 끓는 물에 데친다. \thttp://img/28_1.png\t  \thttp://img/28_2.png\t3. 찜기에 찐다.\n\
29\t부추 콩가루 찜\t1. 부추를 씻는다.\t\t\t\t\n";

    #[test]
    fn one_row_per_non_blank_step() {
        let rs = normalize_steps_from(WIDE.as_bytes(), b'\t').unwrap();
        assert_eq!(rs.columns, STEP_COLUMNS);
        let rows: Vec<Vec<String>> = rs
            .records
            .iter()
            .map(|r| r.values().map(|v| v.to_string()).collect())
            .collect();
        assert_eq!(
            rows,
            vec![
                vec!["28", "1", "1. 손질한 새우를 끓는 물에 데친다.", "http://img/28_1.png"],
                vec!["28", "3", "3. 찜기에 찐다.", ""],
                vec!["29", "1", "1. 부추를 씻는다.", ""],
            ]
        );
    }

    #[test]
    fn requires_recipe_key_column() {
        let err = normalize_steps_from("A,B\n1,2\n".as_bytes(), b',').unwrap_err();
        assert!(err.to_string().contains("RCP_SEQ"));
    }

    #[test]
    fn writes_csv_with_bom() {
        let tmp = tempdir().unwrap();
        let input = tmp.path().join("RcpDetail.csv");
        fs::write(&input, WIDE).unwrap();
        let target = OutputTarget::csv(tmp.path().join("OffRcpDetail.csv"));

        let n = normalize_steps(&input, b'\t', &target).unwrap();
        assert_eq!(n, 3);
        let text = fs::read_to_string(&target.path).unwrap();
        assert!(text.starts_with("\u{feff}RCP_NO,RCP_ORDER,DESCRIPTION,IMAGE_NO\n"));
        assert!(text.contains("29,1,1. 부추를 씻는다.,\n"));
    }
}
