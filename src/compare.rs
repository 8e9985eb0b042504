//! MAR vs. MNAR imputed-category proportions.
//!
//! Restricted to the originally-missing rows, the comparator computes the
//! per-category percentage under the MAR completion and under every MNAR
//! scenario, averaged across ensemble members with a plain arithmetic mean.

use crate::design::i64_values;
use crate::relabel::RelabeledEnsemble;
use crate::MnarError;
use comfy_table::{Cell, Table};
use getset::Getters;
use serde::Serialize;

/// One output column: the MAR completion or one MNAR scenario, as
/// percentages over the level set.
#[derive(Debug, Clone, Getters, Serialize)]
#[getset(get = "pub")]
pub struct ProportionColumn {
    name: String,
    percent: Vec<f64>,
}

/// A dense level × (1 + scenario count) percentage table. Levels imputed in
/// no member appear as 0%, not as gaps.
#[derive(Debug, Clone, Getters, Serialize)]
#[getset(get = "pub")]
pub struct ProportionTable {
    levels: Vec<i64>,
    columns: Vec<ProportionColumn>,
}

/// Aggregates imputed-category proportions across ensemble members.
pub struct ProportionComparator;

impl ProportionComparator {
    /// Builds the comparison table over the rows flagged in `missing_mask`
    /// (the originally-missing rows of the pre-imputation data).
    pub fn compare(
        relabeled: &RelabeledEnsemble,
        missing_mask: &[bool],
    ) -> Result<ProportionTable, MnarError> {
        let level_count = *relabeled.level_count();
        let restricted = missing_mask.iter().filter(|&&m| m).count();
        if restricted == 0 {
            return Err(MnarError::Validation(
                "compare: missing_mask selects no rows".to_string(),
            ));
        }
        let member_count = relabeled.members().len();
        if member_count == 0 {
            return Err(MnarError::Validation(
                "compare: relabeled ensemble has no members".to_string(),
            ));
        }

        let mut names = vec![relabeled.mar_column().clone()];
        names.extend(relabeled.scenario_columns().iter().cloned());

        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let mut accumulated = vec![0.0_f64; level_count];
            for (m, data) in relabeled.members().iter().enumerate() {
                if data.height() != missing_mask.len() {
                    return Err(MnarError::Validation(format!(
                        "compare: member {} has {} rows but the mask has {}",
                        m,
                        data.height(),
                        missing_mask.len()
                    )));
                }
                let values = i64_values(data, &name)?;
                let mut counts = vec![0usize; level_count];
                for (i, &v) in values.iter().enumerate() {
                    if !missing_mask[i] {
                        continue;
                    }
                    if v < 1 || v > level_count as i64 {
                        return Err(MnarError::Validation(format!(
                            "compare: column '{}' holds category {} outside 1..={}",
                            name, v, level_count
                        )));
                    }
                    counts[(v - 1) as usize] += 1;
                }
                for (kdx, &count) in counts.iter().enumerate() {
                    accumulated[kdx] += 100.0 * count as f64 / restricted as f64;
                }
            }
            columns.push(ProportionColumn {
                name,
                percent: accumulated
                    .into_iter()
                    .map(|total| total / member_count as f64)
                    .collect(),
            });
        }

        Ok(ProportionTable {
            levels: (1..=level_count as i64).collect(),
            columns,
        })
    }
}

impl ProportionTable {
    /// Prints the table to the console.
    pub fn summary(&self) {
        println!("Imputed-category proportions over originally-missing rows (%)");

        let mut table = Table::new();
        let mut header = vec!["Level".to_string()];
        header.extend(self.columns.iter().map(|c| c.name.clone()));
        table.set_header(header);
        for (row, level) in self.levels.iter().enumerate() {
            let mut cells = vec![Cell::new(level)];
            for column in &self.columns {
                cells.push(Cell::new(format!("{:.2}", column.percent[row])));
            }
            table.add_row(cells);
        }
        println!("{}", table);
    }

    /// Serializes the table to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Renders the table as a Markdown pipe table.
    pub fn to_markdown(&self) -> String {
        let mut out = String::from("| Level |");
        for column in &self.columns {
            out.push_str(&format!(" {} |", column.name));
        }
        out.push('\n');
        out.push_str("|---|");
        for _ in &self.columns {
            out.push_str("---|");
        }
        out.push('\n');
        for (row, level) in self.levels.iter().enumerate() {
            out.push_str(&format!("| {} |", level));
            for column in &self.columns {
                out.push_str(&format!(" {:.2} |", column.percent[row]));
            }
            out.push('\n');
        }
        out
    }
}
