//! Plain-text reports.

use std::fmt::Write;

use arcstr::ArcStr;
use indexmap::IndexSet;
use itertools::Itertools;

use crate::aggregate::Aggregate;
use crate::dispatch::{MeasureResults, MeasureValue};

const FAILED: &str = "--";

fn format_value(value: Option<&MeasureValue>) -> String {
    match value {
        None => FAILED.to_string(),
        Some(MeasureValue::Scalar(x)) => format!("{x:.6e}"),
        Some(MeasureValue::Vector(v)) => format!("[{}]", v.iter().map(|x| format!("{x:.3e}")).join(", ")),
    }
}

/// Renders a measure by corner table of `results`.
///
/// Corners a measure was not evaluated in are left blank. Failed values are
/// shown as `--`.
pub fn format_results(results: &MeasureResults) -> String {
    let corners: IndexSet<&ArcStr> = results.values().flat_map(|c| c.keys()).collect();
    let mut rows = vec![std::iter::once("measure".to_string())
        .chain(corners.iter().map(|c| c.to_string()))
        .collect::<Vec<_>>()];
    for (measure, values) in results {
        let row = std::iter::once(measure.to_string())
            .chain(corners.iter().map(|c| match values.get(*c) {
                Some(v) => format_value(v.as_ref()),
                None => String::new(),
            }))
            .collect();
        rows.push(row);
    }

    let widths: Vec<usize> = (0..=corners.len())
        .map(|i| rows.iter().map(|r| r[i].len()).max().unwrap_or(0))
        .collect();
    let mut out = String::new();
    for row in rows {
        let line = row
            .iter()
            .zip(&widths)
            .map(|(cell, &w)| format!("{cell:<w$}"))
            .join("  ");
        let _ = writeln!(out, "{}", line.trim_end());
    }
    out
}

/// Renders one line per aggregator entry.
pub fn format_aggregate(aggregate: &Aggregate) -> String {
    let mut out = String::new();
    for entry in &aggregate.entries {
        let corner = entry.worst_corner.as_deref().unwrap_or(FAILED);
        let value = match entry.worst_value {
            Some(v) => format!("{v:.6e}"),
            None => FAILED.to_string(),
        };
        let status = match (entry.excluded, entry.fulfilled) {
            (true, _) => "excluded",
            (false, true) => "ok",
            (false, false) => "violated",
        };
        let _ = writeln!(
            out,
            "{} {}: worst {} at {} [{}] contribution {:.6e}",
            entry.measure, entry.goal, value, corner, status, entry.contribution
        );
    }
    let _ = writeln!(out, "cost {:.6e}", aggregate.cost);
    out
}
