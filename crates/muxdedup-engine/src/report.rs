//! Human-readable pair reports. Presentation only; nothing here feeds a decision.

use std::fmt::Write as _;

use muxdedup_core::{format_date, Mux};

use crate::mapping::MappingIndex;
use crate::merger::FieldDiff;
use crate::planner::Decision;
use crate::selector::Selection;

pub struct PairReport<'a> {
    pub newer: &'a Mux,
    pub older: &'a Mux,
    pub selection: &'a Selection,
    pub diffs: &'a [FieldDiff],
    pub index: &'a MappingIndex,
}

impl PairReport<'_> {
    pub fn render(&self) -> String {
        let (newer, older) = (self.newer, self.older);
        let mut out = String::new();

        let _ = writeln!(
            out,
            "--- duplicate {}/{}: {} kHz ~ {} kHz",
            newer.orbital, newer.polarisation, newer.frequency, older.frequency
        );
        let basis = match self.selection.decided_by {
            Some(tb) => format!("canonical by {}", tb.as_str()),
            None => "timestamps tie, first kept as canonical".to_string(),
        };
        let merge = if self.selection.allow_merge {
            "merge allowed"
        } else {
            "merge not allowed"
        };
        let _ = writeln!(out, "    {basis}, {merge}");

        let rows: [(&str, String, String); 7] = [
            ("uuid", newer.uuid.clone(), older.uuid.clone()),
            (
                "scan_result",
                newer.scan_result.to_string(),
                older.scan_result.to_string(),
            ),
            (
                "services",
                newer.services.len().to_string(),
                older.services.len().to_string(),
            ),
            (
                "mapped",
                self.index.mapping_count(newer).to_string(),
                self.index.mapping_count(older).to_string(),
            ),
            ("created", format_date(newer.created), format_date(older.created)),
            (
                "scan_first",
                format_date(newer.scan_first),
                format_date(older.scan_first),
            ),
            (
                "scan_last",
                format_date(newer.scan_last),
                format_date(older.scan_last),
            ),
        ];
        let width = rows
            .iter()
            .map(|(_, left, _)| left.len())
            .max()
            .unwrap_or(0)
            .max("canonical".len());

        let _ = writeln!(out, "    {:<12} {:<width$}   {}", "", "canonical", "other");
        for (label, left, right) in &rows {
            let _ = writeln!(out, "    {label:<12} {left:<width$}   {right}");
        }

        for diff in self.diffs {
            let _ = writeln!(out, "    diff {}: {} -> {}", diff.field, diff.newer, diff.older);
        }

        self.render_channels(&mut out, "canonical", newer);
        self.render_channels(&mut out, "other", older);
        out
    }

    fn render_channels(&self, out: &mut String, side: &str, mux: &Mux) {
        let mapped: Vec<String> = mux
            .services
            .iter()
            .filter(|s| self.index.is_mapped(s))
            .map(|s| {
                format!(
                    "{} -> {}",
                    self.index.service_name(s),
                    self.index.channel_names(s).join(", ")
                )
            })
            .collect();
        if mapped.is_empty() {
            let _ = writeln!(out, "    channels ({side}): -");
        } else {
            let _ = writeln!(out, "    channels ({side}): {}", mapped.join("; "));
        }
    }
}

/// One line per mutation the decision implies, phrased for dry-run or live mode.
pub fn action_lines(decision: Decision, newer: &Mux, older: &Mux, dry_run: bool) -> Vec<String> {
    let (update, delete) = if dry_run {
        ("would update", "would delete")
    } else {
        ("updating", "deleting")
    };
    match decision {
        Decision::Skip => vec![format!(
            "    skipped: {} or {} already handled",
            newer.uuid, older.uuid
        )],
        Decision::DeleteOlder => vec![format!("    {delete} older mux {} (unmapped)", older.uuid)],
        Decision::UpdateOlder { delete_newer } => {
            let mut lines = vec![format!("    {update} older mux {}", older.uuid)];
            if delete_newer {
                lines.push(format!("    {delete} newer mux {} (unmapped)", newer.uuid));
            }
            lines
        }
        Decision::DeleteNewer => vec![format!(
            "    {delete} newer mux {} (scan failed, unmapped)",
            newer.uuid
        )],
        Decision::NoAction => vec!["    no action".to_string()],
    }
}
