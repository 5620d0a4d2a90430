use std::fmt::Write as _;

use orderstream_core::monitor::TargetReport;
use orderstream_core::{GroupSnapshot, StatsError};

/// Clears the terminal and homes the cursor.
pub const CLEAR_SCREEN: &str = "\x1B[2J\x1B[H";

/// Render one group's summary and consumer table.
pub fn render_snapshot(out: &mut String, snapshot: &GroupSnapshot) {
    let _ = writeln!(
        out,
        "Stream: {}  Group: {}",
        snapshot.partition, snapshot.group
    );
    let _ = writeln!(out, "  Length:          {}", snapshot.stream_length);
    let _ = writeln!(out, "  Pending:         {}", snapshot.pending);
    let _ = writeln!(out, "  Last delivered:  {}", snapshot.last_delivered_id);
    let _ = writeln!(out, "  Total processed: {}", snapshot.total_processed());

    if snapshot.consumers.is_empty() {
        let _ = writeln!(out, "  No consumers registered.");
        return;
    }

    let name_width = snapshot
        .consumers
        .iter()
        .map(|c| c.name.len())
        .max()
        .unwrap_or(8)
        .max(8);

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "  {:<name_width$}  {:>9}  {:>7}  {:>8}",
        "CONSUMER", "PROCESSED", "PENDING", "IDLE (S)"
    );
    for c in &snapshot.consumers {
        let _ = writeln!(
            out,
            "  {:<name_width$}  {:>9}  {:>7}  {:>8}",
            c.name, c.processed_count, c.pending_count, c.idle_seconds
        );
    }
}

/// Render every report of a cycle, failed pairs included, in order.
pub fn render_reports(reports: &[TargetReport]) -> String {
    let mut out = String::new();
    for (i, report) in reports.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        match &report.result {
            Ok(snapshot) => render_snapshot(&mut out, snapshot),
            Err(e) => {
                let _ = writeln!(
                    out,
                    "Stream: {}  Group: {}",
                    report.partition, report.group
                );
                let _ = writeln!(out, "  {}", error_line(e));
            }
        }
    }
    out
}

pub fn error_line(err: &StatsError) -> String {
    match err {
        StatsError::GroupNotFound { partition, group } => {
            format!("Error: group \"{group}\" not found on stream \"{partition}\"")
        }
        StatsError::Store(e) => format!("Error: {e}"),
    }
}
