//! 📊 The end-of-pass report: what got pulled, what got skipped, what landed where.
//!
//! Logged once when a pass finishes, as a table so comfy it has lumbar support.

use std::time::Duration;

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};

use crate::sink::SinkSnapshot;

/// 🔢 Thousands separators, grouped from the right.
fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let groups: Vec<&str> = digits
        .as_bytes()
        .rchunks(3)
        .rev()
        .map(|group| std::str::from_utf8(group).unwrap_or_default())
        .collect();
    groups.join(",")
}

/// ⏱️ Passes are deadline-bound and usually short, so keep the milliseconds.
/// `0.412s` under a minute, `4m07.250s` past it.
fn format_elapsed(elapsed: Duration) -> String {
    let (minutes, seconds) = (elapsed.as_secs() / 60, elapsed.as_secs() % 60);
    let millis = elapsed.subsec_millis();
    if minutes == 0 {
        format!("{seconds}.{millis:03}s")
    } else {
        format!("{minutes}m{seconds:02}.{millis:03}s")
    }
}

/// 📋 Tallies for one pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    pub pipeline: &'static str,
    pub pulls: u64,
    pub messages: u64,
    pub builds: u64,
    /// ⏳ polling hint set and build still running
    pub skipped: u64,
    pub failed: u64,
    pub rows_submitted: u64,
    pub acked: u64,
    pub sinks: Vec<(String, SinkSnapshot)>,
    pub elapsed: Duration,
}

impl PassReport {
    pub fn new(pipeline: &'static str) -> Self {
        Self {
            pipeline,
            ..Self::default()
        }
    }

    pub fn render(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(NOTHING)
            .set_content_arrangement(ContentArrangement::Dynamic);
        let mut row = |label: &str, value: String| {
            table.add_row(vec![Cell::new(label), Cell::new(value).set_alignment(CellAlignment::Right)]);
        };
        row("📬 messages", format_count(self.messages));
        row("🔁 pulls", format_count(self.pulls));
        row("🏗️ builds", format_count(self.builds));
        row("⏳ skipped", format_count(self.skipped));
        row("💀 failed", format_count(self.failed));
        row("📥 rows", format_count(self.rows_submitted));
        row("✅ acked", format_count(self.acked));
        for (table_name, stats) in &self.sinks {
            row(
                &format!("🏛️ {table_name}"),
                format!(
                    "{} sent / {} refused / {} dropped",
                    format_count(stats.rows_sent),
                    format_count(stats.rows_refused),
                    format_count(stats.rows_dropped)
                ),
            );
        }
        row("⏱️ elapsed", format_elapsed(self.elapsed));
        format!("🏁 {} pass\n{table}", self.pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_big_numbers_get_commas() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(12_345), "12,345");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1_000), "1,000");
        assert_eq!(format_count(1_234_567), "1,234,567");
    }

    #[test]
    fn the_one_where_short_passes_keep_their_milliseconds() {
        assert_eq!(format_elapsed(Duration::from_millis(412)), "0.412s");
        assert_eq!(format_elapsed(Duration::from_millis(59_999)), "59.999s");
        assert_eq!(format_elapsed(Duration::from_millis(247_250)), "4m07.250s");
        assert_eq!(format_elapsed(Duration::from_secs(3_725)), "62m05.000s");
    }

    #[test]
    fn the_one_where_the_report_mentions_every_sink() {
        let mut report = PassReport::new("plan-pipe");
        report.messages = 1_500;
        report.sinks.push((
            "p.d.plans".into(),
            SinkSnapshot {
                rows_sent: 2,
                ..SinkSnapshot::default()
            },
        ));
        let rendered = report.render();
        assert!(rendered.contains("plan-pipe"));
        assert!(rendered.contains("1,500"));
        assert!(rendered.contains("p.d.plans"));
    }
}
