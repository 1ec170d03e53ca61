//! Progress reporting for loading, copying, and exporting.
//!
//! Progress goes to **stderr** so stdout stays parseable for scripts. The
//! core only ever emits a monotonically increasing count and a total; how it
//! is rendered is up to the reporter.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Reading a database. Total unknown.
    Loading { database: String },
    /// n of total copy jobs done (copied, linked, skipped, or failed).
    Copying { n: u64, total: u64 },
    /// n of total records written for one export format.
    Exporting { format: String, n: u64, total: u64 },
}

pub trait ProgressReporter {
    fn report(&self, event: ProgressEvent);
}

fn human_line(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::Loading { database } => format!("loading {}...", database),
        ProgressEvent::Copying { n, total } => format!(
            "copying  {} / {} files",
            format_number(*n),
            format_number(*total)
        ),
        ProgressEvent::Exporting { format, n, total } => format!(
            "export {}  {} / {} records",
            format,
            format_number(*n),
            format_number(*total)
        ),
    }
}

fn json_line(event: &ProgressEvent) -> serde_json::Value {
    let mut obj = match event {
        ProgressEvent::Loading { database } => serde_json::json!({
            "phase": "loading",
            "database": database,
        }),
        ProgressEvent::Copying { n, total } => serde_json::json!({
            "phase": "copying",
            "n": n,
            "total": total,
        }),
        ProgressEvent::Exporting { format, n, total } => serde_json::json!({
            "phase": "exporting",
            "format": format,
            "n": n,
            "total": total,
        }),
    };
    obj["event"] = "progress".into();
    obj
}

fn emit(line: &str) {
    let mut err = std::io::stderr().lock();
    let _ = writeln!(err, "{}", line);
    let _ = err.flush();
}

/// Human-friendly progress on stderr: "copying  1,234 / 5,000 files".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        emit(&human_line(&event));
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        emit(&json_line(&event).to_string());
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Emits every `step`-th event plus the last one, so large runs do not
/// flood the terminal.
pub fn should_report(n: u64, total: u64, step: u64) -> bool {
    n == total || step <= 1 || n % step == 0
}

/// Thousands separated by commas.
pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let head = digits.len() % 3;
    let mut groups: Vec<&str> = Vec::new();
    if head > 0 {
        groups.push(&digits[..head]);
    }
    groups.extend(
        digits.as_bytes()[head..]
            .chunks(3)
            .filter_map(|c| std::str::from_utf8(c).ok()),
    );
    groups.join(",")
}

pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_grouped() {
        assert_eq!(format_number(7), "7");
        assert_eq!(format_number(4_096), "4,096");
        assert_eq!(format_number(50_000), "50,000");
        assert_eq!(format_number(123_456), "123,456");
        assert_eq!(format_number(8_000_001), "8,000,001");
    }

    #[test]
    fn byte_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn human_lines_per_event() {
        let loading = ProgressEvent::Loading {
            database: "dbBackup/index.db".into(),
        };
        assert_eq!(human_line(&loading), "loading dbBackup/index.db...");
        let copying = ProgressEvent::Copying { n: 1_200, total: 8_412 };
        assert_eq!(human_line(&copying), "copying  1,200 / 8,412 files");
        let exporting = ProgressEvent::Exporting {
            format: "xmp_sidecar".into(),
            n: 40,
            total: 41,
        };
        assert_eq!(human_line(&exporting), "export xmp_sidecar  40 / 41 records");
    }

    #[test]
    fn json_lines_carry_phase_and_counts() {
        let v = json_line(&ProgressEvent::Exporting {
            format: "plex_csv".into(),
            n: 3,
            total: 9,
        });
        assert_eq!(v["event"], "progress");
        assert_eq!(v["phase"], "exporting");
        assert_eq!(v["format"], "plex_csv");
        assert_eq!(v["total"], 9);

        let v = json_line(&ProgressEvent::Loading {
            database: "index.db".into(),
        });
        assert_eq!(v["phase"], "loading");
        assert!(v.get("n").is_none());
    }

    #[test]
    fn throttles_but_always_reports_last() {
        assert!(should_report(500, 1_730, 500));
        assert!(!should_report(501, 1_730, 500));
        assert!(should_report(1_730, 1_730, 500));
        assert!(should_report(3, 1_730, 1));
    }
}
