//! Progress reporting for the crawl phases (expanding artists, saving and
//! loading the graph).
//!
//! In log-only mode bars and spinners are hidden and progress is reported
//! through periodic log lines instead, which keeps output readable under
//! `tail -f` or a process supervisor.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;

/// Global flag for log-only mode (set from args in main)
static LOG_ONLY: AtomicBool = AtomicBool::new(false);

pub fn set_log_only(value: bool) {
    LOG_ONLY.store(value, Ordering::Relaxed);
}

pub fn is_log_only() -> bool {
    LOG_ONLY.load(Ordering::Relaxed)
}

/// What a progress bar counts; picks the label and bar colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Artists expanded by the crawl
    Crawl,
    /// Vertex and edge rows written to SQLite
    Save,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Crawl => "crawl",
            Phase::Save => "save",
        }
    }

    fn unit(self) -> &'static str {
        match self {
            Phase::Crawl => "artists",
            Phase::Save => "rows",
        }
    }

    fn colors(self) -> &'static str {
        match self {
            Phase::Crawl => "green/white",
            Phase::Save => "cyan/blue",
        }
    }

    fn template(self) -> String {
        format!(
            "{{msg}} [{{elapsed_precise}}] [{{bar:40.{}}}] {{pos}}/{{len}} {} ({{per_sec}}, ETA: {{eta}})",
            self.colors(),
            self.unit()
        )
    }
}

/// Human-readable duration for the end-of-crawl summary, e.g. `42.0s`,
/// `3m 07s`, `2h 15m`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Progress bar for a phase of known length. Hidden in log-only mode.
pub fn create_progress_bar(phase: Phase, len: u64, msg: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if is_log_only() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else if let Ok(style) = ProgressStyle::default_bar().template(&phase.template()) {
        pb.set_style(style.progress_chars("=> "));
    }
    pb.set_message(msg.to_string());
    pb
}

/// Log progress every `interval` steps (and on the last one) in log-only mode.
pub fn log_progress(phase: Phase, current: u64, total: u64, interval: u64) {
    if !is_log_only() || total == 0 {
        return;
    }
    if current % interval.max(1) == 0 || current == total {
        let pct = 100.0 * current as f64 / total as f64;
        info!("[{}] {}/{} {} ({:.1}%)", phase.label(), current, total, phase.unit(), pct);
    }
}

/// Spinner for loading a stored graph, whose size is unknown up front.
/// Hidden in log-only mode.
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if is_log_only() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else {
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed_precise}]") {
            pb.set_style(style);
        }
        pb.enable_steady_tick(Duration::from_millis(120));
    }
    pb.set_message(msg.to_string());
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(187)), "3m 07s");
        assert_eq!(format_duration(Duration::from_secs(8100)), "2h 15m");
    }

    #[test]
    fn test_phase_templates_name_their_unit() {
        assert!(Phase::Crawl.template().contains("{pos}/{len} artists"));
        assert!(Phase::Save.template().contains("{bar:40.cyan/blue}"));
        assert!(ProgressStyle::default_bar().template(&Phase::Crawl.template()).is_ok());
    }
}
