//! Console reporting for migration runs.
//!
//! The original operators watched this tool for hours; the reporter keeps
//! that workflow: compact icon-prefixed lines, a banner per step, progress
//! bars for the long loops. Success/info lines are suppressed unless verbose
//! output was requested; warnings and errors always show. Every line is
//! mirrored to `tracing` so the persistent log file gets a full record.

use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info, warn};

/// User-facing output for a migration run.
#[derive(Debug, Clone)]
pub struct Reporter {
    quiet: bool,
    prefix: String,
}

impl Reporter {
    /// A reporter in default (quiet) mode: only warnings, errors, and
    /// always-shown messages reach the console.
    pub fn new(verbose: bool) -> Self {
        Self {
            quiet: !verbose,
            prefix: String::new(),
        }
    }

    /// A fully silent reporter for tests.
    pub fn quiet() -> Self {
        Self {
            quiet: true,
            prefix: String::new(),
        }
    }

    /// A copy of this reporter with a `[step]` prefix on every line.
    pub fn for_step(&self, step: &str) -> Self {
        Self {
            quiet: self.quiet,
            prefix: format!("[{}] ", step),
        }
    }

    /// Print a step banner. Always shown.
    pub fn step(&self, title: &str) {
        info!(step = title, "starting step");
        println!(
            "{}",
            style(format!(" > {:<30}", title)).cyan().bold().reverse()
        );
    }

    /// Success line; hidden in quiet mode.
    pub fn success(&self, msg: &str) {
        debug!("{}{}", self.prefix, msg);
        if !self.quiet {
            println!("{} {}{}", style("✓").green(), self.prefix, msg);
        }
    }

    /// Success line that is shown even in quiet mode.
    pub fn success_always(&self, msg: &str) {
        info!("{}{}", self.prefix, msg);
        println!("{} {}{}", style("✓").green(), self.prefix, msg);
    }

    /// Informational line; hidden in quiet mode.
    pub fn info(&self, msg: &str) {
        debug!("{}{}", self.prefix, msg);
        if !self.quiet {
            println!("{} {}{}", style("i").blue(), self.prefix, msg);
        }
    }

    /// Warning line. Always shown.
    pub fn warning(&self, msg: &str) {
        warn!("{}{}", self.prefix, msg);
        println!("{} {}{}", style("!").yellow().bold(), self.prefix, msg);
    }

    /// Error line. Always shown.
    pub fn error(&self, msg: &str) {
        error!("{}{}", self.prefix, msg);
        println!("{} {}{}", style("✗").red(), self.prefix, msg);
    }

    /// Progress bar for a long loop. In verbose mode the per-item output
    /// is more useful than a bar, so a hidden bar is returned instead.
    pub fn progress(&self, len: u64, msg: &str) -> ProgressBar {
        if !self.quiet {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len);
        bar.set_style(
            ProgressStyle::with_template(
                "{msg:<24} {bar:40.cyan/blue} {pos:>7}/{len:7} [{elapsed_precise}]",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message(msg.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_propagates() {
        let reporter = Reporter::quiet().for_step("users");
        assert_eq!(reporter.prefix, "[users] ");
        // quiet reporters never print success/info; just exercise the paths
        reporter.success("ok");
        reporter.info("hello");
    }

    #[test]
    fn test_progress_hidden_when_verbose() {
        let reporter = Reporter::new(true);
        let bar = reporter.progress(10, "Migrating things");
        assert!(bar.is_hidden());
    }
}
