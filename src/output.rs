//! # Output Configuration
//!
//! Utilities for user-facing output: color and symbol selection based on
//! terminal capabilities and user preferences, and a progress bar for
//! synchronization.
//!
//! ## Respecting User Preferences
//!
//! - `--color=never|always|auto` - CLI flag for color control
//! - `NO_COLOR` - Disables colors when set (per https://no-color.org/)
//! - `CLICOLOR=0` - Disables colors
//! - `CLICOLOR_FORCE=1` - Forces colors even in non-TTY
//! - `TERM=dumb` - Disables colors for dumb terminals

use std::env;

use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};

use crate::identity::RepositoryIdentity;
use crate::phases::sync::{RepositoryOutcome, SyncAction, SyncProgress};

/// Output configuration for controlling colors and symbols.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Whether colors and symbols should be used in output.
    pub use_color: bool,
}

impl OutputConfig {
    /// Create an output configuration from environment and CLI flag.
    ///
    /// `--color=always` wins over `NO_COLOR`; `--color=auto` disables color
    /// when `NO_COLOR` is set, `CLICOLOR=0`, `TERM=dumb`, or stdout is not a
    /// TTY (unless `CLICOLOR_FORCE=1`).
    pub fn from_env_and_flag(color_flag: &str) -> Self {
        let use_color = match color_flag.to_lowercase().as_str() {
            "always" => true,
            "never" => false,
            _ => Self::detect_color_support(),
        };

        Self { use_color }
    }

    fn detect_color_support() -> bool {
        // presence alone disables, even when empty
        if env::var_os("NO_COLOR").is_some() {
            return false;
        }
        if env::var("CLICOLOR").is_ok_and(|v| v == "0") {
            return false;
        }
        if env::var("CLICOLOR_FORCE").is_ok_and(|v| v != "0" && !v.is_empty()) {
            return true;
        }
        if env::var("TERM").is_ok_and(|v| v == "dumb") {
            return false;
        }
        Term::stdout().features().colors_supported()
    }

    pub fn with_color() -> Self {
        Self { use_color: true }
    }

    pub fn without_color() -> Self {
        Self { use_color: false }
    }

    /// Symbol for a finished repository.
    pub fn marker(&self, action: &SyncAction) -> String {
        let (fancy, plain) = match action {
            SyncAction::Cloned | SyncAction::Updated { .. } => ("✓", "[OK]"),
            SyncAction::UpToDate => ("=", "[OK]"),
            SyncAction::WouldClone | SyncAction::WouldUpdate { .. } => ("~", "[PLAN]"),
            SyncAction::Failed(_) => ("✗", "[ERR]"),
            SyncAction::Skipped { .. } => ("-", "[SKIP]"),
        };
        if !self.use_color {
            return plain.to_string();
        }
        let styled = match action {
            SyncAction::Failed(_) => style(fancy).red().bold(),
            SyncAction::Skipped { .. } => style(fancy).yellow(),
            SyncAction::UpToDate => style(fancy).dim(),
            _ => style(fancy).green(),
        };
        styled.to_string()
    }

    /// Dims secondary text when colors are enabled.
    pub fn dim(&self, text: &str) -> String {
        if self.use_color {
            style(text).dim().to_string()
        } else {
            text.to_string()
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::from_env_and_flag("auto")
    }
}

/// Returns `emoji_str` when colors are enabled, `plain` otherwise.
pub fn emoji<'a>(config: &OutputConfig, emoji_str: &'a str, plain: &'a str) -> &'a str {
    if config.use_color {
        emoji_str
    } else {
        plain
    }
}

/// One report line for a synchronized repository.
pub fn describe_outcome(config: &OutputConfig, outcome: &RepositoryOutcome) -> String {
    let detail = match &outcome.action {
        SyncAction::Updated { from } | SyncAction::WouldUpdate { from } => {
            format!("{} -> {}", from.short(), outcome.commit.short())
        }
        SyncAction::Failed(error) => error.to_string(),
        SyncAction::Skipped { reason } => reason.clone(),
        _ => outcome.commit.short().to_string(),
    };
    format!(
        "{} {} @ {} {} ({})",
        config.marker(&outcome.action),
        outcome.identity,
        outcome.r#ref,
        outcome.action.label(),
        config.dim(&detail)
    )
}

/// Progress bar on stderr, hidden when stderr is not a terminal.
pub struct SyncProgressBar {
    bar: ProgressBar,
}

impl SyncProgressBar {
    pub fn new(visible: bool) -> Self {
        let bar = if visible && Term::stderr().is_term() {
            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::with_template("{spinner} [{pos}/{len}] {wide_msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar
        } else {
            ProgressBar::hidden()
        };
        Self { bar }
    }
}

impl SyncProgress for SyncProgressBar {
    fn started(&self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn repository_started(&self, identity: &RepositoryIdentity) {
        self.bar.set_message(identity.to_string());
    }

    fn repository_finished(&self, _outcome: &RepositoryOutcome) {
        self.bar.inc(1);
    }

    fn finished(&self) {
        self.bar.finish_and_clear();
    }
}
