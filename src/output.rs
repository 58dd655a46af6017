//! # Output Configuration
//!
//! This module controls how the CLI renders run results, including color and
//! emoji support based on terminal capabilities and user preferences.
//!
//! ## Respecting User Preferences
//!
//! The module respects the following environment variables and flags:
//! - `--color=never|always|auto` - CLI flag for color control
//! - `NO_COLOR` - Disables colors when set (per https://no-color.org/)
//! - `CLICOLOR=0` - Disables colors
//! - `CLICOLOR_FORCE=1` - Forces colors even in non-TTY
//! - `TERM=dumb` - Disables colors for dumb terminals
//!
//! ## Usage
//!
//! ```rust,ignore
//! use overlay_patch::output::{OutputConfig, emoji};
//!
//! let config = OutputConfig::from_env_and_flag("auto");
//! println!("{} Materializing...", emoji(&config, "🔧", "[PREP]"));
//! ```

use std::env;

use crate::phases::{PatchOutcome, PatchStatus};

/// Output configuration for controlling colors and emojis.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Whether colors and emojis should be used in output.
    pub use_color: bool,
}

impl OutputConfig {
    /// Create an output configuration from environment and CLI flag.
    ///
    /// `color_flag` is the value of `--color`: "always", "never", or "auto".
    /// In auto mode, colors are disabled if `NO_COLOR` is set, `CLICOLOR=0`,
    /// `TERM=dumb`, or stdout is not a TTY (unless `CLICOLOR_FORCE=1`).
    pub fn from_env_and_flag(color_flag: &str) -> Self {
        let use_color = match color_flag.to_lowercase().as_str() {
            "always" => true,
            "never" => false,
            _ => Self::detect_color_support(),
        };

        Self { use_color }
    }

    fn detect_color_support() -> bool {
        // The presence of the variable (even if empty) disables colors
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
        console::Term::stdout().features().colors_supported()
    }

    /// Create a configuration with colors always enabled.
    #[cfg(test)]
    pub fn with_color() -> Self {
        Self { use_color: true }
    }

    /// Create a configuration with colors always disabled.
    #[cfg(test)]
    pub fn without_color() -> Self {
        Self { use_color: false }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::from_env_and_flag("auto")
    }
}

/// Returns the emoji when colors are enabled, the plain text otherwise.
pub fn emoji<'a>(config: &OutputConfig, emoji_str: &'a str, plain: &'a str) -> &'a str {
    if config.use_color {
        emoji_str
    } else {
        plain
    }
}

/// Marker shown in front of a catalog entry.
pub fn status_marker(config: &OutputConfig, status: &PatchStatus) -> &'static str {
    match status {
        PatchStatus::Applied => emoji(config, "✅", "[ OK ]"),
        PatchStatus::Fallback { .. } => emoji(config, "🔁", "[FALL]"),
        PatchStatus::Failed { .. } => emoji(config, "❌", "[FAIL]"),
        PatchStatus::AnchorMissing { .. } => emoji(config, "⚠️", "[ANCH]"),
        PatchStatus::Skipped { .. } => emoji(config, "⏭️", "[SKIP]"),
    }
}

/// One line describing a catalog outcome.
pub fn format_outcome(config: &OutputConfig, outcome: &PatchOutcome) -> String {
    let detail = match &outcome.status {
        PatchStatus::Applied => String::new(),
        PatchStatus::Fallback { transform } => format!(" (via {})", transform),
        PatchStatus::Failed { reason } => {
            let first = reason.lines().next().unwrap_or_default();
            format!(" ({})", first)
        }
        PatchStatus::AnchorMissing { transform } => format!(" ({} found no anchor)", transform),
        PatchStatus::Skipped { reason } => format!(" ({})", reason),
    };
    format!(
        "{} {:>3} {}{}",
        status_marker(config, &outcome.status),
        outcome.ordinal,
        outcome.id,
        detail
    )
}
