//! Terminal output.
//!
//! Progress from core operations arrives as [`up_schema::Event`]s through
//! [`ConsoleReporter`] and is drawn by a single [`UiActor`] thread on stderr.
//! Command results go to stdout through [`Output`].

pub mod actor;
pub mod engine;
pub mod reporter;

pub use actor::{UiActor, UiEvent};
pub use reporter::ConsoleReporter;

use crossterm::style::Stylize;

/// Status glyphs.
#[derive(Debug, Clone, Copy)]
pub struct Icons {
    pub active: &'static str,
    pub pending: &'static str,
    pub success: &'static str,
    pub failure: &'static str,
    pub info: &'static str,
    pub warning: &'static str,
}

impl Default for Icons {
    fn default() -> Self {
        Self {
            active: "●",
            pending: "○",
            success: "✓",
            failure: "✗",
            info: "ℹ",
            warning: "⚠",
        }
    }
}

/// Result lines on stdout.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    quiet: bool,
    icons: Icons,
}

impl Output {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            icons: Icons::default(),
        }
    }

    /// Suppressed by `--quiet`.
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            println!("{} {msg}", self.icons.info.blue());
        }
    }

    pub fn success(&self, msg: &str) {
        println!("{} {msg}", self.icons.success.green().bold());
    }

    /// Warnings go to stdout too, so they stay in order with results.
    pub fn warning(&self, msg: &str) {
        println!("{} {msg}", self.icons.warning.yellow().bold());
    }

    /// Plain text, for output other tools may parse.
    pub fn plain(&self, msg: &str) {
        println!("{msg}");
    }
}
