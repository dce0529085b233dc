//! Terminal Engine - redraw a block of status rows in place
//!
//! The block is anchored below whatever was printed before it. Each render
//! moves up over the rows drawn last time and rewrites them, so rows can
//! change state without scrolling. Without a terminal only settled rows are
//! printed, once each.

use std::collections::HashSet;
use std::io::{IsTerminal, Result, Stderr, Write, stderr};

use crossterm::QueueableCommand;
use crossterm::cursor::{MoveToColumn, MoveUp};
use crossterm::terminal::{Clear, ClearType};

/// One line of the block. `settled` rows will not change again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub key: String,
    pub line: String,
    pub settled: bool,
}

/// Redraws a block of rows in place on a terminal; elsewhere prints each
/// settled row once.
#[derive(Debug)]
pub struct LiveRows {
    out: Stderr,
    interactive: bool,
    drawn: u16,
    printed: HashSet<String>,
}

impl Default for LiveRows {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveRows {
    pub fn new() -> Self {
        let out = stderr();
        let interactive = out.is_terminal();
        Self::with_mode(interactive)
    }

    /// Force interactive or plain output.
    pub fn with_mode(interactive: bool) -> Self {
        Self {
            out: stderr(),
            interactive,
            drawn: 0,
            printed: HashSet::new(),
        }
    }

    /// Replace the block with `rows`.
    pub fn render(&mut self, rows: &[Row]) -> Result<()> {
        if !self.interactive {
            for row in rows.iter().filter(|r| r.settled) {
                if self.printed.insert(row.key.clone()) {
                    writeln!(self.out, "{}", row.line)?;
                }
            }
            return self.out.flush();
        }

        if self.drawn > 0 {
            self.out.queue(MoveUp(self.drawn))?;
        }
        self.out.queue(MoveToColumn(0))?;
        for row in rows {
            self.out.queue(Clear(ClearType::CurrentLine))?;
            write!(self.out, "{}\r\n", row.line)?;
        }
        self.drawn = u16::try_from(rows.len()).unwrap_or(u16::MAX);
        self.out.flush()
    }

    /// Leave the current block on screen; the next render starts a new one.
    pub fn finish(&mut self) {
        self.drawn = 0;
        self.printed.clear();
    }

    /// Print a line above the block, which is then redrawn by the caller.
    pub fn print_above(&mut self, line: &str) -> Result<()> {
        if self.interactive && self.drawn > 0 {
            self.out.queue(MoveUp(self.drawn))?;
            self.out.queue(MoveToColumn(0))?;
            self.out.queue(Clear(ClearType::FromCursorDown))?;
            self.drawn = 0;
        }
        writeln!(self.out, "{line}")?;
        self.out.flush()
    }
}
