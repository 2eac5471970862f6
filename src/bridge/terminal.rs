use std::io::{self, IsTerminal};
use std::sync::Arc;

use crate::engine::TerminalSize;

/// The host side of an interactive session
pub trait HostTerminal: Send + Sync {
    fn size(&self) -> io::Result<TerminalSize>;

    fn enable_raw_mode(&self) -> io::Result<()>;

    fn disable_raw_mode(&self) -> io::Result<()>;
}

/// The controlling terminal, via crossterm
///
/// Raw mode is left alone when stdin is not a terminal, so piped input keeps working.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrosstermTerminal;

impl HostTerminal for CrosstermTerminal {
    fn size(&self) -> io::Result<TerminalSize> {
        let (cols, rows) = crossterm::terminal::size()?;
        Ok(TerminalSize { rows, cols })
    }

    fn enable_raw_mode(&self) -> io::Result<()> {
        if !io::stdin().is_terminal() {
            return Ok(());
        }
        crossterm::terminal::enable_raw_mode()
    }

    fn disable_raw_mode(&self) -> io::Result<()> {
        if !io::stdin().is_terminal() {
            return Ok(());
        }
        crossterm::terminal::disable_raw_mode()
    }
}

/// Restores the terminal mode on drop, including during unwinding
pub struct RawModeGuard {
    terminal: Arc<dyn HostTerminal>,
}

impl RawModeGuard {
    pub fn new(terminal: Arc<dyn HostTerminal>) -> io::Result<Self> {
        terminal.enable_raw_mode()?;
        Ok(Self { terminal })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = self.terminal.disable_raw_mode() {
            log::debug!("Failed to restore terminal mode: {}", e);
        }
    }
}
