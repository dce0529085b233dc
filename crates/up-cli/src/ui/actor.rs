//! UI Actor - Single-threaded event processing
//!
//! Builders report from one task per architecture and the dependency
//! manager from nested walks; all of it is funnelled through one channel
//! into a dedicated thread that owns the terminal, so lines never tear.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crossterm::style::Stylize;
use up_schema::{Event, EventStatus};

use super::Icons;
use super::engine::{LiveRows, Row};

/// Events that can be sent to the UI actor
#[derive(Debug)]
pub enum UiEvent {
    /// Progress of a named operation
    Progress(Event),
    /// Print an info line above the live rows
    Info(String),
    /// Print a warning line above the live rows
    Warning(String),
    /// Settle the current rows and acknowledge
    Sync(mpsc::SyncSender<()>),
    /// Shutdown the actor
    Shutdown,
}

/// Handle to the UI actor thread
#[derive(Debug)]
pub struct UiActor {
    sender: mpsc::Sender<UiEvent>,
    handle: Option<thread::JoinHandle<()>>,
}

impl UiActor {
    /// Start the UI thread drawing to stderr.
    pub fn spawn() -> Self {
        let (sender, receiver) = mpsc::channel();
        let handle = thread::spawn(move || run_event_loop(&receiver, LiveRows::new()));
        Self {
            sender,
            handle: Some(handle),
        }
    }

    pub fn sender(&self) -> mpsc::Sender<UiEvent> {
        self.sender.clone()
    }

    /// Block until every event sent so far has been drawn.
    pub fn sync(&self) {
        let (tx, rx) = mpsc::sync_channel(1);
        if self.sender.send(UiEvent::Sync(tx)).is_ok() {
            let _ = rx.recv();
        }
    }

    /// Stop the thread after it has drawn every pending event.
    pub fn shutdown(mut self) {
        let _ = self.sender.send(UiEvent::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for UiActor {
    fn drop(&mut self) {
        let _ = self.sender.send(UiEvent::Shutdown);
    }
}

/// Operations in first-seen order.
#[derive(Debug, Default)]
struct Board {
    ops: Vec<(String, EventStatus, Instant)>,
}

impl Board {
    fn apply(&mut self, event: Event) {
        match self.ops.iter_mut().find(|(text, _, _)| *text == event.text) {
            Some(op) => {
                op.1 = event.status;
                if event.status == EventStatus::Started {
                    op.2 = Instant::now();
                }
            }
            None => self.ops.push((event.text, event.status, Instant::now())),
        }
    }

    fn active(&self) -> bool {
        self.ops.iter().any(|(_, status, _)| *status == EventStatus::Started)
    }

    fn rows(&self, icons: &Icons, started: Instant) -> Vec<Row> {
        // 200ms per frame, blinking every frame.
        let blink = (started.elapsed().as_millis() / 200) % 2 == 0;
        self.ops
            .iter()
            .map(|(text, status, since)| {
                let line = match status {
                    EventStatus::Started => {
                        let icon = if blink { icons.active } else { icons.pending };
                        format!("  {} {text}", icon.cyan())
                    }
                    EventStatus::Success => format!(
                        "  {} {text} {}",
                        icons.success.green(),
                        format!("({:.1}s)", since.elapsed().as_secs_f64()).dark_grey()
                    ),
                    EventStatus::Failure => format!("  {} {}", icons.failure.red(), text.as_str().red()),
                };
                Row {
                    key: text.clone(),
                    line,
                    settled: *status != EventStatus::Started,
                }
            })
            .collect()
    }
}

fn run_event_loop(receiver: &mpsc::Receiver<UiEvent>, mut frame: LiveRows) {
    let icons = Icons::default();
    let started = Instant::now();
    let mut board = Board::default();

    loop {
        // Timeout drives the blink of active rows (100ms = 10 FPS).
        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(UiEvent::Progress(event)) => {
                board.apply(event);
                let _ = frame.render(&board.rows(&icons, started));
            }
            Ok(UiEvent::Info(msg)) => {
                let _ = frame.print_above(&format!("  {} {msg}", icons.info.blue()));
                let _ = frame.render(&board.rows(&icons, started));
            }
            Ok(UiEvent::Warning(msg)) => {
                let _ = frame.print_above(&format!("  {} {msg}", icons.warning.yellow()));
                let _ = frame.render(&board.rows(&icons, started));
            }
            Ok(UiEvent::Sync(ack)) => {
                frame.finish();
                board = Board::default();
                let _ = ack.send(());
            }
            Ok(UiEvent::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if board.active() {
                    let _ = frame.render(&board.rows(&icons, started));
                }
            }
        }
    }
    frame.finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_keeps_first_seen_order() {
        let mut board = Board::default();
        board.apply(Event::started("pull amd64"));
        board.apply(Event::started("pull arm64"));
        board.apply(Event::success("pull arm64"));
        board.apply(Event::failure("pull amd64"));

        let rows = board.rows(&Icons::default(), Instant::now());
        let keys: Vec<_> = rows.iter().map(|r| (r.key.as_str(), r.settled)).collect();
        assert_eq!(keys, [("pull amd64", true), ("pull arm64", true)]);
        assert!(!board.active());
    }

    #[test]
    fn test_sync_round_trip() {
        let actor = UiActor::spawn();
        let sender = actor.sender();
        sender.send(UiEvent::Progress(Event::started("quiet"))).unwrap();
        sender.send(UiEvent::Progress(Event::success("quiet"))).unwrap();
        actor.sync();
        actor.shutdown();
    }
}
