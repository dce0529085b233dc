//! Console implementation of the core `Reporter`.

use std::sync::mpsc::Sender;

use up_core::Reporter;
use up_schema::Event;

use super::actor::UiEvent;

/// Forwards progress to the UI actor. Sends after shutdown are dropped.
#[derive(Debug, Clone)]
pub struct ConsoleReporter {
    sender: Sender<UiEvent>,
}

impl ConsoleReporter {
    pub fn new(sender: Sender<UiEvent>) -> Self {
        Self { sender }
    }
}

impl Reporter for ConsoleReporter {
    fn event(&self, event: &Event) {
        let _ = self.sender.send(UiEvent::Progress(event.clone()));
    }

    fn info(&self, msg: &str) {
        let _ = self.sender.send(UiEvent::Info(msg.to_string()));
    }

    fn warning(&self, msg: &str) {
        tracing::warn!("{msg}");
        let _ = self.sender.send(UiEvent::Warning(msg.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn test_events_are_forwarded_in_order() {
        let (tx, rx) = mpsc::channel();
        let reporter = ConsoleReporter::new(tx);
        reporter.event(&Event::started("fetch"));
        reporter.info("cache hit");
        reporter.event(&Event::success("fetch"));

        let got: Vec<_> = rx.try_iter().collect();
        assert!(matches!(&got[0], UiEvent::Progress(e) if *e == Event::started("fetch")));
        assert!(matches!(&got[1], UiEvent::Info(m) if m == "cache hit"));
        assert!(matches!(&got[2], UiEvent::Progress(e) if *e == Event::success("fetch")));
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        ConsoleReporter::new(tx).event(&Event::failure("late"));
    }
}
