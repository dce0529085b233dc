//! Reporter trait for dependency injection
//!
//! Core operations report progress through this trait without being coupled
//! to a terminal. A missing reporter is always valid: helpers here take
//! `Option<&Arc<dyn Reporter>>` and do nothing when it is `None`.

use std::future::Future;
use std::sync::Arc;

use up_schema::Event;

/// Progress sink for long-running operations.
pub trait Reporter: Send + Sync {
    /// A progress event for a named sub-operation.
    fn event(&self, event: &Event);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);
}

impl<T: Reporter + ?Sized> Reporter for Arc<T> {
    fn event(&self, event: &Event) {
        (**self).event(event);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
}

/// A no-op reporter for silent operations (e.g., verification, testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn event(&self, _: &Event) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
}

/// Run `fut` bracketed by `Started` and `Success`/`Failure` events.
pub async fn track<T, E, F>(reporter: Option<&Arc<dyn Reporter>>, text: &str, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    if let Some(r) = reporter {
        r.event(&Event::started(text));
    }
    let res = fut.await;
    if let Some(r) = reporter {
        match &res {
            Ok(_) => r.event(&Event::success(text)),
            Err(_) => r.event(&Event::failure(text)),
        }
    }
    res
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records every event for assertions.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingReporter {
        pub(crate) events: Mutex<Vec<Event>>,
    }

    impl Reporter for RecordingReporter {
        fn event(&self, event: &Event) {
            self.events.lock().unwrap().push(event.clone());
        }
        fn info(&self, _: &str) {}
        fn warning(&self, _: &str) {}
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingReporter;
    use super::*;
    use up_schema::EventStatus;

    #[tokio::test]
    async fn test_track_brackets_events() {
        let rec = Arc::new(RecordingReporter::default());
        let reporter: Arc<dyn Reporter> = rec.clone();

        let ok: Result<u8, String> = track(Some(&reporter), "step one", async { Ok(1) }).await;
        assert_eq!(ok, Ok(1));
        let err: Result<u8, String> =
            track(Some(&reporter), "step two", async { Err("nope".to_string()) }).await;
        assert!(err.is_err());

        let events = rec.events.lock().unwrap();
        let statuses: Vec<_> = events.iter().map(|e| (e.text.as_str(), e.status)).collect();
        assert_eq!(
            statuses,
            [
                ("step one", EventStatus::Started),
                ("step one", EventStatus::Success),
                ("step two", EventStatus::Started),
                ("step two", EventStatus::Failure),
            ]
        );
    }

    #[tokio::test]
    async fn test_track_without_reporter() {
        let res: Result<(), ()> = track(None, "quiet", async { Ok(()) }).await;
        assert!(res.is_ok());
    }
}
