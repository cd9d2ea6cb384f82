//! Recording observers and wait helpers

use bulksend_core::{ProgressSnapshot, StatusSnapshot, StreamEvent, StreamObserver};
use std::{
    future::Future,
    sync::Mutex,
    time::{Duration, Instant},
};
use tokio::sync::Notify;

// ----------------------------------------------------------------------------
// Collecting Observer
// ----------------------------------------------------------------------------

/// Observer that keeps every event it receives
#[derive(Default)]
pub struct CollectingObserver {
    events: Mutex<Vec<StreamEvent>>,
    notify: Notify,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn statuses(&self) -> Vec<StatusSnapshot> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                StreamEvent::Status(snapshot) => Some(snapshot),
                _ => None,
            })
            .collect()
    }

    pub fn progress(&self) -> Vec<ProgressSnapshot> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                StreamEvent::Progress(snapshot) => Some(snapshot),
                _ => None,
            })
            .collect()
    }

    pub fn last_status(&self) -> Option<StatusSnapshot> {
        self.statuses().pop()
    }

    pub fn last_progress(&self) -> Option<ProgressSnapshot> {
        self.progress().pop()
    }

    /// Number of stream-dropped notices received
    pub fn dropped_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, StreamEvent::Dropped { .. }))
            .count()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    /// Wait until the recorded events satisfy `predicate`
    pub async fn wait_for<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&[StreamEvent]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if predicate(&self.events()) {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            // Timing out here just triggers the final check
            let _ = tokio::time::timeout(remaining, notified).await;
        }
    }

    /// Wait for a status snapshot matching `predicate`
    pub async fn wait_for_status<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&StatusSnapshot) -> bool,
    {
        self.wait_for(timeout, |events| {
            events.iter().any(|event| match event {
                StreamEvent::Status(snapshot) => predicate(snapshot),
                _ => false,
            })
        })
        .await
    }

    /// Wait for a progress snapshot matching `predicate`
    pub async fn wait_for_progress<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&ProgressSnapshot) -> bool,
    {
        self.wait_for(timeout, |events| {
            events.iter().any(|event| match event {
                StreamEvent::Progress(snapshot) => predicate(snapshot),
                _ => false,
            })
        })
        .await
    }
}

impl StreamObserver for CollectingObserver {
    fn on_event(&self, event: StreamEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
        self.notify.notify_waiters();
    }
}

// ----------------------------------------------------------------------------
// Wait Helpers
// ----------------------------------------------------------------------------

/// Poll an async condition until it holds or the timeout passes
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulksend_core::StreamKind;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_wait_for_wakes_on_event() {
        let observer = Arc::new(CollectingObserver::new());
        let sink = observer.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            sink.on_event(StreamEvent::Dropped {
                kind: StreamKind::Status,
                reason: "gone".to_string(),
            });
        });

        assert!(
            observer
                .wait_for(Duration::from_secs(1), |events| !events.is_empty())
                .await
        );
        assert_eq!(observer.dropped_count(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let observer = CollectingObserver::new();
        assert!(
            !observer
                .wait_for(Duration::from_millis(20), |events| !events.is_empty())
                .await
        );
    }

    #[tokio::test]
    async fn test_wait_until() {
        let started = Instant::now();
        assert!(
            wait_until(Duration::from_secs(1), || async move {
                started.elapsed() >= Duration::from_millis(15)
            })
            .await
        );
    }
}
