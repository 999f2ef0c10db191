// Shared shape of the advertise and scan sessions

use super::aggregator::DetectionSummary;
use crate::clock::Millis;
use crate::ProximityError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Session state machine: Idle → Starting → Active → Stopping → Idle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Not running
    Idle,
    /// Start requested, waiting for the radio acknowledgment
    Starting,
    /// Radio acknowledged, duration timer armed
    Active,
    /// Tearing down
    Stopping,
}

impl SessionState {
    /// Starting or Active
    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Active)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Active => "active",
            SessionState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionKind {
    Advertise,
    Scan,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Advertise => f.write_str("advertise"),
            SessionKind::Scan => f.write_str("scan"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Explicit `stop()`
    Requested,
    /// Duration budget elapsed
    Expired,
}

/// Result of a guarded `start()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Transition to Starting; the radio acknowledgment arrives asynchronously
    Requested,
    /// The session was already starting or active; nothing was done
    AlreadyActive,
}

/// Events a session reports to its listener
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Started { started_at: Millis },
    /// Summaries flushed at the end of a scan session, delivered before `Stopped`
    Detections(Vec<DetectionSummary>),
    Stopped { reason: StopReason },
    /// Asynchronous start failure; the session is back to Idle
    Failed(ProximityError),
}

/// Sink for session events.
///
/// Called without any session lock held, so implementations may call back
/// into the session.
pub trait SessionListener: Send + Sync {
    fn on_session_event(&self, kind: SessionKind, event: SessionEvent);
}

/// Duration timer for one session epoch.
///
/// Arming replaces any previous timer. The callback receives the epoch it
/// was armed for so the session can ignore firings from a superseded run.
#[derive(Default)]
pub(crate) struct SessionTimer {
    handle: Option<JoinHandle<()>>,
}

impl SessionTimer {
    pub(crate) fn arm<F>(&mut self, epoch: u64, duration: Duration, on_expire: F)
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            on_expire(epoch);
        }));
    }

    pub(crate) fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Listener that records every event, for tests
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingListener {
    events: parking_lot::Mutex<Vec<(SessionKind, SessionEvent)>>,
}

#[cfg(test)]
impl RecordingListener {
    pub(crate) fn events(&self) -> Vec<(SessionKind, SessionEvent)> {
        self.events.lock().clone()
    }

    pub(crate) fn count(&self, matches: impl Fn(&SessionEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|(_, e)| matches(e)).count()
    }

    pub(crate) fn detections(&self) -> Vec<Vec<DetectionSummary>> {
        self.events
            .lock()
            .iter()
            .filter_map(|(_, e)| match e {
                SessionEvent::Detections(summaries) => Some(summaries.clone()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
impl SessionListener for RecordingListener {
    fn on_session_event(&self, kind: SessionKind, event: SessionEvent) {
        self.events.lock().push((kind, event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::Idle.to_string(), "idle");
        assert_eq!(SessionState::Active.to_string(), "active");
        assert!(SessionState::Starting.is_running());
        assert!(!SessionState::Stopping.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_with_its_epoch() {
        let fired = Arc::new(AtomicU64::new(0));
        let mut timer = SessionTimer::default();

        let seen = fired.clone();
        timer.arm(7, Duration::from_secs(30), move |epoch| {
            seen.store(epoch, Ordering::SeqCst);
        });
        assert!(timer.is_armed());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 7);
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_does_not_fire() {
        let fired = Arc::new(AtomicU64::new(0));
        let mut timer = SessionTimer::default();

        let seen = fired.clone();
        timer.arm(1, Duration::from_secs(30), move |epoch| {
            seen.store(epoch, Ordering::SeqCst);
        });
        timer.cancel();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_previous_timer() {
        let fired = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut timer = SessionTimer::default();

        let seen = fired.clone();
        timer.arm(1, Duration::from_secs(30), move |epoch| seen.lock().push(epoch));
        let seen = fired.clone();
        timer.arm(2, Duration::from_secs(30), move |epoch| seen.lock().push(epoch));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(*fired.lock(), vec![2]);
    }
}
