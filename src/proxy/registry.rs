//! Session registry and inactivity monitor.
//!
//! The registry is the authority on which channels are live. It holds
//! non-owning handles: the session itself owns the upstream body and the
//! transcoder child, the registry only keeps enough to cancel a session from
//! outside (displacement, eviction, shutdown) and to render the status page.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How long a displaced session gets to release its tuner and subprocess
/// before the newcomer stops waiting.
const DISPLACE_GRACE: Duration = Duration::from_secs(2);
const DISPLACE_POLL: Duration = Duration::from_millis(25);

/// Last-delivery timestamp, updated on every chunk handed to the client and
/// read by the sweep. Milliseconds relative to the stamp's own epoch so the
/// update can be a single atomic store.
pub struct ActivityStamp {
    epoch: Instant,
    millis: AtomicU64,
}

impl Default for ActivityStamp {
    fn default() -> Self {
        Self {
            epoch: Instant::now(),
            millis: AtomicU64::new(0),
        }
    }
}

impl ActivityStamp {
    pub fn touch(&self) {
        self.millis
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let now = self.epoch.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.millis.load(Ordering::Relaxed)))
    }
}

/// Bookkeeping view of one live session.
#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: u64,
    pub channel: String,
    pub started_at: Instant,
    pub activity: Arc<ActivityStamp>,
    pub cancel: CancellationToken,
    pub transcoding: bool,
}

/// One row of the status page.
pub struct SessionSnapshot {
    pub channel: String,
    pub duration: Duration,
    pub transcoding: bool,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionHandle>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a session for `channel`, displacing any incumbent: the prior
    /// session is cancelled and given a bounded grace period to release its
    /// tuner and subprocess before the new handle is inserted.
    pub async fn begin_session(
        self: &Arc<Self>,
        channel: &str,
        transcoding: bool,
        parent: &CancellationToken,
    ) -> SessionHandle {
        let prior = {
            let sessions = self.sessions.lock().unwrap();
            sessions.get(channel).cloned()
        };

        if let Some(prior) = prior {
            info!(
                "Displacing existing session for channel {} (active for {:.2} seconds)",
                channel,
                prior.started_at.elapsed().as_secs_f64()
            );
            prior.cancel.cancel();

            let deadline = Instant::now() + DISPLACE_GRACE;
            while Instant::now() < deadline {
                let gone = {
                    let sessions = self.sessions.lock().unwrap();
                    !matches!(sessions.get(channel), Some(h) if h.session_id == prior.session_id)
                };
                if gone {
                    break;
                }
                tokio::time::sleep(DISPLACE_POLL).await;
            }

            // If the old session still has not unregistered, drop its entry;
            // the session-id check in `complete` keeps its late teardown from
            // touching the newcomer's slot.
            let mut sessions = self.sessions.lock().unwrap();
            if matches!(sessions.get(channel), Some(h) if h.session_id == prior.session_id) {
                debug!("Forcibly unregistering stale session for channel {}", channel);
                sessions.remove(channel);
            }
        }

        let handle = SessionHandle {
            session_id: self.next_id.fetch_add(1, Ordering::Relaxed),
            channel: channel.to_string(),
            started_at: Instant::now(),
            activity: Arc::new(ActivityStamp::default()),
            cancel: parent.child_token(),
            transcoding,
        };
        handle.activity.touch();

        let active = {
            let mut sessions = self.sessions.lock().unwrap();
            sessions.insert(channel.to_string(), handle.clone());
            sessions.len()
        };
        info!(
            "Registered {} session for channel {} (active streams: {})",
            if transcoding { "transcoded" } else { "direct" },
            channel,
            active
        );

        handle
    }

    /// Remove a session's entry, but only if it is still the registered one.
    /// Returns the handle when this call performed the removal.
    pub fn complete(&self, channel: &str, session_id: u64) -> Option<SessionHandle> {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get(channel) {
            Some(h) if h.session_id == session_id => sessions.remove(channel),
            _ => None,
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        self.sessions
            .lock()
            .unwrap()
            .values()
            .map(|h| SessionSnapshot {
                channel: h.channel.clone(),
                duration: h.started_at.elapsed(),
                transcoding: h.transcoding,
            })
            .collect()
    }

    /// Cancel every live session. Each performs its own teardown and
    /// unregisters itself.
    pub fn cancel_all(&self) {
        let sessions = self.sessions.lock().unwrap();
        for handle in sessions.values() {
            info!(
                "Stopping active stream for channel {} (duration: {:.2} seconds)",
                handle.channel,
                handle.started_at.elapsed().as_secs_f64()
            );
            handle.cancel.cancel();
        }
    }

    /// Spawn the inactivity sweep. Sessions whose last client delivery is
    /// older than `max_inactivity` get cancelled; their own teardown removes
    /// them from the registry. Exits when `shutdown` fires.
    pub fn spawn_monitor(
        self: &Arc<Self>,
        check_interval: Duration,
        max_inactivity: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        info!(
            "Starting connection monitor with check interval: {:?}, max inactivity: {:?}",
            check_interval, max_inactivity
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Connection monitor stopped");
                        return;
                    }
                    _ = ticker.tick() => registry.sweep_inactive(max_inactivity),
                }
            }
        })
    }

    fn sweep_inactive(&self, max_inactivity: Duration) {
        let idle: Vec<SessionHandle> = {
            let sessions = self.sessions.lock().unwrap();
            sessions
                .values()
                .filter(|h| h.activity.idle_for() > max_inactivity)
                .cloned()
                .collect()
        };

        for handle in idle {
            info!(
                "Detected inactive stream for channel {} (inactive for {:?}), cleaning up",
                handle.channel,
                handle.activity.idle_for()
            );
            handle.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn one_session_per_channel() {
        let registry = SessionRegistry::new();
        let root = CancellationToken::new();

        let first = registry.begin_session("5.1", true, &root).await;
        assert_eq!(registry.active_count(), 1);

        // Second request for the same channel displaces the first.
        let second = registry.begin_session("5.1", true, &root).await;
        assert_eq!(registry.active_count(), 1);
        assert!(first.cancel.is_cancelled());
        assert!(!second.cancel.is_cancelled());

        let current = registry.snapshot();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].channel, "5.1");
    }

    #[tokio::test]
    async fn displacement_waits_for_voluntary_release() {
        let registry = SessionRegistry::new();
        let root = CancellationToken::new();

        let first = registry.begin_session("5.1", false, &root).await;

        // Simulate the first session tearing itself down on cancellation.
        let registry_clone = registry.clone();
        let first_clone = first.clone();
        tokio::spawn(async move {
            first_clone.cancel.cancelled().await;
            registry_clone.complete(&first_clone.channel, first_clone.session_id);
        });

        let second = registry.begin_session("5.1", false, &root).await;
        assert_ne!(first.session_id, second.session_id);
        assert_eq!(registry.active_count(), 1);
    }

    #[tokio::test]
    async fn stale_completion_does_not_evict_successor() {
        let registry = SessionRegistry::new();
        let root = CancellationToken::new();

        let first = registry.begin_session("5.1", false, &root).await;
        let second = registry.begin_session("5.1", false, &root).await;

        // The displaced session's late teardown must be a no-op.
        assert!(registry.complete("5.1", first.session_id).is_none());
        assert_eq!(registry.active_count(), 1);

        assert!(registry.complete("5.1", second.session_id).is_some());
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn sweep_cancels_only_idle_sessions() {
        let registry = SessionRegistry::new();
        let root = CancellationToken::new();

        let idle = registry.begin_session("5.1", true, &root).await;
        let busy = registry.begin_session("7.1", false, &root).await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        busy.activity.touch();
        registry.sweep_inactive(Duration::from_millis(250));

        assert!(idle.cancel.is_cancelled());
        assert!(!busy.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_all_fires_every_token() {
        let registry = SessionRegistry::new();
        let root = CancellationToken::new();

        let a = registry.begin_session("5.1", true, &root).await;
        let b = registry.begin_session("7.1", false, &root).await;

        registry.cancel_all();
        assert!(a.cancel.is_cancelled());
        assert!(b.cancel.is_cancelled());
    }

    #[test]
    fn activity_stamp_tracks_idleness() {
        let stamp = ActivityStamp::default();
        stamp.touch();
        assert!(stamp.idle_for() < Duration::from_secs(1));
    }
}
