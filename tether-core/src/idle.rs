// ABOUTME: Per-room inactivity timer management with cancel-then-rearm semantics
// ABOUTME: At most one live timer per room; the armed job id changes on every re-arm

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Owns the in-memory timers for app-scheduled idle timeouts.
///
/// The persisted [`TimerHandle`](crate::tokens::TimerHandle) mirrors the arm
/// state; this manager holds the actual cancellation handles, keyed by room,
/// so concurrent conversations never interfere with each other's timers.
#[derive(Clone)]
pub struct IdleTimeoutManager {
    timers: Arc<Mutex<HashMap<String, ArmedTimer>>>,
}

struct ArmedTimer {
    job_id: String,
    handle: tokio::task::JoinHandle<()>,
}

impl Default for IdleTimeoutManager {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleTimeoutManager {
    pub fn new() -> Self {
        Self {
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ArmedTimer>> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arm the inactivity timer for a room, replacing any existing one.
    ///
    /// Arming when already armed cancels the old timer first, so timers
    /// never stack. Returns the new job id. `on_fire` runs only if the timer
    /// is still the room's current one when the delay elapses.
    pub fn arm<F>(&self, room_id: &str, delay: Duration, on_fire: F) -> String
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let job_id = uuid::Uuid::new_v4().to_string();

        let timers = Arc::clone(&self.timers);
        let room = room_id.to_string();
        let fired_job_id = job_id.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // Fire only if we are still the armed timer for this room.
            // A cancel-then-rearm between our wakeup and this check loses.
            let still_armed = {
                let mut timers = timers.lock().unwrap_or_else(|e| e.into_inner());
                match timers.get(&room) {
                    Some(armed) if armed.job_id == fired_job_id => {
                        timers.remove(&room);
                        true
                    }
                    _ => false,
                }
            };

            if still_armed {
                tracing::debug!(room_id = %room, job_id = %fired_job_id, "Idle timer fired");
                on_fire.await;
            }
        });

        let mut timers = self.lock();
        if let Some(previous) = timers.insert(
            room_id.to_string(),
            ArmedTimer {
                job_id: job_id.clone(),
                handle,
            },
        ) {
            previous.handle.abort();
            tracing::debug!(
                room_id = %room_id,
                old_job_id = %previous.job_id,
                new_job_id = %job_id,
                "Idle timer re-armed"
            );
        } else {
            tracing::debug!(room_id = %room_id, job_id = %job_id, "Idle timer armed");
        }

        job_id
    }

    /// Cancel the room's timer if one is armed. Returns its job id.
    pub fn cancel(&self, room_id: &str) -> Option<String> {
        let removed = self.lock().remove(room_id);
        match removed {
            Some(armed) => {
                armed.handle.abort();
                tracing::debug!(room_id = %room_id, job_id = %armed.job_id, "Idle timer cancelled");
                Some(armed.job_id)
            }
            None => None,
        }
    }

    /// Job id of the currently armed timer for a room, if any.
    pub fn armed_job_id(&self, room_id: &str) -> Option<String> {
        self.lock().get(room_id).map(|a| a.job_id.clone())
    }

    /// Number of rooms with an armed timer.
    pub fn armed_count(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn timer_fires_after_delay() {
        let manager = IdleTimeoutManager::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let fired_clone = Arc::clone(&fired);
        manager.arm("room-a", Duration::from_secs(10), async move {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(manager.armed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_replaces_timer_without_stacking() {
        let manager = IdleTimeoutManager::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let f1 = Arc::clone(&fired);
        let first_job = manager.arm("room-a", Duration::from_secs(10), async move {
            f1.fetch_add(1, Ordering::SeqCst);
        });
        let f2 = Arc::clone(&fired);
        let second_job = manager.arm("room-a", Duration::from_secs(10), async move {
            f2.fetch_add(1, Ordering::SeqCst);
        });

        // Exactly one armed timer, with a new job id
        assert_ne!(first_job, second_job);
        assert_eq!(manager.armed_count(), 1);
        assert_eq!(manager.armed_job_id("room-a"), Some(second_job));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1, "only one timer may fire");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_fire() {
        let manager = IdleTimeoutManager::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&fired);
        let job_id = manager.arm("room-a", Duration::from_secs(5), async move {
            f.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(manager.cancel("room-a"), Some(job_id));
        assert_eq!(manager.armed_count(), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timers_are_per_room() {
        let manager = IdleTimeoutManager::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let f1 = Arc::clone(&fired);
        manager.arm("room-a", Duration::from_secs(5), async move {
            f1.fetch_add(1, Ordering::SeqCst);
        });
        let f2 = Arc::clone(&fired);
        manager.arm("room-b", Duration::from_secs(5), async move {
            f2.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(manager.armed_count(), 2);
        // Cancelling one room leaves the other armed
        manager.cancel("room-a");

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
