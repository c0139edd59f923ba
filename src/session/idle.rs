use std::{
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::session::state::{Session, SessionStatus};

/// Handle to one armed idle timer. Dropping it cancels the timer.
pub struct IdleTimer {
    id: u64,
    token: CancellationToken,
}

impl IdleTimer {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Arms and cancels the single idle-teardown timer each session may hold.
///
/// The timer handle is stored in the [`Session`] itself. When the delay
/// elapses, `on_fire` receives the timer id; the handler must re-check under
/// the session lock that this id is still the armed one, which closes the
/// window between the sleep finishing and a concurrent `cancel`.
pub struct IdleTimeoutScheduler {
    delay: Duration,
    next_id: AtomicU64,
}

impl IdleTimeoutScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Arms a timer for `session`, silently replacing any armed one.
    pub fn arm<F, Fut>(&self, session: &mut Session, on_fire: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let delay = self.delay;
        let deadline = tokio::time::Instant::now() + delay;
        let key = session.key().clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => {
                    trace!("[{}] idle timer {} cancelled", key, id);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    debug!("[{}] idle timer {} elapsed after {:?}", key, id, delay);
                    on_fire(id).await;
                }
            }
        });

        // Replacing drops, and thereby cancels, the previous handle.
        session.idle_timer = Some(IdleTimer { id, token });
        session.transition(SessionStatus::IdlePendingTeardown);
        id
    }

    /// Cancels the armed timer, if any. The session moves to `Connecting`
    /// because only a resumed play or a teardown cancels a pending timer, and
    /// teardown sets its own final status.
    pub fn cancel(&self, session: &mut Session) -> bool {
        match session.idle_timer.take() {
            Some(timer) => {
                debug!("[{}] idle timer {} cancelled", session.key(), timer.id());
                drop(timer);
                session.transition(SessionStatus::Connecting);
                true
            }
            None => false,
        }
    }
}
