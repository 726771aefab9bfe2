//! The cooperative, single-threaded scheduler driving every session.
//!
//! One iteration: merge staged sessions into the active list, let each
//! session contribute prepare-phase housekeeping and a timer deadline, wait
//! once for the shortest deadline (capped at 100s), reap zombies, then run
//! each session's I/O step. The wait is the loop's only suspension point;
//! everything else is non-blocking.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::session::{Session, SessionId};

const MAX_WAIT: Duration = Duration::from_secs(100);
/// Cap on how long a single sleep call blocks, so new staged sessions and
/// signal flags are never left waiting behind one long refresh deadline.
const POLL_QUANTUM: Duration = Duration::from_millis(20);

/// Per-session refresh coalescing: a session becomes dirty at most once per
/// `refresh_delay`, tracked as a deadline rather than re-rendering every tick.
struct RefreshTimer {
    refresh_delay: Duration,
    due: Option<Instant>,
}

impl RefreshTimer {
    fn new(refresh_delay: Duration) -> Self {
        Self {
            refresh_delay,
            due: None,
        }
    }

    /// Arms a deadline if the session is dirty and none is pending yet.
    /// Returns the deadline to contribute to this iteration's wait, if any.
    fn prepare(&mut self, dirty: bool, now: Instant) -> Option<Instant> {
        if dirty && self.due.is_none() {
            self.due = Some(now + self.refresh_delay);
        }
        self.due
    }

    /// `true` once the deadline has passed; clears it so the next dirty
    /// mutation re-arms a fresh one.
    fn fire(&mut self, now: Instant) -> bool {
        match self.due {
            Some(due) if now >= due => {
                self.due = None;
                true
            }
            _ => false,
        }
    }
}

struct Managed {
    session: Session,
    refresh: RefreshTimer,
}

/// Owns the active and staging session lists and drives one loop iteration
/// at a time. Rendering and input dispatch are the caller's responsibility;
/// this type is concerned purely with scheduling PTY I/O.
pub struct EventLoop {
    active: Vec<Managed>,
    staging: Vec<Session>,
    default_refresh_delay: Duration,
}

/// What the caller should do once an iteration completes.
#[derive(Debug, Default)]
pub struct IterationReport {
    /// Sessions whose grid changed and whose refresh timer fired this pass.
    pub ready_to_render: Vec<SessionId>,
    /// Sessions that died this pass (PTY closed or reaped), already removed.
    pub died: Vec<SessionId>,
}

impl EventLoop {
    pub fn new(default_refresh_delay: Duration) -> Self {
        Self {
            active: Vec::new(),
            staging: Vec::new(),
            default_refresh_delay,
        }
    }

    /// Stage a newly-created session; it joins the active list on the next
    /// [`Self::run_iteration`] rather than mutating the active list now.
    pub fn stage(&mut self, session: Session) {
        self.staging.push(session);
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn session_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.active
            .iter_mut()
            .find(|m| m.session.id == id)
            .map(|m| &mut m.session)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.active.iter().map(|m| &m.session)
    }

    /// Runs one full iteration: merge, prepare, wait, reap, run.
    pub fn run_iteration(&mut self) -> IterationReport {
        self.merge_staged();

        let now = Instant::now();
        let mut due: Option<Instant> = None;
        for m in &mut self.active {
            let (dirty, _) = m.session.state(crate::session::StateOptions::default());
            if let Some(deadline) = m.refresh.prepare(dirty, now) {
                due = Some(due.map_or(deadline, |d| d.min(deadline)));
            }
        }

        let wait = due
            .map(|d| d.saturating_duration_since(Instant::now()))
            .unwrap_or(MAX_WAIT)
            .min(MAX_WAIT)
            .min(POLL_QUANTUM);
        if wait > Duration::ZERO {
            std::thread::sleep(wait);
        }

        let mut died = Vec::new();
        let mut ready_to_render = Vec::new();
        let now = Instant::now();

        self.active.retain_mut(|m| {
            if m.session.reap() {
                debug!(session_id = m.session.id, "session reaped, child exited");
                died.push(m.session.id);
                return false;
            }
            if m.session.step_read() {
                warn!(session_id = m.session.id, "pty read failed, dropping session");
                died.push(m.session.id);
                return false;
            }
            m.session.step_write();

            let (dirty, _) = m.session.state(crate::session::StateOptions::default());
            if dirty && m.refresh.fire(now) {
                ready_to_render.push(m.session.id);
                m.session.state(crate::session::StateOptions {
                    reset_modified: true,
                    want_snapshot: false,
                });
            }
            true
        });

        IterationReport {
            ready_to_render,
            died,
        }
    }

    fn merge_staged(&mut self) {
        for session in self.staging.drain(..) {
            self.active.push(Managed {
                refresh: RefreshTimer::new(self.default_refresh_delay),
                session,
            });
        }
    }

    /// Terminates every active session's child process; used on shutdown.
    pub fn kill_all(&mut self) {
        for m in &mut self.active {
            m.session.kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_timer_arms_once_and_fires_after_delay() {
        let mut t = RefreshTimer::new(Duration::from_millis(10));
        let t0 = Instant::now();
        assert!(t.prepare(true, t0).is_some());
        let deadline_again = t.prepare(true, t0);
        assert_eq!(t.due, deadline_again);
        assert!(!t.fire(t0));
        assert!(t.fire(t0 + Duration::from_millis(11)));
        assert!(t.due.is_none());
    }

    #[test]
    fn refresh_timer_does_not_arm_when_clean() {
        let mut t = RefreshTimer::new(Duration::from_millis(10));
        assert!(t.prepare(false, Instant::now()).is_none());
    }
}
