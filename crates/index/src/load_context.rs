use std::sync::{Arc, Condvar, Mutex};

use dedupe_index_common::IndexError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Opening,
    Ready,
    Suspending,
    Suspended,
    Freeing,
}

/// Suspend/resume rendezvous between an external orchestrator and the
/// construction/replay thread (spec §4.1 step 6, §5, §9 "coroutine-style
/// suspend"). A small state machine behind a mutex + condvar; the replay
/// loop polls it once per chapter via `check_for_suspend`. New: the teacher
/// has no direct analogue (single-process, nothing to suspend), so this is
/// built straight from the design note using `std::sync::{Mutex, Condvar}`
/// rather than `tokio` — suspension is a blocking cooperative poll on the
/// replay thread, not an async yield.
pub struct LoadContext {
    state: Mutex<State>,
    cv: Condvar,
}

impl LoadContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(State::Opening), cv: Condvar::new() })
    }

    /// Called by `make_index` once construction has concluded — success or
    /// failure — so a thread already waiting on `Ready` does not hang (spec
    /// §4.1 step 6, §7 "broadcasting READY/FAILED on the LoadContext").
    pub fn mark_ready(&self) {
        let mut state = self.state.lock().unwrap();
        *state = State::Ready;
        self.cv.notify_all();
    }

    /// Requested by the external orchestrator (never the replay thread
    /// itself) to pause an in-flight replay at its next chapter boundary.
    pub fn request_suspend(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == State::Opening {
            *state = State::Suspending;
            self.cv.notify_all();
        }
    }

    /// Resume a suspended (or not-yet-parked `Suspending`) replay.
    pub fn request_resume(&self) {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, State::Suspending | State::Suspended) {
            *state = State::Opening;
            self.cv.notify_all();
        }
    }

    /// Tear down: any replay cooperating with this context aborts with
    /// `ShuttingDown` at its next poll.
    pub fn request_free(&self) {
        let mut state = self.state.lock().unwrap();
        *state = State::Freeing;
        self.cv.notify_all();
    }

    pub fn is_suspended(&self) -> bool {
        *self.state.lock().unwrap() == State::Suspended
    }

    /// The only cooperative yield point inside replay (spec §4.2). On
    /// `Suspending`, publishes `Suspended`, broadcasts, and blocks until an
    /// external `request_resume` (back to `Opening`, replay continues) or
    /// `request_free` (abort with `ShuttingDown`).
    pub fn check_for_suspend(&self) -> Result<(), IndexError> {
        let mut state = self.state.lock().unwrap();
        loop {
            match *state {
                State::Suspending => {
                    *state = State::Suspended;
                    self.cv.notify_all();
                    state = self.cv.wait_while(state, |s| *s == State::Suspended).unwrap();
                }
                State::Freeing => return Err(IndexError::ShuttingDown),
                _ => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn suspend_then_resume_unblocks_check_for_suspend() {
        let ctx = LoadContext::new();
        ctx.request_suspend();

        let ctx2 = Arc::clone(&ctx);
        let handle = thread::spawn(move || ctx2.check_for_suspend());

        thread::sleep(Duration::from_millis(50));
        assert!(ctx.is_suspended());

        ctx.request_resume();
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn freeing_aborts_a_suspended_replay() {
        let ctx = LoadContext::new();
        ctx.request_suspend();
        let ctx2 = Arc::clone(&ctx);
        let handle = thread::spawn(move || ctx2.check_for_suspend());
        thread::sleep(Duration::from_millis(50));
        ctx.request_free();
        assert!(matches!(handle.join().unwrap(), Err(IndexError::ShuttingDown)));
    }

    #[test]
    fn mark_ready_unblocks_a_waiting_suspender_even_on_construction_failure() {
        let ctx = LoadContext::new();
        let ctx2 = Arc::clone(&ctx);
        let handle = thread::spawn(move || {
            let mut state = ctx2.state.lock().unwrap();
            state = ctx2.cv.wait_while(state, |s| *s == State::Opening).unwrap();
            *state == State::Ready
        });
        thread::sleep(Duration::from_millis(20));
        ctx.mark_ready();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn check_for_suspend_is_a_no_op_while_opening() {
        let ctx = LoadContext::new();
        assert!(ctx.check_for_suspend().is_ok());
    }
}
