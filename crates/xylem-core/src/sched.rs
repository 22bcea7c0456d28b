//! Scheduled auto-commit.
//!
//! A background worker that periodically commits pending modifications.
//! The worker serializes behind the same writer mutex as every public edit,
//! so it always observes a consistent invariant state. Shutdown is a
//! condvar handshake with a bounded grace period; a worker that fails to
//! acknowledge in time surfaces as `ThreadInterrupted`.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use xylem_error::{Result, XylemError};
use xylem_store::Session;

use crate::write::WriteTrxInner;

#[derive(Default)]
struct WorkerState {
    shutdown: bool,
    stopped: bool,
}

struct WorkerShared {
    state: Mutex<WorkerState>,
    signal: Condvar,
}

pub(crate) struct AutoCommitWorker {
    shared: Arc<WorkerShared>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl AutoCommitWorker {
    pub(crate) fn spawn<S: Session>(
        trx: Weak<Mutex<WriteTrxInner<S>>>,
        interval: Duration,
    ) -> Result<Self> {
        let shared = Arc::new(WorkerShared {
            state: Mutex::new(WorkerState::default()),
            signal: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("xylem-auto-commit".to_owned())
            .spawn(move || {
                run_worker(&worker_shared, &trx, interval);
                let mut state = worker_shared.state.lock();
                state.stopped = true;
                worker_shared.signal.notify_all();
            })?;
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Signal shutdown without waiting for the worker to stop.
    pub(crate) fn request_stop(&self) {
        let mut state = self.shared.state.lock();
        state.shutdown = true;
        self.shared.signal.notify_all();
    }

    /// Signal shutdown and wait up to `grace` for the worker to stop.
    pub(crate) fn shutdown(mut self, grace: Duration) -> Result<()> {
        self.request_stop();
        let deadline = Instant::now() + grace;
        {
            let mut state = self.shared.state.lock();
            while !state.stopped {
                if self
                    .shared
                    .signal
                    .wait_until(&mut state, deadline)
                    .timed_out()
                {
                    // Leave the worker detached; it will observe the
                    // shutdown flag on its next wakeup.
                    self.handle.take();
                    return Err(XylemError::ThreadInterrupted);
                }
            }
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

fn run_worker<S: Session>(
    shared: &WorkerShared,
    trx: &Weak<Mutex<WriteTrxInner<S>>>,
    interval: Duration,
) {
    loop {
        let timed_out = {
            let mut state = shared.state.lock();
            if state.shutdown {
                return;
            }
            let timed_out = shared.signal.wait_for(&mut state, interval).timed_out();
            if state.shutdown {
                return;
            }
            timed_out
        };
        if !timed_out {
            continue;
        }
        let Some(inner) = trx.upgrade() else {
            return;
        };
        let mut guard = inner.lock();
        if guard.is_closed() {
            return;
        }
        if guard.modifications == 0 {
            continue;
        }
        debug!(
            trx_id = guard.trx_id,
            modifications = guard.modifications,
            "scheduled auto-commit"
        );
        if let Err(e) = guard.commit_internal() {
            error!(trx_id = guard.trx_id, error = %e, "scheduled auto-commit failed");
            guard.auto_commit_failure = Some(e.to_string());
        }
    }
}
