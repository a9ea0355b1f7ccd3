//! Isolated per-method worker.
//!
//! Each worker runs the pipeline on its own thread and hands the result
//! back through a one-shot channel. The caller polls or waits with a
//! timeout; dropping the worker abandons the result without interrupting
//! the thread. A panic inside a run is captured and surfaced as
//! [`Error::WorkerPanicked`], never silently swallowed and never affecting
//! any other in-flight method.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        mpsc::{self, RecvTimeoutError, TryRecvError},
        Arc,
    },
    thread,
    time::Duration,
};

use rayon::prelude::*;

use crate::{
    bytecode::{MethodCode, MethodId},
    pipeline::{decompile_method, DecompileOptions, Decompiled, WarningSink},
    Error, Result,
};

/// Handle to one method's decompilation running on its own thread.
#[derive(Debug)]
pub struct MethodWorker {
    method: MethodId,
    rx: mpsc::Receiver<Result<Decompiled>>,
    result: Option<Result<Decompiled>>,
    finished: bool,
}

impl MethodWorker {
    /// Starts decompiling `code` in the background.
    #[must_use]
    pub fn spawn(code: MethodCode, options: DecompileOptions, sink: Arc<WarningSink>) -> Self {
        let method = code.id.clone();
        let (tx, rx) = mpsc::sync_channel(1);
        thread::spawn(move || {
            let result = run_guarded(code, options, &sink);
            // The caller may have dropped its handle; a refused send is
            // the cooperative-abandonment path.
            let _ = tx.send(result);
        });
        Self {
            method,
            rx,
            result: None,
            finished: false,
        }
    }

    /// Returns `true` once the run has completed, without blocking.
    pub fn is_finished(&mut self) -> bool {
        self.poll();
        self.finished
    }

    /// Blocks until completion or until `timeout` elapses. Returns `true`
    /// when the run is finished.
    pub fn wait_timeout(&mut self, timeout: Duration) -> bool {
        if self.finished {
            return true;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(result) => {
                self.result = Some(result);
                self.finished = true;
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                self.mark_lost();
                true
            }
        }
    }

    /// Takes the result once finished; `None` while the run is still in
    /// flight. Never blocks.
    pub fn take_result(&mut self) -> Option<Result<Decompiled>> {
        self.poll();
        self.result.take()
    }

    fn poll(&mut self) {
        if self.finished {
            return;
        }
        match self.rx.try_recv() {
            Ok(result) => {
                self.result = Some(result);
                self.finished = true;
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => self.mark_lost(),
        }
    }

    // The sender vanished without delivering; report it as a fault
    // rather than pretending the run is still going.
    fn mark_lost(&mut self) {
        self.result = Some(Err(Error::WorkerPanicked {
            method: self.method.clone(),
            message: "worker thread exited without a result".to_string(),
        }));
        self.finished = true;
    }
}

/// Decompiles every method in parallel, one isolated unit per method.
///
/// Failures are per method; one method's error never disturbs the others.
#[must_use]
pub fn decompile_all(
    methods: Vec<MethodCode>,
    options: DecompileOptions,
    sink: &Arc<WarningSink>,
) -> Vec<(MethodId, Result<Decompiled>)> {
    methods
        .into_par_iter()
        .map(|code| {
            let method = code.id.clone();
            (method, run_guarded(code, options, sink))
        })
        .collect()
}

fn run_guarded(
    code: MethodCode,
    options: DecompileOptions,
    sink: &WarningSink,
) -> Result<Decompiled> {
    let method = code.id.clone();
    panic::catch_unwind(AssertUnwindSafe(|| decompile_method(code, options, sink)))
        .unwrap_or_else(|payload| {
            Err(Error::WorkerPanicked {
                method,
                message: panic_message(&payload),
            })
        })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
