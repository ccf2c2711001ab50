use super::{
    runner::PARALLEL_LAUNCHER, CalculationRequest, Failure, LauncherError, RunOutcome, Runner,
    TaskHandle,
};
use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::{
    any::Any,
    ffi::OsString,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use tracing::{debug, instrument, trace};

/// Number of tasks that were scheduled but have not stored their outcome yet
#[derive(Debug, Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        *self.count.lock() += 1;

        InFlightGuard(self.clone())
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock();

        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut count = self.0.count.lock();
        *count -= 1;

        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}

/// Executor that works on a local thread pool
///
/// Every calculation runs as an independent task on a pool of `max_workers` threads, each
/// worker blocks on its child process, so at most `max_workers` calculations run at once.
/// Submitting more simply queues them. After `shutdown` the launcher is closed for good.
#[derive(Debug)]
pub struct LocalLauncher {
    pool: Option<ThreadPool>,
    max_workers: usize,
    parallel_launcher: OsString,
    in_flight: Arc<InFlight>,
}

impl LocalLauncher {
    /// create a new LocalLauncher with a fixed number of workers
    pub fn new(max_workers: usize) -> Result<Self, LauncherError> {
        if max_workers == 0 {
            return Err(LauncherError::InvalidWorkers);
        }

        debug!("Starting thread pool with {max_workers} threads");
        let pool = ThreadPoolBuilder::new()
            .num_threads(max_workers)
            .thread_name(|index| format!("klaht-worker-{index}"))
            .build()?;

        Ok(Self {
            pool: Some(pool),
            max_workers,
            parallel_launcher: PARALLEL_LAUNCHER.clone(),
            in_flight: Arc::new(InFlight::default()),
        })
    }

    /// parallel launcher handed to every runner created by this launcher
    pub fn with_parallel_launcher(mut self, program: impl Into<OsString>) -> Self {
        self.parallel_launcher = program.into();
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_none()
    }

    /// Schedule every request on the pool and return one handle per request
    ///
    /// Returns without waiting on any calculation. Handles are in request order and carry the
    /// request's index. All requests are validated up front, an invalid one rejects the whole
    /// batch before anything is scheduled.
    #[instrument(skip_all, level = "debug")]
    pub fn submit_batch<I>(&self, requests: I) -> Result<Vec<TaskHandle>, LauncherError>
    where
        I: IntoIterator<Item = CalculationRequest>,
    {
        if self.is_closed() {
            return Err(LauncherError::Closed);
        }

        let runners = requests
            .into_iter()
            .enumerate()
            .map(|(index, request)| {
                Runner::new(request)
                    .map(|runner| runner.with_parallel_launcher(self.parallel_launcher.clone()))
                    .map_err(|source| LauncherError::InvalidRequest { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Submitting {} calculations", runners.len());

        runners
            .into_iter()
            .enumerate()
            .map(|(index, runner)| self.submit_task(index, move || runner.run()))
            .collect()
    }

    /// Schedule a single unit of work, the building block of `submit_batch`
    pub(crate) fn submit_task<F>(&self, index: usize, task: F) -> Result<TaskHandle, LauncherError>
    where
        F: FnOnce() -> RunOutcome + Send + 'static,
    {
        let pool = self.pool.as_ref().ok_or(LauncherError::Closed)?;
        let (handle, completer) = TaskHandle::pair(index);
        let guard = self.in_flight.enter();

        pool.spawn(move || {
            // released only after the outcome is stored, see `shutdown`
            let _guard = guard;

            trace!("Worker picked up calculation #{index}");
            let outcome = panic::catch_unwind(AssertUnwindSafe(task)).unwrap_or_else(|payload| {
                Failure::internal(format!("worker panicked: {}", panic_message(&*payload))).into()
            });

            completer.complete(outcome);
        });

        Ok(handle)
    }

    /// Block until every handle resolved and return their outcomes in handle order
    ///
    /// Never fails: faults of the task machinery surface as `InternalError` outcomes.
    pub fn join<I>(&self, handles: I) -> Vec<RunOutcome>
    where
        I: IntoIterator<Item = TaskHandle>,
    {
        handles.into_iter().map(|handle| handle.wait()).collect()
    }

    /// `submit_batch` followed by `join`
    pub fn run_batch<I>(&self, requests: I) -> Result<Vec<RunOutcome>, LauncherError>
    where
        I: IntoIterator<Item = CalculationRequest>,
    {
        let handles = self.submit_batch(requests)?;

        Ok(self.join(handles))
    }

    /// Stop accepting work, wait for all in-flight calculations and release the pool
    pub fn shutdown(&mut self) {
        if let Some(pool) = self.pool.take() {
            debug!("Shutting down, waiting on in-flight calculations");
            self.in_flight.wait_idle();

            drop(pool);
        }
    }
}

impl Drop for LocalLauncher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}
