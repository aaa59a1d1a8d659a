//! Owner-thread hand-off.
//!
//! Data sources may only be read on the thread that owns them (typically a
//! UI event thread). A conversion requested from another thread is wrapped
//! in a [`HandoffJob`], posted to that thread through an
//! [`EventDispatcher`], and the caller blocks on a capacity-1 channel until
//! the result comes back.
//!
//! Failures inside the job never reach the waiting thread as errors: they
//! are logged and delivered as "no data" so the waiter cannot deadlock.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::error::{DataTransferError, Result};
use crate::format::Format;
use crate::index::RankedFormats;
use crate::translate::{DataTransferer, Transferable};

/// Work queued for the owning thread
pub type Task = Box<dyn FnOnce() + Send + 'static>;

type Conversion = Box<dyn FnOnce() -> Result<Option<Vec<u8>>> + Send + 'static>;

/// Runs tasks on the thread that owns the data sources
pub trait EventDispatcher: Send + Sync {
    /// Queue `task` on the owning thread
    fn post(&self, task: Task) -> Result<()>;

    /// Whether the calling thread is the owning thread
    fn is_dispatch_thread(&self) -> bool {
        false
    }

    /// Queue a conversion job
    fn post_conversion(&self, job: Arc<HandoffJob>) -> Result<()> {
        self.post(Box::new(move || {
            job.run();
        }))
    }
}

/// A single conversion posted across threads.
///
/// The job runs at most once no matter how many times it is serviced, and
/// its result is sent on a capacity-1 channel.
pub struct HandoffJob {
    conversion: Mutex<Option<Conversion>>,
    result_tx: Sender<Option<Vec<u8>>>,
}

impl fmt::Debug for HandoffJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandoffJob")
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl HandoffJob {
    /// Wrap `conversion`, returning the job and the receiver its result
    /// arrives on
    pub fn new<F>(conversion: F) -> (Arc<Self>, Receiver<Option<Vec<u8>>>)
    where
        F: FnOnce() -> Result<Option<Vec<u8>>> + Send + 'static,
    {
        let (result_tx, result_rx) = bounded(1);
        let job = Arc::new(Self {
            conversion: Mutex::new(Some(Box::new(conversion))),
            result_tx,
        });
        (job, result_rx)
    }

    /// Whether the job has yet to run
    pub fn is_pending(&self) -> bool {
        self.conversion.lock().is_some()
    }

    /// Run the conversion and post its result. Returns `false` when the job
    /// already ran.
    pub fn run(&self) -> bool {
        // Taken before running so a re-entrant call sees an empty slot
        let Some(conversion) = self.conversion.lock().take() else {
            trace!("Hand-off job already serviced");
            return false;
        };

        let result = match panic::catch_unwind(AssertUnwindSafe(conversion)) {
            Ok(Ok(data)) => data,
            Ok(Err(e)) => {
                warn!(error = %e, "Data conversion failed on owning thread");
                None
            }
            Err(_) => {
                error!("Data conversion panicked on owning thread");
                None
            }
        };

        if self.result_tx.try_send(result).is_err() {
            debug!("Hand-off result dropped, requester is gone");
        }
        true
    }
}

/// Channel-backed dispatcher drained by the thread that created it
pub struct ChannelDispatcher {
    task_tx: Sender<Task>,
    task_rx: Receiver<Task>,
    current: Arc<Mutex<Option<Arc<HandoffJob>>>>,
    owner: ThreadId,
}

impl fmt::Debug for ChannelDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelDispatcher")
            .field("queued", &self.task_rx.len())
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl Default for ChannelDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelDispatcher {
    /// Create a dispatcher owned by the calling thread
    pub fn new() -> Self {
        let (task_tx, task_rx) = unbounded();
        Self {
            task_tx,
            task_rx,
            current: Arc::new(Mutex::new(None)),
            owner: thread::current().id(),
        }
    }

    /// Number of queued tasks
    pub fn pending(&self) -> usize {
        self.task_rx.len()
    }

    /// Run every queued task without blocking. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.task_rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for one task and run it
    pub fn run_next(&self, timeout: Duration) -> bool {
        match self.task_rx.recv_timeout(timeout) {
            Ok(task) => {
                task();
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Run tasks until none arrives for `idle`. Returns how many ran.
    pub fn run_until_idle(&self, idle: Duration) -> usize {
        let mut ran = 0;
        while self.run_next(idle) {
            ran += 1;
        }
        ran
    }

    /// Service the conversion most recently posted, for nested event loops
    /// that cannot return to the main queue. Returns whether a job ran.
    pub fn process_data_conversion_requests(&self) -> bool {
        let job = self.current.lock().take();
        job.is_some_and(|job| job.run())
    }
}

impl EventDispatcher for ChannelDispatcher {
    fn post(&self, task: Task) -> Result<()> {
        self.task_tx
            .send(task)
            .map_err(|_| DataTransferError::HandoffDisconnected)
    }

    fn is_dispatch_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    fn post_conversion(&self, job: Arc<HandoffJob>) -> Result<()> {
        *self.current.lock() = Some(Arc::clone(&job));
        let current = Arc::clone(&self.current);
        self.post(Box::new(move || {
            job.run();
            // Only clear the slot if a newer job has not replaced it
            let mut slot = current.lock();
            if slot.as_ref().is_some_and(|c| Arc::ptr_eq(c, &job)) {
                *slot = None;
            }
        }))
    }
}

impl DataTransferer {
    /// Translate `contents` into `format` using the flavor `formats` chose
    /// for it.
    ///
    /// Without a dispatcher, or when already on the owning thread, the
    /// translation runs inline and errors propagate. Otherwise the work is
    /// handed to the owning thread and this call blocks until it answers;
    /// failures there come back as `Ok(None)`.
    pub fn convert_data(
        &self,
        contents: Arc<dyn Transferable>,
        format: Format,
        formats: &RankedFormats,
        dispatcher: Option<&dyn EventDispatcher>,
    ) -> Result<Option<Vec<u8>>> {
        let Some(flavor) = formats.get(format).cloned() else {
            debug!(format = %format, "No flavor negotiated for format");
            return Ok(None);
        };

        let dispatcher = match dispatcher {
            Some(d) if !d.is_dispatch_thread() => d,
            _ => return self.translate_transferable(contents.as_ref(), &flavor, format),
        };

        let engine = self.clone();
        let (job, result_rx) = HandoffJob::new(move || {
            engine.translate_transferable(contents.as_ref(), &flavor, format)
        });

        trace!(format = %format, "Handing conversion to owning thread");
        dispatcher.post_conversion(job)?;

        result_rx
            .recv()
            .map_err(|_| DataTransferError::HandoffDisconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_job_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let (job, rx) = HandoffJob::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Some(vec![7]))
        });

        assert!(job.is_pending());
        assert!(job.run());
        assert!(!job.run());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(rx.recv().unwrap(), Some(vec![7]));
    }

    #[test]
    fn test_reentrant_run_is_noop() {
        let slot: Arc<Mutex<Option<Arc<HandoffJob>>>> = Arc::new(Mutex::new(None));
        let inner = Arc::clone(&slot);
        let (job, rx) = HandoffJob::new(move || {
            let nested = inner.lock().clone();
            let reran = nested.is_some_and(|j| j.run());
            Ok(Some(vec![u8::from(reran)]))
        });
        *slot.lock() = Some(Arc::clone(&job));

        assert!(job.run());
        assert_eq!(rx.recv().unwrap(), Some(vec![0]));
    }

    #[test]
    fn test_failures_delivered_as_none() {
        let (job, rx) = HandoffJob::new(|| Err(DataTransferError::unsupported("nope")));
        job.run();
        assert_eq!(rx.recv().unwrap(), None);

        let (job, rx) = HandoffJob::new(|| panic!("boom"));
        job.run();
        assert_eq!(rx.recv().unwrap(), None);
    }

    #[test]
    fn test_dispatcher_owner_and_queue() {
        let dispatcher = ChannelDispatcher::new();
        assert!(dispatcher.is_dispatch_thread());

        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let counter = Arc::clone(&count);
            dispatcher
                .post(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }
        assert_eq!(dispatcher.pending(), 3);
        assert_eq!(dispatcher.run_pending(), 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(!dispatcher.run_next(Duration::from_millis(1)));
    }

    #[test]
    fn test_conversion_request_serviced_once() {
        let dispatcher = ChannelDispatcher::new();
        let (job, rx) = HandoffJob::new(|| Ok(Some(b"x".to_vec())));
        dispatcher.post_conversion(job).unwrap();

        assert!(dispatcher.process_data_conversion_requests());
        assert!(!dispatcher.process_data_conversion_requests());
        // The queued copy finds the job already serviced
        assert_eq!(dispatcher.run_pending(), 1);
        assert_eq!(rx.recv().unwrap(), Some(b"x".to_vec()));
    }

    #[test]
    fn test_serviced_job_leaves_current_slot() {
        let dispatcher = ChannelDispatcher::new();
        let (job, rx) = HandoffJob::new(|| Ok(Some(vec![1])));
        dispatcher.post_conversion(job).unwrap();

        assert_eq!(dispatcher.run_pending(), 1);
        assert_eq!(rx.recv().unwrap(), Some(vec![1]));
        assert!(dispatcher.current.lock().is_none());
        assert!(!dispatcher.process_data_conversion_requests());
    }

    #[test]
    fn test_older_job_keeps_newer_in_slot() {
        let dispatcher = ChannelDispatcher::new();
        let (first, first_rx) = HandoffJob::new(|| Ok(Some(vec![1])));
        let (second, second_rx) = HandoffJob::new(|| Ok(Some(vec![2])));
        dispatcher.post_conversion(first).unwrap();
        dispatcher.post_conversion(Arc::clone(&second)).unwrap();

        // Running the first queued task must not drop the second job
        assert!(dispatcher.run_next(Duration::from_millis(10)));
        assert_eq!(first_rx.recv().unwrap(), Some(vec![1]));
        assert!(dispatcher
            .current
            .lock()
            .as_ref()
            .is_some_and(|c| Arc::ptr_eq(c, &second)));

        assert!(dispatcher.process_data_conversion_requests());
        assert_eq!(second_rx.recv().unwrap(), Some(vec![2]));
    }
}
