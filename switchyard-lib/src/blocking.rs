//! Bridging synchronous transports and callers.
//!
//! [`CallingThreadExecutor`] drives a [`CallFuture`] to completion on the
//! thread that asks for the result, running any work submitted through its
//! [`ExecutorHandle`] on that same thread in the meantime. Once the awaited
//! call resolves, the queue is poisoned: later submissions fail with
//! [`ErrorKind::Rejected`] instead of vanishing, while work that was
//! already queued still runs.
//!
//! [`BlockingChannelAdapter`] turns a synchronous [`BlockingChannel`] into a
//! [`Channel`] by running each exchange on a [`TaskExecutor`].

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Wake, Waker};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::{CallFuture, Channel, Endpoint, ErrorKind, Request, Response, Result};

/// A unit of work for a [`TaskExecutor`]
pub type Task = Box<dyn FnOnce() + Send>;

/// Runs tasks somewhere
pub trait TaskExecutor: Send + Sync {
    /// Submit `task` for execution.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Rejected`] if the executor no longer accepts
    /// work.
    fn execute(&self, task: Task) -> Result<()>;
}

#[derive(Default)]
struct Queue {
    tasks: VecDeque<Task>,
    woken: bool,
    interrupted: bool,
    poisoned: bool,
}

#[derive(Default)]
struct Shared {
    queue: Mutex<Queue>,
    ready: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn signal(&self, update: impl FnOnce(&mut Queue)) {
        update(&mut self.lock());
        self.ready.notify_one();
    }
}

impl Wake for Shared {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.signal(|queue| queue.woken = true);
    }
}

enum Event {
    Task(Task),
    Woken,
    Interrupted,
}

/// Drives one call on the calling thread. See the [module docs](self).
pub struct CallingThreadExecutor {
    runtime: Handle,
    shared: Arc<Shared>,
}

impl CallingThreadExecutor {
    /// Create an executor. Timers and I/O of the awaited call are served by
    /// `runtime`, which must be driven by threads of its own.
    #[must_use]
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            shared: Arc::default(),
        }
    }

    /// A submitter for work that should run on the calling thread
    #[must_use]
    pub fn handle(&self) -> ExecutorHandle {
        ExecutorHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// A handle that aborts [`CallingThreadExecutor::run_until`]
    #[must_use]
    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Block until `call` resolves, running submitted tasks meanwhile.
    ///
    /// Do not call this from a thread that drives `runtime`.
    ///
    /// # Errors
    ///
    /// Returns the error of `call`, or [`ErrorKind::Cancelled`] if the
    /// executor was interrupted.
    pub fn run_until<T>(self, mut call: CallFuture<T>) -> Result<T> {
        let _runtime = self.runtime.enter();
        let waker = Waker::from(Arc::clone(&self.shared));
        let mut cx = Context::from_waker(&waker);

        loop {
            if let Poll::Ready(result) = Pin::new(&mut call).poll(&mut cx) {
                self.shutdown();
                return result;
            }
            loop {
                match self.next_event() {
                    Event::Task(task) => task(),
                    Event::Woken => break,
                    Event::Interrupted => {
                        log::debug!("Calling thread interrupted, cancelling its call");
                        self.shared.lock().poisoned = true;
                        call.cancel();
                        self.drain();
                        return Err(ErrorKind::Cancelled);
                    }
                }
            }
        }
    }

    fn next_event(&self) -> Event {
        let mut queue = self.shared.lock();
        loop {
            if queue.interrupted {
                return Event::Interrupted;
            }
            if let Some(task) = queue.tasks.pop_front() {
                return Event::Task(task);
            }
            if queue.woken {
                queue.woken = false;
                return Event::Woken;
            }
            queue = self
                .shared
                .ready
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn shutdown(&self) {
        self.shared.lock().poisoned = true;
        self.drain();
    }

    /// Run whatever was queued before the queue was poisoned
    fn drain(&self) {
        loop {
            let Some(task) = self.shared.lock().tasks.pop_front() else {
                return;
            };
            task();
        }
    }
}

impl fmt::Debug for CallingThreadExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.shared.lock();
        f.debug_struct("CallingThreadExecutor")
            .field("queued", &queue.tasks.len())
            .field("poisoned", &queue.poisoned)
            .finish_non_exhaustive()
    }
}

/// Submits work to a [`CallingThreadExecutor`]
#[derive(Clone)]
pub struct ExecutorHandle {
    shared: Arc<Shared>,
}

impl ExecutorHandle {
    /// Queue `task` to run on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Rejected`] once the awaited call has resolved or
    /// the executor was interrupted.
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) -> Result<()> {
        TaskExecutor::execute(self, Box::new(task))
    }
}

impl TaskExecutor for ExecutorHandle {
    fn execute(&self, task: Task) -> Result<()> {
        let mut queue = self.shared.lock();
        if queue.poisoned {
            return Err(ErrorKind::Rejected);
        }
        queue.tasks.push_back(task);
        drop(queue);
        self.shared.ready.notify_one();
        Ok(())
    }
}

impl fmt::Debug for ExecutorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorHandle").finish_non_exhaustive()
    }
}

/// Interrupts a [`CallingThreadExecutor`] from another thread.
///
/// The awaited call is cancelled and tasks that were already queued still
/// run; tasks that are running are left alone.
#[derive(Clone)]
pub struct Interrupter {
    shared: Arc<Shared>,
}

impl Interrupter {
    /// Interrupt the executor
    pub fn interrupt(&self) {
        self.shared.signal(|queue| queue.interrupted = true);
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupter").finish_non_exhaustive()
    }
}

/// Runs tasks on tokio's blocking thread pool
#[derive(Debug, Clone)]
pub struct TokioBlockingExecutor {
    runtime: Handle,
}

impl TokioBlockingExecutor {
    /// Use the blocking pool of `runtime`
    #[must_use]
    pub const fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Use the blocking pool of the current runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::NoRuntime`] outside of a tokio runtime.
    pub fn current() -> Result<Self> {
        Ok(Self::new(Handle::try_current()?))
    }
}

impl TaskExecutor for TokioBlockingExecutor {
    fn execute(&self, task: Task) -> Result<()> {
        drop(self.runtime.spawn_blocking(task));
        Ok(())
    }
}

/// A transport that performs one exchange synchronously
pub trait BlockingChannel: Send + Sync {
    /// Execute the call, blocking the current thread until the response
    /// headers arrived.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails.
    fn execute_blocking(&self, endpoint: &Endpoint, request: Request) -> Result<Response>;
}

/// Exposes a [`BlockingChannel`] as a [`Channel`]
pub struct BlockingChannelAdapter {
    channel: Arc<dyn BlockingChannel>,
    executor: Arc<dyn TaskExecutor>,
}

impl BlockingChannelAdapter {
    /// Run exchanges of `channel` on `executor`
    #[must_use]
    pub fn new(channel: Arc<dyn BlockingChannel>, executor: Arc<dyn TaskExecutor>) -> Self {
        Self { channel, executor }
    }
}

impl Channel for BlockingChannelAdapter {
    fn execute(&self, endpoint: &Endpoint, request: Request) -> CallFuture<Response> {
        let (sender, receiver) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let task = {
            let channel = Arc::clone(&self.channel);
            let endpoint = endpoint.clone();
            let cancelled = Arc::clone(&cancelled);
            move || {
                if cancelled.load(Ordering::Acquire) {
                    return;
                }
                let result = channel.execute_blocking(&endpoint, request);
                if let Err(Ok(mut response)) = sender.send(result) {
                    response.close();
                }
            }
        };
        if let Err(e) = self.executor.execute(Box::new(task)) {
            return CallFuture::failed(e);
        }
        CallFuture::new(async move { receiver.await.unwrap_or(Err(ErrorKind::Rejected)) })
            .on_cancel(move || cancelled.store(true, Ordering::Release))
    }
}
