//! Cancellable call futures and their combinators.
//!
//! Every layer of a channel hands out a [`CallFuture`]. It behaves like any
//! other future (await it, or drop it to give up), and adds an explicit
//! [`CallFuture::cancel`] that can be triggered from any thread through a
//! [`Canceller`].
//!
//! # Cancellation model
//!
//! Each `CallFuture` owns a small state machine (`RUNNING`, `COMPLETED`,
//! `CANCELLED`) and a slot naming the stage it currently waits on. The
//! combinators ([`CallFuture::transform`], [`CallFuture::transform_async`],
//! [`CallFuture::catch_all_async`]) move that slot forward as the
//! computation advances, so a cancel reaches the stage that is live at the
//! moment of cancellation and never one that already finished.
//!
//! - Only one `cancel` wins the transition to `CANCELLED`; cancel hooks run
//!   exactly once no matter how many threads race.
//! - Once cancelled, a future never resolves to a value. A late
//!   [`Response`] is closed, so it never counts as a leak.
//! - Dropping an unfinished `CallFuture` cancels it.
//!
//! Continuations run inline in the poll that observes the upstream result.
//! Polling does not recurse into completion callbacks, so long chains never
//! grow the stack.
//!
//! [`Response`]: crate::Response

use arc_swap::ArcSwapOption;
use futures::future::{BoxFuture, FutureExt};
use futures::task::AtomicWaker;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use crate::{ErrorKind, Response, Result};

const RUNNING: u8 = 0;
const COMPLETED: u8 = 1;
const CANCELLED: u8 = 2;

type CancelHook = Box<dyn FnOnce() + Send>;

/// Shared cancellation state of one [`CallFuture`]
struct Stage {
    status: AtomicU8,
    waker: AtomicWaker,
    /// The upstream stage this future currently waits on
    current: ArcSwapOption<Stage>,
    hooks: Mutex<Vec<CancelHook>>,
}

impl Stage {
    fn new() -> Self {
        Self {
            status: AtomicU8::new(RUNNING),
            waker: AtomicWaker::new(),
            current: ArcSwapOption::empty(),
            hooks: Mutex::new(Vec::new()),
        }
    }

    fn status(&self) -> u8 {
        self.status.load(Ordering::Acquire)
    }

    fn cancel(&self) -> bool {
        match self
            .status
            .compare_exchange(RUNNING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                if let Some(current) = self.current.swap(None) {
                    current.cancel();
                }
                let hooks = std::mem::take(
                    &mut *self.hooks.lock().unwrap_or_else(PoisonError::into_inner),
                );
                for hook in hooks {
                    hook();
                }
                self.waker.wake();
                true
            }
            Err(status) => status == CANCELLED,
        }
    }

    fn complete(&self) -> bool {
        let won = self
            .status
            .compare_exchange(RUNNING, COMPLETED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.current.store(None);
            self.hooks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
        won
    }

    fn follow(&self, upstream: &Arc<Stage>) {
        self.current.store(Some(Arc::clone(upstream)));
        // A cancel may have emptied the slot just before the store above
        if self.status() == CANCELLED
            && let Some(current) = self.current.swap(None)
        {
            current.cancel();
        }
    }

    fn on_cancel(&self, hook: CancelHook) {
        let mut hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        match self.status() {
            RUNNING => hooks.push(hook),
            CANCELLED => {
                drop(hooks);
                hook();
            }
            _ => {}
        }
    }
}

/// A handle that cancels a [`CallFuture`] from anywhere.
///
/// Cloning is cheap; all clones refer to the same future.
#[derive(Clone)]
pub struct Canceller {
    stage: Arc<Stage>,
}

impl Canceller {
    /// Cancel the future.
    ///
    /// Returns `true` if the future ends up cancelled, whether by this call
    /// or a concurrent one, and `false` if it had already completed.
    pub fn cancel(&self) -> bool {
        self.stage.cancel()
    }

    /// Returns `true` once the future was cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.stage.status() == CANCELLED
    }
}

impl fmt::Debug for Canceller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Canceller")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Handed to the body of [`CallFuture::with_tracker`] so it can point the
/// cancellation slot at whichever call it is currently awaiting.
#[derive(Clone)]
pub struct Tracker {
    stage: Arc<Stage>,
}

impl Tracker {
    /// Route future cancellations to `call` instead of any earlier stage
    pub fn follow<T>(&self, call: &CallFuture<T>) {
        self.stage.follow(&call.stage);
    }

    /// Returns `true` once the enclosing future was cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.stage.status() == CANCELLED
    }
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Dispose of a value nobody will receive, closing it if it is a response
fn discard<T: 'static>(result: Result<T>) {
    if let Ok(mut value) = result
        && let Some(response) = (&mut value as &mut dyn Any).downcast_mut::<Response>()
    {
        response.close();
    }
}

enum Inner<T> {
    Ready(Result<T>),
    Running(BoxFuture<'static, Result<T>>),
}

/// The asynchronous result of a call. See the [module docs](self).
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct CallFuture<T> {
    stage: Arc<Stage>,
    inner: Option<Inner<T>>,
    discard: fn(Result<T>),
}

impl<T: Send + 'static> CallFuture<T> {
    fn from_inner(stage: Arc<Stage>, inner: Inner<T>) -> Self {
        Self {
            stage,
            inner: Some(inner),
            discard: discard::<T>,
        }
    }

    /// Wrap a future
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self::from_inner(Arc::new(Stage::new()), Inner::Running(future.boxed()))
    }

    /// A future that resolves to `result` on first poll
    pub fn ready(result: Result<T>) -> Self {
        Self::from_inner(Arc::new(Stage::new()), Inner::Ready(result))
    }

    /// A future that fails with `error` on first poll
    pub fn failed(error: ErrorKind) -> Self {
        Self::ready(Err(error))
    }

    /// Build a future whose body can redirect cancellation to the calls it
    /// awaits, see [`Tracker::follow`].
    pub fn with_tracker<F, Fut>(body: F) -> Self
    where
        F: FnOnce(Tracker) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let stage = Arc::new(Stage::new());
        let future = body(Tracker {
            stage: Arc::clone(&stage),
        });
        Self::from_inner(stage, Inner::Running(future.boxed()))
    }

    /// Run `hook` exactly once if this future gets cancelled
    pub fn on_cancel(self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.stage.on_cancel(Box::new(hook));
        self
    }

    /// Map the successful value. `f` runs inline once the value is known.
    pub fn transform<U, F>(self, f: F) -> CallFuture<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        CallFuture::with_tracker(move |tracker| {
            tracker.follow(&self);
            async move { f(self.await?) }
        })
    }

    /// Chain another call on the successful value
    pub fn transform_async<U, F>(self, f: F) -> CallFuture<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> CallFuture<U> + Send + 'static,
    {
        CallFuture::with_tracker(move |tracker| {
            tracker.follow(&self);
            async move {
                let next = f(self.await?);
                tracker.follow(&next);
                next.await
            }
        })
    }

    /// Recover from a failure with another call.
    ///
    /// Cancellation is not a failure: it propagates unchanged and never
    /// reaches `f`.
    pub fn catch_all_async<F>(self, f: F) -> CallFuture<T>
    where
        F: FnOnce(ErrorKind) -> CallFuture<T> + Send + 'static,
    {
        CallFuture::with_tracker(move |tracker| {
            tracker.follow(&self);
            async move {
                match self.await {
                    Err(error) if !error.is_cancelled() => {
                        let next = f(error);
                        tracker.follow(&next);
                        next.await
                    }
                    result => result,
                }
            }
        })
    }
}

impl<T> CallFuture<T> {
    /// Cancel this future. See [`Canceller::cancel`].
    pub fn cancel(&self) -> bool {
        self.stage.cancel()
    }

    /// Returns `true` once this future was cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.stage.status() == CANCELLED
    }

    /// Returns `true` once this future resolved, with a value or cancelled
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.stage.status() != RUNNING
    }

    /// A handle that can cancel this future after it has been moved
    pub fn canceller(&self) -> Canceller {
        Canceller {
            stage: Arc::clone(&self.stage),
        }
    }
}

impl<T> Future for CallFuture<T> {
    type Output = Result<T>;

    /// # Panics
    ///
    /// Panics if polled again after returning `Ready`.
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        this.stage.waker.register(cx.waker());
        if this.stage.status() == CANCELLED {
            if let Some(Inner::Ready(result)) = this.inner.take() {
                (this.discard)(result);
            }
            return Poll::Ready(Err(ErrorKind::Cancelled));
        }
        let result = match this.inner.take() {
            Some(Inner::Ready(result)) => result,
            Some(Inner::Running(mut future)) => match future.as_mut().poll(cx) {
                Poll::Ready(result) => result,
                Poll::Pending => {
                    this.inner = Some(Inner::Running(future));
                    return Poll::Pending;
                }
            },
            None => panic!("CallFuture polled after completion"),
        };
        if matches!(result, Err(ErrorKind::Cancelled)) {
            this.stage.cancel();
            return Poll::Ready(Err(ErrorKind::Cancelled));
        }
        if this.stage.complete() {
            Poll::Ready(result)
        } else {
            // Lost the race against `cancel`
            (this.discard)(result);
            Poll::Ready(Err(ErrorKind::Cancelled))
        }
    }
}

// A ready value is never pinned in place; only the boxed future is
impl<T> Unpin for CallFuture<T> {}

impl<T> Drop for CallFuture<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            self.stage.cancel();
            if let Inner::Ready(result) = inner {
                (self.discard)(result);
            }
        }
    }
}

impl<T> fmt::Debug for CallFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.stage.status() {
            RUNNING => "running",
            COMPLETED => "completed",
            _ => "cancelled",
        };
        f.debug_struct("CallFuture").field("status", &status).finish()
    }
}
