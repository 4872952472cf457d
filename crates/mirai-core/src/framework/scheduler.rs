//! Timers and task spawning behind one seam.
//!
//! Deadlines of pattern waits, deferred waiter clean-up and fallback dispatch
//! all go through a [`Scheduler`], so a session runs every piece of its work
//! on the runtime it was created on.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::runtime::Handle;

pub use tokio::time::Instant;

/// "Run this later" and "run this now".
pub trait Scheduler: Send + Sync + 'static {
    fn now(&self) -> Instant;

    /// A future that completes once `deadline` has passed.
    fn sleep_until(&self, deadline: Instant) -> BoxFuture<'static, ()>;

    /// Runs `task` concurrently with the caller.
    fn spawn(&self, task: BoxFuture<'static, ()>);

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.sleep_until(self.now() + duration)
    }
}

pub type SharedScheduler = Arc<dyn Scheduler>;

/// [`Scheduler`] backed by a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Binds to the runtime of the calling task.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime. Use [`try_current`](Self::try_current)
    /// to handle that case.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    pub fn shared(self) -> SharedScheduler {
        Arc::new(self)
    }
}

impl Scheduler for TokioScheduler {
    fn now(&self) -> Instant {
        let _guard = self.handle.enter();
        Instant::now()
    }

    fn sleep_until(&self, deadline: Instant) -> BoxFuture<'static, ()> {
        let _guard = self.handle.enter();
        Box::pin(tokio::time::sleep_until(deadline))
    }

    fn spawn(&self, task: BoxFuture<'static, ()>) {
        self.handle.spawn(task);
    }
}
