//! Interrupt routing between "exit the process" and "leave watch mode".
//!
//! The session registers a [`CancelScope`] whenever it starts streaming and
//! drops it when it stops. An interrupt is dispatched under the same lock that
//! guards registration, so it lands either wholly before or wholly after a
//! mode transition.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

/// Which consumer an interrupt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Normal,
    Streaming,
}

/// What the router did with one interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Delivered to the live scope (or one was already pending there).
    Cancelled,
    /// No scope registered: the process should exit.
    Terminate,
}

struct Registration {
    id: u64,
    cancel: mpsc::Sender<()>,
}

#[derive(Default)]
pub struct SignalRouter {
    slot: Mutex<Option<Registration>>,
    next_id: AtomicU64,
}

impl SignalRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn slot(&self) -> MutexGuard<'_, Option<Registration>> {
        // The slot only holds plain data, so a poisoned lock is still consistent.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mode(&self) -> SessionMode {
        match *self.slot() {
            Some(_) => SessionMode::Streaming,
            None => SessionMode::Normal,
        }
    }

    /// Switches the router to streaming; dropping the scope switches it back.
    ///
    /// A newer scope replaces an older one, so at most one consumer is live.
    pub fn enter_streaming(self: &Arc<Self>) -> CancelScope {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        // Capacity one: repeated interrupts collapse into one pending cancellation.
        let (cancel, cancelled) = mpsc::channel(1);
        *self.slot() = Some(Registration { id, cancel });
        debug!(scope = id, "cancel scope registered");

        CancelScope {
            id,
            router: Arc::clone(self),
            cancelled,
        }
    }

    fn release(&self, id: u64) {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|registration| registration.id == id) {
            *slot = None;
            debug!(scope = id, "cancel scope released");
        }
    }

    /// Routes one interrupt. Never fails.
    pub fn interrupt(&self) -> Dispatch {
        let slot = self.slot();
        match slot.as_ref() {
            Some(registration) => {
                // Full means a cancellation is already queued; Closed means the
                // scope is being torn down. Either way the stream is ending.
                let _ = registration.cancel.try_send(());
                debug!(scope = registration.id, "interrupt routed to cancel scope");
                Dispatch::Cancelled
            }
            None => Dispatch::Terminate,
        }
    }

    /// Routes interrupts until one must terminate the process, then returns.
    ///
    /// Returns `false` instead if the interrupt source ends first.
    pub async fn listen<S>(&self, interrupts: S) -> bool
    where
        S: Stream<Item = ()>,
    {
        futures::pin_mut!(interrupts);
        while interrupts.next().await.is_some() {
            if self.interrupt() == Dispatch::Terminate {
                return true;
            }
        }
        false
    }
}

/// Live registration for one streaming session.
pub struct CancelScope {
    id: u64,
    router: Arc<SignalRouter>,
    cancelled: mpsc::Receiver<()>,
}

impl CancelScope {
    /// Resolves once an interrupt is routed to this scope.
    pub async fn cancelled(&mut self) {
        // The router keeps the sender while the scope is registered, so a
        // closed channel only happens after a newer scope replaced this one.
        let _ = self.cancelled.recv().await;
    }
}

impl Drop for CancelScope {
    fn drop(&mut self) {
        self.router.release(self.id);
    }
}

/// Process interrupts (Ctrl-C) as a stream; ends if the handler cannot be installed.
///
/// One listener is registered up front and kept for the stream's lifetime, so
/// an interrupt arriving between two polls is still delivered.
#[cfg(unix)]
pub fn ctrl_c_stream() -> impl Stream<Item = ()> {
    use tokio::signal::unix::{SignalKind, signal};

    let interrupts = signal(SignalKind::interrupt())
        .map_err(|error| tracing::warn!(?error, "failed to install interrupt handler"))
        .ok();
    futures::stream::unfold(interrupts, |interrupts| async move {
        let mut interrupts = interrupts?;
        interrupts.recv().await?;
        Some(((), Some(interrupts)))
    })
}

/// Process interrupts (Ctrl-C) as a stream; ends if the handler cannot be installed.
#[cfg(not(unix))]
pub fn ctrl_c_stream() -> impl Stream<Item = ()> {
    futures::stream::unfold((), |()| async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Some(((), ())),
            Err(error) => {
                tracing::warn!(?error, "failed to install ctrl-c handler");
                None
            }
        }
    })
}
