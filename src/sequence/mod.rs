//! Sequencing state machine.
//!
//! A small finite-state-machine runner for multi-step physical procedures.
//! One tick is one `run()` call on the current state; a state decides for
//! itself when it is done (typically a time-guarded threshold check against
//! instrument feedback), and an external actor can raise a signal through a
//! [`SignalSlot`]. Either can trigger a transition; the state's pure
//! `next()` function resolves the combination and may ignore a signal that
//! is not meaningful to it, leaving it pending for a state that is.
//!
//! Each concrete state is freshly constructed on entry, so internal timers
//! and counters reset naturally — a state that needs "N seconds in this
//! state" just captures an [`std::time::Instant`] when it is built.

use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

pub mod magnet;

pub use magnet::{MagnetController, MagnetStateKind, RampSignal};

/// Thread-safe single-slot signal mailbox.
///
/// A raised signal stays pending until some state consumes it; raising a new
/// signal replaces an unconsumed one. This backs the state machine's
/// externally settable condition without a shared mutable string.
#[derive(Debug)]
pub struct SignalSlot<S> {
    inner: Arc<Mutex<Option<S>>>,
}

impl<S> Clone for SignalSlot<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Clone + Debug> SignalSlot<S> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }

    /// Raises a signal, replacing any unconsumed one.
    pub fn raise(&self, signal: S) {
        let mut slot = self.inner.lock().unwrap();
        if let Some(previous) = slot.replace(signal) {
            debug!(?previous, "Replacing unconsumed signal");
        }
    }

    /// Looks at the pending signal without consuming it.
    pub fn peek(&self) -> Option<S> {
        self.inner.lock().unwrap().clone()
    }

    /// Consumes the pending signal.
    pub fn take(&self) -> Option<S> {
        self.inner.lock().unwrap().take()
    }

    pub fn is_pending(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }
}

impl<S: Clone + Debug> Default for SignalSlot<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// One state of a sequencing procedure.
#[async_trait]
pub trait State: Send {
    /// Shared procedure context (instrument handles, measurements, settings).
    type Context: Send;
    /// The closed set of externally raisable signals.
    type Signal: Clone + Debug + Send;
    /// The closed set of state names.
    type Kind: Copy + PartialEq + Debug + Send;

    fn kind(&self) -> Self::Kind;

    /// Entry hook, called once right after construction.
    async fn enter(&mut self, _ctx: &mut Self::Context) {}

    /// One tick of work: poll instruments, update the context, decide
    /// completion. Returns `true` when this state's own criterion is met.
    async fn run(&mut self, ctx: &mut Self::Context) -> bool;

    /// Pure transition decision. Called when the state reported done or a
    /// signal is pending; returns the next state kind and whether the
    /// signal was consumed. Returning the current kind means "stay".
    fn next(&self, signal: Option<&Self::Signal>) -> (Self::Kind, bool);

    /// Exit hook, called before the replacement state is constructed.
    async fn exit(&mut self, _ctx: &mut Self::Context) {}
}

/// Boxed state with its associated types pinned.
pub type BoxedState<C, S, K> = Box<dyn State<Context = C, Signal = S, Kind = K>>;

/// Constructs a fresh state instance for a kind.
pub type StateFactory<C, S, K> = fn(K) -> BoxedState<C, S, K>;

/// Cooperative single-threaded state machine runner.
pub struct StateMachine<C, S, K>
where
    C: Send,
    S: Clone + Debug + Send,
    K: Copy + PartialEq + Debug + Send,
{
    ctx: C,
    current: BoxedState<C, S, K>,
    entered: bool,
    signals: SignalSlot<S>,
    factory: StateFactory<C, S, K>,
}

impl<C, S, K> StateMachine<C, S, K>
where
    C: Send,
    S: Clone + Debug + Send,
    K: Copy + PartialEq + Debug + Send,
{
    pub fn new(ctx: C, initial: K, factory: StateFactory<C, S, K>) -> Self {
        Self {
            ctx,
            current: factory(initial),
            entered: false,
            signals: SignalSlot::new(),
            factory,
        }
    }

    /// Handle for raising signals from other tasks.
    pub fn signals(&self) -> SignalSlot<S> {
        self.signals.clone()
    }

    pub fn current_kind(&self) -> K {
        self.current.kind()
    }

    pub fn context(&self) -> &C {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.ctx
    }

    /// One tick: run the current state, then resolve done/signal into a
    /// transition. A consumed signal is cleared even when the state decides
    /// to stay; an ignored one remains pending for future ticks.
    pub async fn tick(&mut self) {
        if !self.entered {
            self.current.enter(&mut self.ctx).await;
            self.entered = true;
        }

        let done = self.current.run(&mut self.ctx).await;
        let pending = self.signals.peek();

        if done || pending.is_some() {
            let (next_kind, consumed) = self.current.next(pending.as_ref());
            if consumed {
                self.signals.take();
            }
            if next_kind != self.current.kind() {
                info!(from = ?self.current.kind(), to = ?next_kind, "State transition");
                self.current.exit(&mut self.ctx).await;
                self.current = (self.factory)(next_kind);
                self.current.enter(&mut self.ctx).await;
            }
        }
    }

    /// Runs the machine forever at a fixed tick interval.
    pub async fn run(&mut self, interval: Duration) {
        loop {
            self.tick().await;
            tokio::time::sleep(interval).await;
        }
    }
}
