//! Cooperative cancellation: tokens, timeouts, and the per-slot coordinator.
//!
//! A [`CancelToken`] is a cheaply-cloneable handle meaning "this operation
//! should stop". Work observes it either by polling [`CancelToken::reason`]
//! or by racing [`CancelToken::cancelled`] against an await point with
//! `tokio::select!`, which drops (and thereby aborts) the losing future.
//!
//! Three kinds of token exist, all behind the same type:
//!
//! - a **trigger** created by [`CancelToken::new`] and fired by [`CancelToken::cancel`],
//! - a **deadline** created by [`CancelToken::timeout`], which fires on its own,
//! - a **merge** of two tokens from [`CancelToken::merge`], which fires as soon as
//!   either input does.
//!
//! The [`Coordinator`] owns the token of the one logical request allowed in
//! flight per slot (e.g. per search box) and cancels it before a new one starts.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

/// Why a token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// The caller cancelled explicitly.
    Caller,
    /// A newer request for the same slot replaced this one.
    Superseded,
    /// A deadline elapsed.
    Timeout,
}

impl CancelReason {
    /// Timeouts are a property of one attempt and may be retried; the other
    /// reasons end the logical request.
    pub fn is_timeout(self) -> bool {
        self == Self::Timeout
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Caller => "cancelled by caller",
            Self::Superseded => "superseded by a newer request",
            Self::Timeout => "timed out",
        })
    }
}

/// A cancellation handle observed cooperatively by the operation it guards.
///
/// Cloning shares state: firing any clone fires them all.
///
/// # Examples
///
/// ```
/// use refetch::cancel::{CancelReason, CancelToken};
///
/// let external = CancelToken::new();
/// let merged = CancelToken::merge(Some(&external), CancelToken::new());
/// assert!(!merged.is_cancelled());
///
/// external.cancel();
/// assert_eq!(merged.reason(), Some(CancelReason::Caller));
/// ```
#[derive(Clone, Debug)]
pub struct CancelToken {
    trigger: Arc<watch::Sender<Option<CancelReason>>>,
    deadline: Option<Instant>,
    merged: Option<Arc<(CancelToken, CancelToken)>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Creates a token that fires only when [`cancel`](Self::cancel) is called.
    pub fn new() -> Self {
        let (trigger, _) = watch::channel(None);
        Self {
            trigger: Arc::new(trigger),
            deadline: None,
            merged: None,
        }
    }

    /// Creates a token that fires with [`CancelReason::Timeout`] once `after` has elapsed.
    ///
    /// Nothing runs in the background: the deadline is checked whenever the
    /// token is observed, so dropping the token is all it takes to clear it.
    ///
    /// A duration too large to represent as a deadline never elapses.
    pub fn timeout(after: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(after),
            ..Self::new()
        }
    }

    /// Combines an optional external token with an internal one.
    ///
    /// The result fires as soon as either input fires. Without an external
    /// token, `internal` is returned unchanged.
    pub fn merge(external: Option<&CancelToken>, internal: CancelToken) -> CancelToken {
        match external {
            None => internal,
            Some(external) => Self {
                merged: Some(Arc::new((external.clone(), internal))),
                ..Self::new()
            },
        }
    }

    /// Fires the token with [`CancelReason::Caller`]. Firing twice is a no-op.
    pub fn cancel(&self) {
        self.fire(CancelReason::Caller);
    }

    pub(crate) fn fire(&self, reason: CancelReason) {
        self.trigger.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(reason);
            true
        });
    }

    /// Returns why the token fired, or `None` while it is still live.
    ///
    /// An explicit cancellation is reported ahead of a deadline that has
    /// passed at the same time.
    pub fn reason(&self) -> Option<CancelReason> {
        if let Some(reason) = *self.trigger.borrow() {
            return Some(reason);
        }
        if let Some((first, second)) = self.merged.as_deref() {
            if let Some(reason) = first.reason().or_else(|| second.reason()) {
                return Some(reason);
            }
        }
        self.deadline
            .filter(|deadline| Instant::now() >= *deadline)
            .map(|_| CancelReason::Timeout)
    }

    /// Returns `true` once the token has fired for any reason.
    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Resolves once the token fires, yielding the reason.
    ///
    /// Intended to be raced against other futures in `tokio::select!`.
    pub fn cancelled(&self) -> Pin<Box<dyn Future<Output = CancelReason> + Send + '_>> {
        Box::pin(async move {
            if let Some(reason) = self.reason() {
                return reason;
            }

            let deadline = self.deadline;
            tokio::select! {
                reason = wait_for_trigger(&self.trigger) => reason,
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    CancelReason::Timeout
                }
                reason = async {
                    match self.merged.as_deref() {
                        Some((first, second)) => tokio::select! {
                            reason = first.cancelled() => reason,
                            reason = second.cancelled() => reason,
                        },
                        None => std::future::pending().await,
                    }
                } => reason,
            }
        })
    }

    /// Returns `true` if both handles are clones of the same token.
    pub fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.trigger, &other.trigger)
    }
}

async fn wait_for_trigger(trigger: &watch::Sender<Option<CancelReason>>) -> CancelReason {
    let mut rx = trigger.subscribe();
    loop {
        let state = *rx.borrow_and_update();
        if let Some(reason) = state {
            return reason;
        }
        if rx.changed().await.is_err() {
            // The sender outlives this future, so the channel never closes.
            return std::future::pending().await;
        }
    }
}

/// Owns the in-flight token of one request slot.
///
/// At most one logical request per slot is live: [`begin`](Self::begin)
/// cancels the previous token before handing out a new one, so a superseded
/// request observes cancellation and its late result is dropped.
#[derive(Debug, Default)]
pub struct Coordinator {
    current: Mutex<Option<CancelToken>>,
}

impl Coordinator {
    /// Creates a coordinator with an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the slot's in-flight request, if any, as superseded.
    pub fn cancel_previous(&self) {
        if let Some(previous) = self.slot().take() {
            debug!("cancelling superseded request");
            previous.fire(CancelReason::Superseded);
        }
    }

    /// Cancels the slot's in-flight request on behalf of the caller.
    ///
    /// Returns `true` if a request was in flight.
    pub fn cancel_in_flight(&self) -> bool {
        match self.slot().take() {
            Some(current) => {
                current.fire(CancelReason::Caller);
                true
            }
            None => false,
        }
    }

    /// Cancels the previous request and installs a fresh token for the next one.
    ///
    /// Both steps happen under one lock, so no other request can slip in between.
    pub fn begin(&self) -> CancelToken {
        let token = CancelToken::new();
        let mut slot = self.slot();
        if let Some(previous) = slot.replace(token.clone()) {
            debug!("cancelling superseded request");
            previous.fire(CancelReason::Superseded);
        }
        token
    }

    /// Releases the slot if it still belongs to `token`.
    pub fn finish(&self, token: &CancelToken) {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|current| current.same_as(token)) {
            *slot = None;
        }
    }

    /// Returns `true` while a request started with [`begin`](Self::begin) has not finished.
    pub fn in_flight(&self) -> bool {
        self.slot().is_some()
    }

    fn slot(&self) -> MutexGuard<'_, Option<CancelToken>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
