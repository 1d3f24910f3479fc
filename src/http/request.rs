//! Request-scoped context.
//!
//! # Responsibilities
//! - Carry request-scoped values injected by middleware
//! - Carry the request deadline and a cancellation token
//! - Travel inside the request's extensions so native handlers see it too
//!
//! # Design Decisions
//! - Immutable: `with_*` methods return a new context (copy-on-write map)
//! - Deadlines only ever shrink; a child token is derived per deadline
//! - Cancelling a derived context never cancels its parent

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

type ValueMap = HashMap<String, Arc<dyn Any + Send + Sync>>;

/// Values, deadline and cancellation for one request.
#[derive(Clone, Default)]
pub struct RequestContext {
    values: Arc<ValueMap>,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl RequestContext {
    /// Create an empty context with no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of this context carrying `key = value`.
    pub fn with_value<T>(&self, key: impl Into<String>, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        let mut values = (*self.values).clone();
        values.insert(key.into(), Arc::new(value));
        Self {
            values: Arc::new(values),
            deadline: self.deadline,
            cancel: self.cancel.clone(),
        }
    }

    /// Look up a value by key and type.
    pub fn value<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Returns a copy bounded by `deadline` with its own child cancellation token.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            values: Arc::clone(&self.values),
            deadline: Some(deadline),
            cancel: self.cancel.child_token(),
        }
    }

    /// The deadline, if one was set.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether this context has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once this context is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// The underlying cancellation token.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("RequestContext")
            .field("keys", &keys)
            .field("deadline", &self.deadline)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
