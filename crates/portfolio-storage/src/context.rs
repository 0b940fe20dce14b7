//! Call context carrying an optional deadline.
//!
//! Every store operation takes a `&Context`. Federated calls hand the same
//! context to each per-building sub-call, so one deadline bounds the whole
//! fan-out while each building fails independently.

use crate::error::StoreError;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Context {
    deadline: Option<Instant>,
}

impl Context {
    /// No deadline.
    pub fn background() -> Self {
        Self { deadline: None }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    /// Apply `timeout` only when this context has no deadline of its own.
    pub fn or_timeout(self, timeout: Option<Duration>) -> Self {
        match (self.deadline, timeout) {
            (None, Some(t)) => Self::with_timeout(t),
            _ => self,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// `None` means unbounded; an expired context reports `Duration::ZERO`.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn check(&self, op: &'static str) -> Result<(), StoreError> {
        if self.is_expired() {
            Err(StoreError::DeadlineExceeded { op })
        } else {
            Ok(())
        }
    }
}
