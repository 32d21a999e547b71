//! Round-robin endpoint selection.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::PoolError;

/// Cycles through a fixed list of endpoints, one per call.
///
/// The cursor is shared by every caller, so concurrent queries are spread
/// across the endpoints instead of all starting at the first one.
pub struct RoundRobin<E> {
    endpoints: Box<[E]>,
    cursor: AtomicUsize,
}

impl<E> RoundRobin<E> {
    pub fn new(endpoints: Vec<E>) -> Self {
        Self {
            endpoints: endpoints.into_boxed_slice(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Select the next endpoint.
    pub fn next(&self) -> Result<&E, PoolError> {
        if self.endpoints.is_empty() {
            return Err(PoolError::Empty);
        }

        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        Ok(&self.endpoints[index])
    }
}
