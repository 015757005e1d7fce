//! Response status side channel.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::Response;

/// Mutable status-code carrier shared between a service and its handler.
///
/// CRUD operations record success statuses (201, 204, 304) here as a side
/// effect while also returning a value; the handler applies the recorded
/// status to its response. Clones share the same slot.
#[derive(Clone, Debug, Default)]
pub struct ResponseStatus {
    code: Arc<AtomicU16>,
}

impl ResponseStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, status: StatusCode) {
        self.code.store(status.as_u16(), Ordering::Relaxed);
    }

    /// The recorded status, if any operation set one.
    pub fn get(&self) -> Option<StatusCode> {
        match self.code.load(Ordering::Relaxed) {
            0 => None,
            raw => StatusCode::from_u16(raw).ok(),
        }
    }

    /// Override a response's status with the recorded one, when present.
    pub fn apply(&self, mut response: Response) -> Response {
        if let Some(status) = self.get() {
            *response.status_mut() = status;
        }
        response
    }
}
