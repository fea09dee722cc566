//! IPC Boundary Module
//!
//! The message-passing framework that carries requests between a guest thread
//! and the server is an external collaborator. This module defines only what
//! the core consumes from it: a way to complete the one pending request of a
//! session, and a cloneable completion target for asynchronous notification.

use std::fmt;
use std::sync::Arc;

/// Completion side of one in-flight guest request.
///
/// The external framework hands the dispatcher an implementation per request;
/// the dispatcher completes it exactly once, with a status code and optional
/// reply bytes written back to guest memory.
pub trait RequestContext {
    /// Complete the pending request with a bare status code.
    fn complete(&mut self, status: i32);

    /// Write reply data into the guest-supplied buffer, then complete.
    fn complete_with_data(&mut self, status: i32, data: &[u8]) {
        let _ = data;
        self.complete(status);
    }
}

/// Discards completions. Used for every command in a batch except the last,
/// which is the only one that answers the caller's request.
pub struct DiscardContext;

impl RequestContext for DiscardContext {
    fn complete(&mut self, _status: i32) {}
}

/// Receives asynchronous notification completions on behalf of a guest
/// listener. Implemented by the external framework; tests use a recorder.
pub trait EventSink: Send + Sync {
    fn notify(&self, status: i32);
}

/// A registered listener: where to deliver, and which guest-side request
/// handle the delivery answers.
#[derive(Clone)]
pub struct NotifyInfo {
    sink: Arc<dyn EventSink>,
    /// Guest-side identifier of the outstanding event-ready request.
    pub request_handle: u32,
}

impl NotifyInfo {
    pub fn new(sink: Arc<dyn EventSink>, request_handle: u32) -> Self {
        Self {
            sink,
            request_handle,
        }
    }

    /// Deliver a completion to the listening guest.
    pub fn trigger(&self, status: i32) {
        self.sink.notify(status);
    }
}

impl fmt::Debug for NotifyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyInfo")
            .field("request_handle", &self.request_handle)
            .finish_non_exhaustive()
    }
}
