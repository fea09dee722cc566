//! Notification FIFO Module
//!
//! Ordered "something happened" queues decoupled from "a listener is ready".
//! Items are held in enqueue order, each tagged with a correlation id that
//! can cancel it before delivery. A listener is one-shot: arming it while
//! items are pending signals immediately, then the guest fetches items in
//! order and re-arms.

use std::collections::VecDeque;
use tracing::debug;

use crate::error::status;
use crate::ipc::NotifyInfo;
use crate::ws::common::{RedrawEvent, Vec2, WsEvent};

/// FIFO-with-listener, the common shape behind redraw and event delivery.
pub struct NotifyFifo<T> {
    pending: VecDeque<(u32, T)>,
    listener: Option<NotifyInfo>,
    next_correlation: u32,
}

impl<T> NotifyFifo<T> {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            listener: None,
            next_correlation: 1,
        }
    }

    /// Append an item; returns its correlation id. Signals the listener
    /// immediately when one is armed.
    pub fn queue(&mut self, item: T) -> u32 {
        let id = self.next_correlation;
        self.next_correlation += 1;
        self.pending.push_back((id, item));
        self.flush();
        id
    }

    /// Arm a one-shot listener; a non-empty backlog signals at once.
    pub fn set_listener(&mut self, nof: NotifyInfo) {
        self.listener = Some(nof);
        self.flush();
    }

    /// Drop the armed listener without signalling it.
    pub fn clear_listener(&mut self) {
        self.listener = None;
    }

    /// Remove a still-pending item. No-op once the item has been fetched.
    pub fn cancel(&mut self, correlation_id: u32) -> bool {
        let before = self.pending.len();
        self.pending.retain(|(id, _)| *id != correlation_id);
        let removed = self.pending.len() != before;
        if removed {
            debug!("Cancelled pending notification {}", correlation_id);
        }
        removed
    }

    /// Fetch the oldest pending item, in strict enqueue order.
    pub fn next(&mut self) -> Option<T> {
        self.pending.pop_front().map(|(_, item)| item)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Drop all pending items and the listener. Used by session teardown.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.listener = None;
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        if let Some(nof) = self.listener.take() {
            nof.trigger(status::NONE);
        }
    }
}

impl<T> Default for NotifyFifo<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// General event queue, correlates completions to a listening guest.
pub type EventFifo = NotifyFifo<WsEvent>;

impl NotifyFifo<WsEvent> {
    /// Drop pending events aimed at a deleted object, so a freed handle can
    /// never surface through a later fetch.
    pub fn purge_target(&mut self, target: u32) {
        self.pending.retain(|(_, e)| e.target != target);
    }
}

/// Redraw queue keyed by target window: a second redraw for a window that
/// already has one pending widens the dirty rectangle instead of queueing a
/// duplicate, and reuses the original correlation id.
pub struct RedrawFifo {
    inner: NotifyFifo<RedrawEvent>,
}

impl RedrawFifo {
    pub fn new() -> Self {
        Self {
            inner: NotifyFifo::new(),
        }
    }

    pub fn queue_redraw(&mut self, evt: RedrawEvent) -> u32 {
        for (id, pending) in self.inner.pending.iter_mut() {
            if pending.window_handle == evt.window_handle {
                pending.top_left = Vec2::new(
                    pending.top_left.x.min(evt.top_left.x),
                    pending.top_left.y.min(evt.top_left.y),
                );
                pending.bottom_right = Vec2::new(
                    pending.bottom_right.x.max(evt.bottom_right.x),
                    pending.bottom_right.y.max(evt.bottom_right.y),
                );
                return *id;
            }
        }
        self.inner.queue(evt)
    }

    pub fn set_listener(&mut self, nof: NotifyInfo) {
        self.inner.set_listener(nof);
    }

    pub fn cancel(&mut self, correlation_id: u32) -> bool {
        self.inner.cancel(correlation_id)
    }

    /// Drop any pending redraw for a window being destroyed.
    pub fn purge_window(&mut self, window_handle: u32) {
        self.inner
            .pending
            .retain(|(_, e)| e.window_handle != window_handle);
    }

    pub fn next(&mut self) -> Option<RedrawEvent> {
        self.inner.next()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

impl Default for RedrawFifo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::test_support::RecordingSink;
    use crate::ws::common::EventCode;
    use std::sync::Arc;

    fn event(target: u32) -> WsEvent {
        WsEvent {
            code: EventCode::KeyDown,
            target,
            arg: 0,
            time: 0,
        }
    }

    fn redraw(window: u32, x0: i32, y0: i32, x1: i32, y1: i32) -> RedrawEvent {
        RedrawEvent {
            window_handle: window,
            top_left: Vec2::new(x0, y0),
            bottom_right: Vec2::new(x1, y1),
        }
    }

    #[test]
    fn test_delivery_preserves_enqueue_order() {
        let mut fifo = EventFifo::new();
        fifo.queue(event(1));
        fifo.queue(event(2));
        fifo.queue(event(3));

        let sink = Arc::new(RecordingSink::default());
        fifo.set_listener(NotifyInfo::new(sink.clone(), 1));
        assert_eq!(*sink.delivered.lock().unwrap(), vec![status::NONE]);

        assert_eq!(fifo.next().unwrap().target, 1);
        assert_eq!(fifo.next().unwrap().target, 2);
        assert_eq!(fifo.next().unwrap().target, 3);
        assert!(fifo.next().is_none());
    }

    #[test]
    fn test_cancel_before_listener_skips_item() {
        let mut fifo = EventFifo::new();
        fifo.queue(event(1));
        let b = fifo.queue(event(2));
        fifo.queue(event(3));

        assert!(fifo.cancel(b));
        assert!(!fifo.cancel(b));

        let sink = Arc::new(RecordingSink::default());
        fifo.set_listener(NotifyInfo::new(sink, 1));
        assert_eq!(fifo.next().unwrap().target, 1);
        assert_eq!(fifo.next().unwrap().target, 3);
        assert!(fifo.next().is_none());
    }

    #[test]
    fn test_listener_armed_first_fires_on_queue() {
        let mut fifo = EventFifo::new();
        let sink = Arc::new(RecordingSink::default());
        fifo.set_listener(NotifyInfo::new(sink.clone(), 1));
        assert!(sink.delivered.lock().unwrap().is_empty());

        fifo.queue(event(9));
        assert_eq!(sink.delivered.lock().unwrap().len(), 1);

        // One-shot: a second item does not signal again until re-armed.
        fifo.queue(event(10));
        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_redraw_coalesces_same_window() {
        let mut fifo = RedrawFifo::new();
        let a = fifo.queue_redraw(redraw(5, 0, 0, 10, 10));
        let b = fifo.queue_redraw(redraw(5, 5, 5, 30, 20));
        assert_eq!(a, b);

        let merged = fifo.next().unwrap();
        assert_eq!(merged.top_left, Vec2::new(0, 0));
        assert_eq!(merged.bottom_right, Vec2::new(30, 20));
        assert!(fifo.next().is_none());
    }

    #[test]
    fn test_redraw_distinct_windows_not_coalesced() {
        let mut fifo = RedrawFifo::new();
        let a = fifo.queue_redraw(redraw(1, 0, 0, 4, 4));
        let b = fifo.queue_redraw(redraw(2, 0, 0, 4, 4));
        assert_ne!(a, b);
        assert_eq!(fifo.next().unwrap().window_handle, 1);
        assert_eq!(fifo.next().unwrap().window_handle, 2);
    }

    #[test]
    fn test_purge_target_drops_pending_events() {
        let mut fifo = EventFifo::new();
        fifo.queue(event(1));
        fifo.queue(event(2));
        fifo.queue(event(1));
        fifo.purge_target(1);
        assert_eq!(fifo.next().unwrap().target, 2);
        assert!(fifo.next().is_none());
    }

    #[test]
    fn test_purge_window_drops_pending_redraw() {
        let mut fifo = RedrawFifo::new();
        fifo.queue_redraw(redraw(1, 0, 0, 4, 4));
        fifo.queue_redraw(redraw(2, 0, 0, 4, 4));
        fifo.purge_window(1);
        assert_eq!(fifo.next().unwrap().window_handle, 2);
        assert!(fifo.next().is_none());
    }
}
