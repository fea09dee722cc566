//! Handle Table Module
//!
//! Per-session registry mapping opaque integer handles to window-system
//! objects. Handle values come from a monotonic counter and are never reused
//! within the session's lifetime, so a stale handle (including one held by a
//! pending notification) can only resolve to "not found", never to a
//! different object.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

use crate::error::WsError;
use crate::ws::objects::WsObject;

/// Handle 0 is reserved on the wire for "the session itself".
pub const SESSION_HANDLE: u32 = 0;

pub struct HandleTable {
    objects: HashMap<u32, WsObject>,
    uid_counter: AtomicU32,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            uid_counter: AtomicU32::new(1),
        }
    }

    /// Store an object and return its freshly allocated handle.
    ///
    /// Counter wrap would alias a live or previously issued handle, so it is
    /// reported as exhaustion, fatal to this allocation only.
    pub fn add_object(&mut self, obj: WsObject) -> Result<u32, WsError> {
        let handle = self.uid_counter.fetch_add(1, Ordering::Relaxed);
        if handle == u32::MAX {
            self.uid_counter.store(u32::MAX, Ordering::Relaxed);
            return Err(WsError::HandleSpaceExhausted);
        }
        debug!("Allocated handle {} for {}", handle, obj.kind_name());
        self.objects.insert(handle, obj);
        Ok(handle)
    }

    pub fn get(&self, handle: u32) -> Option<&WsObject> {
        self.objects.get(&handle)
    }

    pub fn get_mut(&mut self, handle: u32) -> Option<&mut WsObject> {
        self.objects.get_mut(&handle)
    }

    /// Remove an object, returning it so the caller can purge dependent
    /// state (queued redraws, notifier registrations, tree links).
    pub fn delete(&mut self, handle: u32) -> Option<WsObject> {
        let removed = self.objects.remove(&handle);
        if removed.is_some() {
            debug!("Deleted handle {}", handle);
        }
        removed
    }

    pub fn contains(&self, handle: u32) -> bool {
        self.objects.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &WsObject)> {
        self.objects.iter().map(|(h, o)| (*h, o))
    }

    /// Drop every object at once. Used by session teardown.
    pub fn clear(&mut self) {
        self.objects.clear();
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
