//! Session Module
//!
//! Server-side state of one connected guest thread: the handle table, the
//! window object graph, the redraw/event queues and the notifier registries,
//! plus the dispatch logic that turns opcode-tagged commands into mutations
//! of the above.
//!
//! Lock layout: `state` covers the handle table and object graph and is only
//! taken from this session's dispatch path; `queues` and `notifiers` can
//! additionally be taken from another session's dispatch path (server
//! broadcasts, focus changes), so delivery never needs the state lock.
//! Acquisition order inside one call is state, then queues, then notifiers,
//! never holding an earlier one while waiting on a later call that takes
//! the clients map.

use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{status, WsError};
use crate::ipc::{DiscardContext, NotifyInfo, RequestContext};
use crate::ws::common::{RedrawEvent, Vec2, WsEvent};
use crate::ws::fifo::{EventFifo, RedrawFifo};
use crate::ws::handles::{HandleTable, SESSION_HANDLE};
use crate::ws::notifiers::{ErrorNotifier, ModNotifier, Notifiers};
use crate::ws::objects::{
    decode_wire_name, find_window_obj, AnimDll, ClickDll, GraphicsContext, ScreenDevice, Sprite,
    Window, WindowGroup, WindowKind, WsObject,
};
use crate::ws::ops::{self, ClientOp, WsCmd};
use crate::ws::{HotKeyKind, WindowServer};

/// Handle table, object graph and tree relations, guarded as one unit.
struct SessionState {
    table: HandleTable,
    /// Screen-device handles owned by this session, in creation order.
    devices: Vec<u32>,
    /// Device used when a command does not name one.
    primary_device: Option<u32>,
    /// Top-level window-group handles, the children of the session root.
    root_children: Vec<u32>,
    /// Most recently created group, default target for follow-up commands.
    last_group: Option<u32>,
    /// Live window groups owned by this session.
    group_count: u32,
}

struct Queues {
    redraws: RedrawFifo,
    events: EventFifo,
}

/// One window-server client, created per guest connection.
pub struct WsSession {
    session_id: u64,
    state: Mutex<SessionState>,
    queues: Mutex<Queues>,
    notifiers: Mutex<Notifiers>,
}

impl WsSession {
    pub fn new(session_id: u64) -> Self {
        info!("Window server session {} created", session_id);
        Self {
            session_id,
            state: Mutex::new(SessionState {
                table: HandleTable::new(),
                devices: Vec::new(),
                primary_device: None,
                root_children: Vec::new(),
                last_group: None,
                group_count: 0,
            }),
            queues: Mutex::new(Queues {
                redraws: RedrawFifo::new(),
                events: EventFifo::new(),
            }),
            notifiers: Mutex::new(Notifiers::new()),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    // ========================================================================
    // Command dispatch
    // ========================================================================

    /// Execute a single decoded command, completing `ctx` with the result.
    pub fn execute_command(
        &self,
        server: &WindowServer,
        ctx: &mut dyn RequestContext,
        cmd: &WsCmd<'_>,
    ) {
        match self.dispatch(server, cmd) {
            Ok(reply) => ctx.complete(reply),
            Err(err) => {
                warn!(
                    "Session {}: command {:#06x} failed: {}",
                    self.session_id, cmd.header.op, err
                );
                ctx.complete(err.status());
            }
        }
    }

    /// Execute a batch strictly in order. Each command's side effects are
    /// visible to the ones after it; only the final command answers the
    /// caller's request, earlier failures are reported only through their
    /// own (discarded) completion and do not abort the batch.
    pub fn execute_commands(
        &self,
        server: &WindowServer,
        ctx: &mut dyn RequestContext,
        cmds: &[WsCmd<'_>],
    ) {
        if cmds.is_empty() {
            ctx.complete(status::NONE);
            return;
        }
        let (last, rest) = cmds.split_last().unwrap();
        for cmd in rest {
            self.execute_command(server, &mut DiscardContext, cmd);
        }
        self.execute_command(server, ctx, last);
    }

    /// Split a guest command buffer into frames and run them as a batch.
    pub fn parse_command_buffer(
        &self,
        server: &WindowServer,
        ctx: &mut dyn RequestContext,
        buf: &[u8],
    ) {
        match ops::parse_command_buffer(buf) {
            Ok(cmds) => self.execute_commands(server, ctx, &cmds),
            Err(err) => {
                warn!("Session {}: {}", self.session_id, err);
                ctx.complete(err.status());
            }
        }
    }

    fn dispatch(&self, server: &WindowServer, cmd: &WsCmd<'_>) -> Result<i32, WsError> {
        let op = ClientOp::from_u16(cmd.header.op)?;
        debug!(
            "Session {}: {:?} (handle {})",
            self.session_id, op, cmd.header.obj_handle
        );
        match op {
            ClientOp::CreateScreenDevice => self.cmd_create_screen_device(server, cmd),
            ClientOp::CreateWindowGroup => self.cmd_create_window_group(server, cmd),
            ClientOp::CreateWindow => self.cmd_create_window(cmd),
            ClientOp::CreateGc => self.cmd_create_gc(cmd),
            ClientOp::CreateAnimDll => self.cmd_create_anim_dll(cmd),
            ClientOp::CreateClick => self.cmd_create_click(cmd),
            ClientOp::CreateSprite => self.cmd_create_sprite(cmd),
            ClientOp::RestoreDefaultHotKey => self.cmd_restore_hotkey(server, cmd),
            ClientOp::FreeObject => self.cmd_free_object(server, cmd),
            ClientOp::NumWindowGroups => Ok(server.get_total_window_groups() as i32),
            ClientOp::NumWindowGroupsAllPriorities => {
                let p: ops::NumWindowGroupsPriority = cmd.decode()?;
                Ok(server.get_total_window_groups_with_priority(p.priority) as i32)
            }
            ClientOp::RedrawReadyCancel => {
                let p: ops::CancelNotification = cmd.decode()?;
                self.deque_redraw(p.correlation_id);
                Ok(status::NONE)
            }
            ClientOp::EventReadyCancel => {
                let p: ops::CancelNotification = cmd.decode()?;
                self.cancel_event(p.correlation_id);
                Ok(status::NONE)
            }
        }
    }

    // ========================================================================
    // Creation commands
    // ========================================================================

    fn cmd_create_screen_device(
        &self,
        server: &WindowServer,
        cmd: &WsCmd<'_>,
    ) -> Result<i32, WsError> {
        let p: ops::CreateScreenDevice = cmd.decode()?;
        let count = server.screen_count();
        if p.screen_num as usize >= count {
            return Err(WsError::ScreenIndexOutOfRange {
                index: p.screen_num,
                count,
            });
        }
        let mode = server
            .get_screen_config(p.screen_num as usize)
            .default_mode()
            .descriptor();

        let mut st = self.state.lock().unwrap();
        let handle = st.table.add_object(WsObject::ScreenDevice(ScreenDevice {
            screen_num: p.screen_num as usize,
            client_ptr: p.client_ptr,
            mode,
        }))?;
        st.devices.push(handle);
        if st.primary_device.is_none() {
            st.primary_device = Some(handle);
        }
        debug!(
            "Session {}: screen device {} bound to screen {}",
            self.session_id, handle, p.screen_num
        );
        Ok(handle as i32)
    }

    fn cmd_create_window_group(
        &self,
        server: &WindowServer,
        cmd: &WsCmd<'_>,
    ) -> Result<i32, WsError> {
        let p: ops::CreateWindowGroup = cmd.decode()?;

        let handle;
        {
            let mut st = self.state.lock().unwrap();
            let device_handle = resolve_device(&st, p.screen_device_handle)?;

            let parent = if p.parent_id == SESSION_HANDLE {
                SESSION_HANDLE
            } else {
                let found = find_window_obj(&st.table, &st.root_children, p.parent_id)
                    .ok_or(WsError::BadHandle(p.parent_id))?;
                expect_group(&st.table, found)?;
                found
            };

            let ordinal_position = if parent == SESSION_HANDLE {
                st.root_children.len() as i32
            } else {
                sibling_count(&st.table, parent)
            };

            handle = st.table.add_object(WsObject::WindowGroup(WindowGroup {
                client_handle: p.client_handle,
                priority: 0,
                ordinal_position,
                device_handle,
                parent,
                children: Vec::new(),
                accepts_focus: p.focus != 0,
            }))?;

            if parent == SESSION_HANDLE {
                st.root_children.push(handle);
            } else if let Some(group) = st.table.get_mut(parent).and_then(WsObject::as_group_mut) {
                group.children.push(handle);
            }
            st.last_group = Some(handle);
            st.group_count += 1;
        }

        if p.focus != 0 {
            server.set_focus(self.session_id, handle);
        }
        debug!(
            "Session {}: window group {} created (focus={})",
            self.session_id,
            handle,
            p.focus != 0
        );
        Ok(handle as i32)
    }

    fn cmd_create_window(&self, cmd: &WsCmd<'_>) -> Result<i32, WsError> {
        let p: ops::CreateWindow = cmd.decode()?;
        let kind = WindowKind::from_wire(p.win_type).ok_or(WsError::InvalidWindowKind(p.win_type))?;

        let mut st = self.state.lock().unwrap();
        // Parent 0 targets the most recently created group, the default for
        // commands that omit an explicit handle.
        let parent = if p.parent_id == SESSION_HANDLE {
            st.last_group
                .filter(|&h| st.table.contains(h))
                .ok_or(WsError::BadHandle(SESSION_HANDLE))?
        } else {
            find_window_obj(&st.table, &st.root_children, p.parent_id)
                .ok_or(WsError::BadHandle(p.parent_id))?
        };

        // Windows attach under a group or another window; the device binding
        // is inherited from the parent.
        let device_handle = match st.table.get(parent) {
            Some(WsObject::WindowGroup(g)) => g.device_handle,
            Some(WsObject::Window(w)) => w.device_handle,
            Some(other) => {
                return Err(WsError::HandleTypeMismatch {
                    handle: parent,
                    expected: "window group or window",
                    actual: other.kind_name(),
                })
            }
            None => return Err(WsError::BadHandle(parent)),
        };

        let handle = st.table.add_object(WsObject::Window(Window {
            client_handle: p.client_handle,
            kind,
            parent,
            device_handle,
            children: Vec::new(),
        }))?;

        match st.table.get_mut(parent) {
            Some(WsObject::WindowGroup(g)) => g.children.push(handle),
            Some(WsObject::Window(w)) => w.children.push(handle),
            _ => {}
        }
        debug!(
            "Session {}: window {} created under {}",
            self.session_id, handle, parent
        );
        Ok(handle as i32)
    }

    fn cmd_create_gc(&self, cmd: &WsCmd<'_>) -> Result<i32, WsError> {
        if !cmd.payload.is_empty() {
            return Err(WsError::MalformedPayload {
                opcode: cmd.header.op,
                expected: 0,
                got: cmd.payload.len(),
            });
        }
        let mut st = self.state.lock().unwrap();
        let device_handle = st.primary_device.unwrap_or(SESSION_HANDLE);
        let handle = st
            .table
            .add_object(WsObject::GraphicsContext(GraphicsContext { device_handle }))?;
        Ok(handle as i32)
    }

    fn cmd_create_anim_dll(&self, cmd: &WsCmd<'_>) -> Result<i32, WsError> {
        let name = decode_wire_name(cmd.payload);
        if name.is_empty() {
            warn!(
                "Session {}: anim dll created with empty name",
                self.session_id
            );
        }
        let mut st = self.state.lock().unwrap();
        let handle = st.table.add_object(WsObject::AnimDll(AnimDll { name }))?;
        Ok(handle as i32)
    }

    fn cmd_create_click(&self, cmd: &WsCmd<'_>) -> Result<i32, WsError> {
        if !cmd.payload.is_empty() {
            return Err(WsError::MalformedPayload {
                opcode: cmd.header.op,
                expected: 0,
                got: cmd.payload.len(),
            });
        }
        let mut st = self.state.lock().unwrap();
        let handle = st
            .table
            .add_object(WsObject::ClickDll(ClickDll { loaded: true }))?;
        Ok(handle as i32)
    }

    fn cmd_create_sprite(&self, cmd: &WsCmd<'_>) -> Result<i32, WsError> {
        let p: ops::CreateSprite = cmd.decode()?;
        let mut st = self.state.lock().unwrap();
        if p.window_handle != SESSION_HANDLE {
            match st.table.get(p.window_handle) {
                Some(WsObject::Window(_)) => {}
                Some(other) => {
                    return Err(WsError::HandleTypeMismatch {
                        handle: p.window_handle,
                        expected: "window",
                        actual: other.kind_name(),
                    })
                }
                None => return Err(WsError::BadHandle(p.window_handle)),
            }
        }
        let handle = st.table.add_object(WsObject::Sprite(Sprite {
            window_handle: p.window_handle,
            base_pos: Vec2::new(p.base_pos_x, p.base_pos_y),
            flags: p.flags,
        }))?;
        Ok(handle as i32)
    }

    fn cmd_restore_hotkey(&self, server: &WindowServer, cmd: &WsCmd<'_>) -> Result<i32, WsError> {
        let p: ops::RestoreDefaultHotKey = cmd.decode()?;
        let kind = HotKeyKind::from_wire(p.hotkey_type).ok_or(WsError::UnknownHotKey(p.hotkey_type))?;
        server.restore_default_hotkey(kind);
        Ok(status::NONE)
    }

    fn cmd_free_object(&self, server: &WindowServer, cmd: &WsCmd<'_>) -> Result<i32, WsError> {
        if self.free_object(server, cmd.header.obj_handle) {
            Ok(status::NONE)
        } else {
            Err(WsError::BadHandle(cmd.header.obj_handle))
        }
    }

    // ========================================================================
    // Object lifetime
    // ========================================================================

    /// Delete an object, purging every queue entry and notifier registration
    /// that references it so nothing dangles. Children of a deleted group or
    /// window are orphaned, not cascaded: their handles stay valid and their
    /// stale parent link degrades to "not found".
    pub fn free_object(&self, server: &WindowServer, handle: u32) -> bool {
        {
            let mut st = self.state.lock().unwrap();
            let Some(obj) = st.table.delete(handle) else {
                return false;
            };
            match obj {
                WsObject::WindowGroup(group) => {
                    st.group_count = st.group_count.saturating_sub(1);
                    if group.parent == SESSION_HANDLE {
                        st.root_children.retain(|&h| h != handle);
                    } else if let Some(parent) =
                        st.table.get_mut(group.parent).and_then(WsObject::as_group_mut)
                    {
                        parent.children.retain(|&h| h != handle);
                    }
                    if st.last_group == Some(handle) {
                        st.last_group = None;
                    }
                }
                WsObject::Window(window) => {
                    match st.table.get_mut(window.parent) {
                        Some(WsObject::WindowGroup(g)) => g.children.retain(|&h| h != handle),
                        Some(WsObject::Window(w)) => w.children.retain(|&h| h != handle),
                        _ => {}
                    }
                }
                WsObject::ScreenDevice(_) => {
                    st.devices.retain(|&h| h != handle);
                    if st.primary_device == Some(handle) {
                        st.primary_device = st.devices.first().copied();
                    }
                }
                _ => {}
            }
        }

        // Nothing queued may keep referencing the dead handle: pending
        // redraws for it, and general events targeting it, go with it.
        {
            let mut q = self.queues.lock().unwrap();
            q.redraws.purge_window(handle);
            q.events.purge_target(handle);
        }
        self.notifiers.lock().unwrap().remove_for(handle);
        server.clear_focus_if(self.session_id, handle);
        true
    }

    /// Invalidate everything this session owns. Idempotent; called when the
    /// underlying connection closes.
    pub fn teardown(&self) {
        info!("Window server session {} tearing down", self.session_id);
        {
            let mut st = self.state.lock().unwrap();
            st.table.clear();
            st.devices.clear();
            st.primary_device = None;
            st.root_children.clear();
            st.last_group = None;
            st.group_count = 0;
        }
        {
            let mut q = self.queues.lock().unwrap();
            q.redraws.clear();
            q.events.clear();
        }
        self.notifiers.lock().unwrap().clear();
    }

    // ========================================================================
    // Queues and listeners
    // ========================================================================

    pub fn add_redraw_listener(&self, nof: NotifyInfo) {
        self.queues.lock().unwrap().redraws.set_listener(nof);
    }

    pub fn add_event_listener(&self, nof: NotifyInfo) {
        self.queues.lock().unwrap().events.set_listener(nof);
    }

    /// Queue a redraw for a window; returns the correlation id, reused when
    /// the window already has one pending.
    pub fn queue_redraw(
        &self,
        window_handle: u32,
        top_left: Vec2,
        bottom_right: Vec2,
    ) -> Result<u32, WsError> {
        {
            let mut st = self.state.lock().unwrap();
            match st.table.get_mut(window_handle) {
                Some(WsObject::Window(_)) => {}
                Some(other) => {
                    return Err(WsError::HandleTypeMismatch {
                        handle: window_handle,
                        expected: "window",
                        actual: other.kind_name(),
                    })
                }
                None => return Err(WsError::BadHandle(window_handle)),
            }
        }
        Ok(self.queues.lock().unwrap().redraws.queue_redraw(RedrawEvent {
            window_handle,
            top_left,
            bottom_right,
        }))
    }

    pub fn queue_event(&self, evt: WsEvent) -> u32 {
        self.queues.lock().unwrap().events.queue(evt)
    }

    pub fn deque_redraw(&self, correlation_id: u32) -> bool {
        self.queues.lock().unwrap().redraws.cancel(correlation_id)
    }

    pub fn cancel_event(&self, correlation_id: u32) -> bool {
        self.queues.lock().unwrap().events.cancel(correlation_id)
    }

    /// Fetch the oldest pending redraw, once signalled.
    pub fn next_redraw(&self) -> Option<RedrawEvent> {
        self.queues.lock().unwrap().redraws.next()
    }

    /// Fetch the oldest pending event, once signalled.
    pub fn next_event(&self) -> Option<WsEvent> {
        self.queues.lock().unwrap().events.next()
    }

    // ========================================================================
    // Notifier registration (three fixed, typed entry points)
    // ========================================================================

    /// Subscribe an object to keyboard-modifier changes.
    pub fn add_mod_notifier(&self, user_handle: u32, notifier: ModNotifier) -> Result<(), WsError> {
        self.check_object(user_handle)?;
        self.notifiers
            .lock()
            .unwrap()
            .add_mod_notifier(user_handle, notifier);
        Ok(())
    }

    /// Subscribe an object to screen configuration changes.
    pub fn add_screen_change_notifier(&self, user_handle: u32) -> Result<(), WsError> {
        self.check_object(user_handle)?;
        self.notifiers
            .lock()
            .unwrap()
            .add_screen_change_notifier(user_handle);
        Ok(())
    }

    /// Subscribe an object to error messages.
    pub fn add_error_notifier(
        &self,
        user_handle: u32,
        notifier: ErrorNotifier,
    ) -> Result<(), WsError> {
        self.check_object(user_handle)?;
        self.notifiers
            .lock()
            .unwrap()
            .add_error_notifier(user_handle, notifier);
        Ok(())
    }

    fn check_object(&self, handle: u32) -> Result<(), WsError> {
        if self.state.lock().unwrap().table.contains(handle) {
            Ok(())
        } else {
            Err(WsError::BadHandle(handle))
        }
    }

    // ========================================================================
    // Server-side accessors (aggregation and broadcast support)
    // ========================================================================

    /// Live window groups owned by this session.
    pub fn total_window_groups(&self) -> u32 {
        self.state.lock().unwrap().group_count
    }

    /// Live window groups with the given priority.
    pub fn total_window_groups_with_priority(&self, priority: u32) -> u32 {
        let st = self.state.lock().unwrap();
        st.table
            .iter()
            .filter(|(_, obj)| {
                obj.as_group()
                    .is_some_and(|g| g.priority == priority as i32)
            })
            .count() as u32
    }

    /// Whether a handle currently resolves to a live window group.
    pub(crate) fn is_live_group(&self, handle: u32) -> bool {
        self.state
            .lock()
            .unwrap()
            .table
            .get(handle)
            .and_then(WsObject::as_group)
            .is_some()
    }

    pub(crate) fn screen_change_targets(&self) -> Vec<u32> {
        self.notifiers.lock().unwrap().screen_change_targets()
    }

    pub(crate) fn mod_targets(
        &self,
        changed: crate::ws::common::EventModifiers,
        has_focus: bool,
    ) -> Vec<u32> {
        self.notifiers.lock().unwrap().mods_matching(changed, has_focus)
    }

    pub(crate) fn error_targets(&self, has_focus: bool) -> Vec<u32> {
        self.notifiers.lock().unwrap().errors_matching(has_focus)
    }

    /// Set a group's z-order/focus-arbitration priority.
    pub fn set_group_priority(&self, handle: u32, priority: i32) -> Result<(), WsError> {
        let mut st = self.state.lock().unwrap();
        match st.table.get_mut(handle) {
            Some(WsObject::WindowGroup(g)) => {
                g.priority = priority;
                Ok(())
            }
            Some(other) => Err(WsError::HandleTypeMismatch {
                handle,
                expected: "window group",
                actual: other.kind_name(),
            }),
            None => Err(WsError::BadHandle(handle)),
        }
    }

    /// Most recently created group, if still alive.
    pub fn last_group(&self) -> Option<u32> {
        let st = self.state.lock().unwrap();
        st.last_group.filter(|&h| st.table.contains(h))
    }

    /// Look up an object kind by handle, for callers outside dispatch.
    pub fn object_kind(&self, handle: u32) -> Option<&'static str> {
        self.state
            .lock()
            .unwrap()
            .table
            .get(handle)
            .map(WsObject::kind_name)
    }
}

fn resolve_device(st: &SessionState, wire_handle: u32) -> Result<u32, WsError> {
    if wire_handle == SESSION_HANDLE {
        // No explicit device: the primary, or none if the session never
        // created one (legal; the group simply has no presentation binding).
        return Ok(st.primary_device.unwrap_or(SESSION_HANDLE));
    }
    match st.table.get(wire_handle) {
        Some(WsObject::ScreenDevice(_)) => Ok(wire_handle),
        Some(other) => Err(WsError::HandleTypeMismatch {
            handle: wire_handle,
            expected: "screen device",
            actual: other.kind_name(),
        }),
        None => Err(WsError::BadHandle(wire_handle)),
    }
}

fn expect_group(table: &HandleTable, handle: u32) -> Result<(), WsError> {
    match table.get(handle) {
        Some(WsObject::WindowGroup(_)) => Ok(()),
        Some(other) => Err(WsError::HandleTypeMismatch {
            handle,
            expected: "window group",
            actual: other.kind_name(),
        }),
        None => Err(WsError::BadHandle(handle)),
    }
}

fn sibling_count(table: &HandleTable, parent: u32) -> i32 {
    table
        .get(parent)
        .and_then(WsObject::as_group)
        .map(|g| g.children.len() as i32)
        .unwrap_or(0)
}
