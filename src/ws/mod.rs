//! Window Server Module
//!
//! The process-wide registry: every connected session, the globally focused
//! window group, the pointer-cursor mode, the screen configuration and the
//! hotkey table. All cross-session state is funneled through this type's
//! locked accessors; nothing here is ambient global state.

pub mod common;
pub mod fifo;
pub mod handles;
pub mod notifiers;
pub mod objects;
pub mod ops;
pub mod session;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{Screen, WsConfig};
use crate::ws::common::{EventCode, EventModifiers, PointerCursorMode, WsEvent};
use crate::ws::session::WsSession;

/// Weak reference to the focused group: session id plus group handle,
/// resolved per use so a destroyed group degrades to "no focus".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusRef {
    pub session_id: u64,
    pub group_handle: u32,
}

/// Hotkey classes a guest can reset to their default binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotKeyKind {
    EnableLogging,
    OfDeath,
    PowerOff,
    Backlight,
    ScreenDump,
}

impl HotKeyKind {
    pub fn from_wire(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(HotKeyKind::EnableLogging),
            1 => Some(HotKeyKind::OfDeath),
            2 => Some(HotKeyKind::PowerOff),
            3 => Some(HotKeyKind::Backlight),
            4 => Some(HotKeyKind::ScreenDump),
            _ => None,
        }
    }
}

/// One hotkey binding: which key chord triggers which class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotKey {
    pub kind: HotKeyKind,
    pub keycode: u32,
    pub modifiers: EventModifiers,
}

fn default_hotkeys() -> Vec<HotKey> {
    vec![
        HotKey {
            kind: HotKeyKind::EnableLogging,
            keycode: 0xc5, // E
            modifiers: EventModifiers::CTRL | EventModifiers::ALT | EventModifiers::SHIFT,
        },
        HotKey {
            kind: HotKeyKind::OfDeath,
            keycode: 0xc8, // K
            modifiers: EventModifiers::CTRL | EventModifiers::ALT | EventModifiers::SHIFT,
        },
        HotKey {
            kind: HotKeyKind::PowerOff,
            keycode: 0xde,
            modifiers: EventModifiers::empty(),
        },
        HotKey {
            kind: HotKeyKind::Backlight,
            keycode: 0xd2,
            modifiers: EventModifiers::FUNC,
        },
        HotKey {
            kind: HotKeyKind::ScreenDump,
            keycode: 0xd3,
            modifiers: EventModifiers::CTRL | EventModifiers::SHIFT,
        },
    ]
}

/// The window server. One instance per running server process, constructed
/// at startup and torn down at shutdown.
pub struct WindowServer {
    clients: Mutex<HashMap<u64, Arc<WsSession>>>,
    focus: Mutex<Option<FocusRef>>,
    cursor_mode: Mutex<PointerCursorMode>,
    /// Parsed screen list, loaded lazily exactly once.
    screens: Mutex<Option<Vec<Screen>>>,
    config_path: PathBuf,
    hotkeys: Mutex<Vec<HotKey>>,
    start: Instant,
}

impl WindowServer {
    /// Create a server that will load its screen configuration from `path`
    /// on first use.
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            focus: Mutex::new(None),
            cursor_mode: Mutex::new(PointerCursorMode::default()),
            screens: Mutex::new(None),
            config_path: config_path.into(),
            hotkeys: Mutex::new(default_hotkeys()),
            start: Instant::now(),
        }
    }

    /// Create a server with an already-parsed screen configuration.
    pub fn with_config(config: WsConfig) -> Self {
        let server = Self::new(PathBuf::new());
        *server.screens.lock().unwrap() = Some(config.screens);
        server
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    /// Register a new guest connection. A reconnect under the same id
    /// replaces (and tears down) the previous session.
    pub fn connect(&self, session_id: u64) -> Arc<WsSession> {
        let session = Arc::new(WsSession::new(session_id));
        let previous = self
            .clients
            .lock()
            .unwrap()
            .insert(session_id, session.clone());
        if let Some(old) = previous {
            warn!("Session id {} reconnected, replacing old session", session_id);
            // The replacement restarts handle allocation, so a focus ref left
            // pointing into this id could resolve against an unrelated group.
            {
                let mut focus = self.focus.lock().unwrap();
                if focus.is_some_and(|f| f.session_id == session_id) {
                    debug!("Focused group belonged to replaced session {}, clearing", session_id);
                    *focus = None;
                }
            }
            old.teardown();
        }
        session
    }

    pub fn get_session(&self, session_id: u64) -> Option<Arc<WsSession>> {
        self.clients.lock().unwrap().get(&session_id).cloned()
    }

    /// Destroy a session: remove it from the registry so no broadcast can
    /// reach it, drop global focus if it pointed into the session, then
    /// invalidate everything the session owned.
    pub fn disconnect(&self, session_id: u64) {
        let removed = self.clients.lock().unwrap().remove(&session_id);
        let Some(session) = removed else {
            warn!("Disconnect for unknown session {}", session_id);
            return;
        };

        {
            let mut focus = self.focus.lock().unwrap();
            if focus.is_some_and(|f| f.session_id == session_id) {
                debug!("Focused group belonged to session {}, clearing", session_id);
                *focus = None;
            }
        }

        session.teardown();
        info!("Session {} disconnected", session_id);
    }

    pub fn session_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    // ========================================================================
    // Screen configuration
    // ========================================================================

    fn ensure_screens(&self) {
        let mut screens = self.screens.lock().unwrap();
        if screens.is_none() {
            let config = WsConfig::load(&self.config_path).unwrap_or_else(|e| {
                warn!("Screen config load failed ({}), using defaults", e);
                WsConfig::default()
            });
            *screens = Some(config.screens);
        }
    }

    /// Number of configured screens.
    pub fn screen_count(&self) -> usize {
        self.ensure_screens();
        self.screens.lock().unwrap().as_ref().unwrap().len()
    }

    /// Parsed descriptor for one screen.
    ///
    /// Panics when `index` is out of the configured range: an out-of-range
    /// index at this level is a dispatcher bug, not a guest error (guest
    /// input is range-checked before it gets here).
    pub fn get_screen_config(&self, index: usize) -> Screen {
        self.ensure_screens();
        let screens = self.screens.lock().unwrap();
        let screens = screens.as_ref().unwrap();
        assert!(
            index < screens.len(),
            "screen index {} out of range ({} configured)",
            index,
            screens.len()
        );
        screens[index].clone()
    }

    // ========================================================================
    // Global focus and cursor mode
    // ========================================================================

    pub fn cursor_mode(&self) -> PointerCursorMode {
        *self.cursor_mode.lock().unwrap()
    }

    pub fn set_cursor_mode(&self, mode: PointerCursorMode) {
        *self.cursor_mode.lock().unwrap() = mode;
    }

    /// The focused window group, if it is still alive. A stale reference is
    /// cleared on the way out.
    pub fn get_focus(&self) -> Option<FocusRef> {
        let current = *self.focus.lock().unwrap();
        let current = current?;
        let live = self
            .get_session(current.session_id)
            .is_some_and(|s| s.is_live_group(current.group_handle));
        if live {
            Some(current)
        } else {
            debug!("Focus pointed at a dead group, clearing");
            *self.focus.lock().unwrap() = None;
            None
        }
    }

    /// Move global focus to a group, posting focus-lost/gained events to the
    /// affected sessions.
    pub fn set_focus(&self, session_id: u64, group_handle: u32) {
        let new = FocusRef {
            session_id,
            group_handle,
        };
        let old = {
            let mut focus = self.focus.lock().unwrap();
            let old = *focus;
            *focus = Some(new);
            old
        };
        if old == Some(new) {
            return;
        }
        debug!(
            "Focus moved to group {} of session {}",
            group_handle, session_id
        );
        if let Some(old) = old {
            if let Some(session) = self.get_session(old.session_id) {
                session.queue_event(self.make_event(EventCode::FocusLost, old.group_handle, 0));
            }
        }
        if let Some(session) = self.get_session(session_id) {
            session.queue_event(self.make_event(EventCode::FocusGained, group_handle, 0));
        }
    }

    /// Clear focus if it currently points at the given object of the given
    /// session. Called from object deletion.
    pub(crate) fn clear_focus_if(&self, session_id: u64, handle: u32) {
        let mut focus = self.focus.lock().unwrap();
        if focus.is_some_and(|f| f.session_id == session_id && f.group_handle == handle) {
            debug!("Focused group {} deleted, clearing focus", handle);
            *focus = None;
        }
    }

    // ========================================================================
    // Cross-session aggregation
    // ========================================================================

    /// Number of window groups across every live session.
    pub fn get_total_window_groups(&self) -> u32 {
        let clients = self.clients.lock().unwrap();
        clients.values().map(|s| s.total_window_groups()).sum()
    }

    /// Number of window groups with the given priority across every live
    /// session.
    pub fn get_total_window_groups_with_priority(&self, priority: u32) -> u32 {
        let clients = self.clients.lock().unwrap();
        clients
            .values()
            .map(|s| s.total_window_groups_with_priority(priority))
            .sum()
    }

    // ========================================================================
    // Broadcasts
    // ========================================================================

    /// Tell every registered subscriber that a screen's configuration
    /// changed. Reaches across all sessions; each delivery is an event on
    /// the subscribing session's own queue.
    pub fn notify_screen_change(&self, screen_num: u32) {
        let clients = self.clients.lock().unwrap();
        for session in clients.values() {
            for target in session.screen_change_targets() {
                session.queue_event(self.make_event(
                    EventCode::ScreenDeviceChanged,
                    target,
                    screen_num,
                ));
            }
        }
    }

    /// Broadcast a keyboard-modifier change to subscribers whose mask
    /// intersects the changed modifiers.
    pub fn notify_mod_changed(&self, changed: EventModifiers, state: EventModifiers) {
        let focused = *self.focus.lock().unwrap();
        let clients = self.clients.lock().unwrap();
        for (id, session) in clients.iter() {
            let has_focus = focused.is_some_and(|f| f.session_id == *id);
            for target in session.mod_targets(changed, has_focus) {
                session.queue_event(self.make_event(
                    EventCode::ModifiersChanged,
                    target,
                    state.bits(),
                ));
            }
        }
    }

    /// Broadcast an error message to subscribers whose when-control admits
    /// delivery.
    pub fn notify_error(&self, error_code: u32) {
        let focused = *self.focus.lock().unwrap();
        let clients = self.clients.lock().unwrap();
        for (id, session) in clients.iter() {
            let has_focus = focused.is_some_and(|f| f.session_id == *id);
            for target in session.error_targets(has_focus) {
                session.queue_event(self.make_event(EventCode::ErrorMessage, target, error_code));
            }
        }
    }

    // ========================================================================
    // Hotkeys
    // ========================================================================

    /// Reset one hotkey class to its built-in binding.
    pub fn restore_default_hotkey(&self, kind: HotKeyKind) {
        let default = default_hotkeys()
            .into_iter()
            .find(|h| h.kind == kind)
            .expect("every hotkey kind has a default binding");
        let mut hotkeys = self.hotkeys.lock().unwrap();
        match hotkeys.iter_mut().find(|h| h.kind == kind) {
            Some(entry) => *entry = default,
            None => hotkeys.push(default),
        }
        debug!("Hotkey {:?} restored to default", kind);
    }

    /// Replace the binding for one hotkey class.
    pub fn set_hotkey(&self, hotkey: HotKey) {
        let mut hotkeys = self.hotkeys.lock().unwrap();
        match hotkeys.iter_mut().find(|h| h.kind == hotkey.kind) {
            Some(entry) => *entry = hotkey,
            None => hotkeys.push(hotkey),
        }
    }

    pub fn hotkey(&self, kind: HotKeyKind) -> Option<HotKey> {
        self.hotkeys.lock().unwrap().iter().find(|h| h.kind == kind).copied()
    }

    fn make_event(&self, code: EventCode, target: u32, arg: u32) -> WsEvent {
        WsEvent {
            code,
            target,
            arg,
            time: self.start.elapsed().as_micros() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Screen as CfgScreen, ScreenMode};
    use crate::ws::common::EventControl;
    use crate::ws::notifiers::ErrorNotifier;
    use crate::ws::ops::{self, ClientOp, CmdHeader, WsCmd};

    fn two_screen_config() -> WsConfig {
        WsConfig {
            screens: vec![
                CfgScreen {
                    modes: vec![ScreenMode {
                        pixel_size: [320, 240],
                        twips_size: [3200, 2400],
                        rotation: 0,
                    }],
                },
                CfgScreen {
                    modes: vec![ScreenMode {
                        pixel_size: [176, 208],
                        twips_size: [1865, 2204],
                        rotation: 90,
                    }],
                },
            ],
        }
    }

    fn create_group(server: &WindowServer, session: &WsSession, focus: bool) -> u32 {
        let payload = bytemuck::bytes_of(&ops::CreateWindowGroup {
            client_handle: 0,
            focus: focus as u32,
            parent_id: 0,
            screen_device_handle: 0,
        })
        .to_vec();
        let cmd = WsCmd {
            header: CmdHeader {
                op: ClientOp::CreateWindowGroup as u16,
                cmd_len: payload.len() as u16,
                obj_handle: 0,
            },
            payload: &payload,
        };
        let mut ctx = crate::ipc::test_support::RecordingContext::default();
        session.execute_command(server, &mut ctx, &cmd);
        let handle = ctx.status.unwrap();
        assert!(handle > 0);
        handle as u32
    }

    #[test]
    fn test_group_counting_across_sessions() {
        let srv = WindowServer::with_config(WsConfig::default());
        let a = srv.connect(1);
        let b = srv.connect(2);

        let g1 = create_group(&srv, &a, false);
        let g2 = create_group(&srv, &a, false);
        let g3 = create_group(&srv, &b, false);
        a.set_group_priority(g1, 1).unwrap();
        a.set_group_priority(g2, 2).unwrap();
        b.set_group_priority(g3, 2).unwrap();

        assert_eq!(srv.get_total_window_groups(), 3);
        assert_eq!(srv.get_total_window_groups_with_priority(2), 2);
        assert_eq!(srv.get_total_window_groups_with_priority(1), 1);

        assert!(a.free_object(&srv, g2));
        assert_eq!(srv.get_total_window_groups(), 2);
        assert_eq!(srv.get_total_window_groups_with_priority(2), 1);
    }

    #[test]
    fn test_focus_change_posts_events_across_sessions() {
        let srv = WindowServer::with_config(WsConfig::default());
        let a = srv.connect(1);
        let b = srv.connect(2);

        let ga = create_group(&srv, &a, true);
        assert_eq!(
            srv.get_focus(),
            Some(FocusRef {
                session_id: 1,
                group_handle: ga
            })
        );
        let gained = a.next_event().unwrap();
        assert_eq!(gained.code, EventCode::FocusGained);
        assert_eq!(gained.target, ga);

        let gb = create_group(&srv, &b, true);
        assert_eq!(
            srv.get_focus(),
            Some(FocusRef {
                session_id: 2,
                group_handle: gb
            })
        );
        let lost = a.next_event().unwrap();
        assert_eq!(lost.code, EventCode::FocusLost);
        assert_eq!(lost.target, ga);
        assert_eq!(b.next_event().unwrap().code, EventCode::FocusGained);
    }

    #[test]
    fn test_deleting_focused_group_clears_focus() {
        let srv = WindowServer::with_config(WsConfig::default());
        let a = srv.connect(1);
        let ga = create_group(&srv, &a, true);
        assert!(srv.get_focus().is_some());
        assert!(a.free_object(&srv, ga));
        assert_eq!(srv.get_focus(), None);
    }

    #[test]
    fn test_session_teardown_clears_focus_and_registrations() {
        let srv = WindowServer::with_config(WsConfig::default());
        let x = srv.connect(1);
        let other = srv.connect(2);

        let gx = create_group(&srv, &x, true);
        x.add_screen_change_notifier(gx).unwrap();
        let g_other = create_group(&srv, &other, false);
        other.add_screen_change_notifier(g_other).unwrap();

        srv.disconnect(1);
        assert_eq!(srv.get_focus(), None);
        assert_eq!(srv.session_count(), 1);

        // The dead session is never invoked by a later broadcast.
        srv.notify_screen_change(0);
        assert!(x.next_event().is_none());
        let evt = other.next_event().unwrap();
        assert_eq!(evt.code, EventCode::ScreenDeviceChanged);
        assert_eq!(evt.target, g_other);
    }

    #[test]
    fn test_screen_change_broadcast_exactly_once_per_registration() {
        let srv = WindowServer::with_config(two_screen_config());
        let a = srv.connect(1);
        let b = srv.connect(2);

        let ga = create_group(&srv, &a, false);
        let gb = create_group(&srv, &b, false);
        a.add_screen_change_notifier(ga).unwrap();
        a.add_screen_change_notifier(ga).unwrap(); // dedup
        b.add_screen_change_notifier(gb).unwrap();

        srv.notify_screen_change(1);
        let evt = a.next_event().unwrap();
        assert_eq!(evt.arg, 1);
        assert!(a.next_event().is_none());
        assert!(b.next_event().is_some());
        assert!(b.next_event().is_none());
    }

    #[test]
    fn test_mod_broadcast_filters_by_mask() {
        let srv = WindowServer::with_config(WsConfig::default());
        let a = srv.connect(1);
        let ga = create_group(&srv, &a, false);
        let gb = create_group(&srv, &a, false);

        a.add_mod_notifier(
            ga,
            crate::ws::notifiers::ModNotifier {
                modifiers: EventModifiers::SHIFT,
                when: EventControl::Always,
            },
        )
        .unwrap();
        a.add_mod_notifier(
            gb,
            crate::ws::notifiers::ModNotifier {
                modifiers: EventModifiers::CTRL,
                when: EventControl::Always,
            },
        )
        .unwrap();

        srv.notify_mod_changed(EventModifiers::SHIFT, EventModifiers::SHIFT);
        let evt = a.next_event().unwrap();
        assert_eq!(evt.code, EventCode::ModifiersChanged);
        assert_eq!(evt.target, ga);
        assert!(a.next_event().is_none());
    }

    #[test]
    fn test_error_broadcast_honors_focus_control() {
        let srv = WindowServer::with_config(WsConfig::default());
        let a = srv.connect(1);
        let b = srv.connect(2);

        let ga = create_group(&srv, &a, true); // session 1 holds focus
        let gb = create_group(&srv, &b, false);
        a.next_event(); // drain FocusGained

        a.add_error_notifier(
            ga,
            ErrorNotifier {
                when: EventControl::OnlyWithKeyboardFocus,
            },
        )
        .unwrap();
        b.add_error_notifier(
            gb,
            ErrorNotifier {
                when: EventControl::OnlyWithKeyboardFocus,
            },
        )
        .unwrap();

        srv.notify_error(12);
        let evt = a.next_event().unwrap();
        assert_eq!(evt.code, EventCode::ErrorMessage);
        assert_eq!(evt.arg, 12);
        assert!(b.next_event().is_none());
    }

    #[test]
    fn test_screen_config_loaded_once_and_indexed() {
        let srv = WindowServer::with_config(two_screen_config());
        assert_eq!(srv.screen_count(), 2);
        let screen = srv.get_screen_config(1);
        assert_eq!(screen.default_mode().rotation, 90);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_screen_config_out_of_range_fails_loudly() {
        let srv = WindowServer::with_config(two_screen_config());
        srv.get_screen_config(5);
    }

    #[test]
    fn test_missing_config_file_falls_back_to_default() {
        let srv = WindowServer::new("/nonexistent/wsini.toml");
        assert_eq!(srv.screen_count(), 1);
    }

    #[test]
    fn test_cursor_mode_single_slot() {
        let srv = WindowServer::with_config(WsConfig::default());
        assert_eq!(srv.cursor_mode(), PointerCursorMode::None);
        srv.set_cursor_mode(PointerCursorMode::Normal);
        assert_eq!(srv.cursor_mode(), PointerCursorMode::Normal);
    }

    #[test]
    fn test_reconnect_replaces_session() {
        let srv = WindowServer::with_config(WsConfig::default());
        let first = srv.connect(7);
        create_group(&srv, &first, false);
        let second = srv.connect(7);
        assert_eq!(srv.session_count(), 1);
        // Old session was torn down; its groups no longer count.
        assert_eq!(srv.get_total_window_groups(), 0);
        create_group(&srv, &second, false);
        assert_eq!(srv.get_total_window_groups(), 1);
    }

    #[test]
    fn test_reconnect_clears_focus_held_by_old_session() {
        let srv = WindowServer::with_config(WsConfig::default());
        let first = srv.connect(7);
        create_group(&srv, &first, true);
        assert!(srv.get_focus().is_some());

        // Same id, fresh handle space: a group created now gets the same
        // handle the focused group had, and must not inherit its focus.
        let second = srv.connect(7);
        create_group(&srv, &second, false);
        assert_eq!(srv.get_focus(), None);
    }
}
