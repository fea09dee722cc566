//! Window Object Graph Module
//!
//! The polymorphic family of window-system objects a session can own, and
//! the tree relations between them. Objects live solely in their session's
//! handle table; relations (parent/child links, device bindings) are stored
//! as handles, so a stale relation degrades to "not found" instead of a
//! dangling pointer.

use crate::ws::common::{PixelTwipsAndRot, Vec2};
use crate::ws::handles::HandleTable;

/// Binding of a session to one configured screen.
#[derive(Debug, Clone)]
pub struct ScreenDevice {
    /// Index into the server's screen configuration.
    pub screen_num: usize,
    /// Guest-side address of the client device object.
    pub client_ptr: u32,
    /// Current display mode.
    pub mode: PixelTwipsAndRot,
}

/// Priority-ordered container of windows; the unit of focus arbitration.
#[derive(Debug, Clone)]
pub struct WindowGroup {
    pub client_handle: u32,
    /// Z-order and focus arbitration priority.
    pub priority: i32,
    /// Position among sibling groups of equal priority.
    pub ordinal_position: i32,
    /// Screen device the group presents on.
    pub device_handle: u32,
    /// Parent group handle; 0 when attached directly under the session root.
    pub parent: u32,
    /// Child window handles, in creation order.
    pub children: Vec<u32>,
    pub accepts_focus: bool,
}

/// Window kinds a guest can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Redraw,
    Blank,
    BackedUp,
}

impl WindowKind {
    pub fn from_wire(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(WindowKind::Redraw),
            1 => Some(WindowKind::Blank),
            2 => Some(WindowKind::BackedUp),
            _ => None,
        }
    }
}

/// A drawable window, attached under a group or another window.
#[derive(Debug, Clone)]
pub struct Window {
    pub client_handle: u32,
    pub kind: WindowKind,
    /// Handle of the parent group or window.
    pub parent: u32,
    /// Screen device the window presents on.
    pub device_handle: u32,
    pub children: Vec<u32>,
}

/// Drawing context bound to a screen device.
#[derive(Debug, Clone, Default)]
pub struct GraphicsContext {
    pub device_handle: u32,
}

/// Loaded animation plugin. The core only tracks identity.
#[derive(Debug, Clone)]
pub struct AnimDll {
    /// Plugin name as sent by the guest (UTF-16 on the wire).
    pub name: String,
}

/// Key-click plugin handle. The core only tracks identity.
#[derive(Debug, Clone, Default)]
pub struct ClickDll {
    pub loaded: bool,
}

/// Sprite anchored to a window.
#[derive(Debug, Clone)]
pub struct Sprite {
    /// Window the sprite follows; 0 when attached to the whole group.
    pub window_handle: u32,
    pub base_pos: Vec2,
    pub flags: u32,
}

/// Tagged family of everything a handle can resolve to.
#[derive(Debug, Clone)]
pub enum WsObject {
    ScreenDevice(ScreenDevice),
    WindowGroup(WindowGroup),
    Window(Window),
    GraphicsContext(GraphicsContext),
    AnimDll(AnimDll),
    ClickDll(ClickDll),
    Sprite(Sprite),
}

impl WsObject {
    pub fn kind_name(&self) -> &'static str {
        match self {
            WsObject::ScreenDevice(_) => "screen device",
            WsObject::WindowGroup(_) => "window group",
            WsObject::Window(_) => "window",
            WsObject::GraphicsContext(_) => "graphics context",
            WsObject::AnimDll(_) => "animation plugin",
            WsObject::ClickDll(_) => "click plugin",
            WsObject::Sprite(_) => "sprite",
        }
    }

    pub fn as_group(&self) -> Option<&WindowGroup> {
        match self {
            WsObject::WindowGroup(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_group_mut(&mut self) -> Option<&mut WindowGroup> {
        match self {
            WsObject::WindowGroup(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_window(&self) -> Option<&Window> {
        match self {
            WsObject::Window(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_window_mut(&mut self) -> Option<&mut Window> {
        match self {
            WsObject::Window(w) => Some(w),
            _ => None,
        }
    }
}

/// Child handles of a tree node, if it is one that can have children.
fn children_of(obj: &WsObject) -> Option<&[u32]> {
    match obj {
        WsObject::WindowGroup(g) => Some(&g.children),
        WsObject::Window(w) => Some(&w.children),
        _ => None,
    }
}

/// Depth-first search of the window tree for a node handle.
///
/// `roots` is the list of top-level group handles owned by the session.
/// Returns the handle only if it is reachable from the root, which is what
/// parent lookups in creation commands require (a deleted-but-referenced
/// handle is unreachable and correctly reported as not found).
pub fn find_window_obj(table: &HandleTable, roots: &[u32], id: u32) -> Option<u32> {
    let mut stack: Vec<u32> = roots.to_vec();
    while let Some(handle) = stack.pop() {
        let Some(obj) = table.get(handle) else {
            continue;
        };
        if handle == id {
            return Some(handle);
        }
        if let Some(children) = children_of(obj) {
            stack.extend_from_slice(children);
        }
    }
    None
}

/// Decode a guest descriptor payload (UTF-16LE code units) into a string.
pub fn decode_wire_name(payload: &[u8]) -> String {
    let units: Vec<u16> = payload
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::handles::HandleTable;

    fn group(device: u32) -> WsObject {
        WsObject::WindowGroup(WindowGroup {
            client_handle: 0,
            priority: 0,
            ordinal_position: 0,
            device_handle: device,
            parent: 0,
            children: Vec::new(),
            accepts_focus: true,
        })
    }

    fn window(parent: u32) -> WsObject {
        WsObject::Window(Window {
            client_handle: 0,
            kind: WindowKind::Redraw,
            parent,
            device_handle: 0,
            children: Vec::new(),
        })
    }

    #[test]
    fn test_find_reaches_nested_window() {
        let mut table = HandleTable::new();
        let g = table.add_object(group(0)).unwrap();
        let w = table.add_object(window(g)).unwrap();
        let w2 = table.add_object(window(w)).unwrap();
        table.get_mut(g).unwrap().as_group_mut().unwrap().children.push(w);
        table.get_mut(w).unwrap().as_window_mut().unwrap().children.push(w2);

        let roots = [g];
        assert_eq!(find_window_obj(&table, &roots, w2), Some(w2));
        assert_eq!(find_window_obj(&table, &roots, g), Some(g));
    }

    #[test]
    fn test_find_misses_unreachable_handle() {
        let mut table = HandleTable::new();
        let g = table.add_object(group(0)).unwrap();
        // A window never linked under any root is not reachable.
        let orphan = table.add_object(window(g)).unwrap();
        assert_eq!(find_window_obj(&table, &[g], orphan), None);
    }

    #[test]
    fn test_decode_wire_name() {
        let raw: Vec<u8> = "anim.dll"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        assert_eq!(decode_wire_name(&raw), "anim.dll");
    }
}
