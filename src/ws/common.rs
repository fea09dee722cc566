//! Common Window-Server Types
//!
//! Event model shared between sessions, queues and notifier registries:
//! event codes, modifier masks, screen orientation and display modes.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Integer 2D vector (pixels or twips depending on context).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: i32,
    pub y: i32,
}

impl Vec2 {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Display rotation, quarter turns only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphicsOrientation {
    Normal,
    Rotated90,
    Rotated180,
    Rotated270,
}

impl GraphicsOrientation {
    /// Map a rotation in degrees to an orientation.
    ///
    /// Panics on anything other than 0/90/180/270: a bad rotation in the
    /// screen config is a startup bug, not a runtime condition.
    pub fn from_degrees(rot: i32) -> Self {
        match rot {
            0 => GraphicsOrientation::Normal,
            90 => GraphicsOrientation::Rotated90,
            180 => GraphicsOrientation::Rotated180,
            270 => GraphicsOrientation::Rotated270,
            _ => panic!("invalid screen rotation: {} degrees", rot),
        }
    }
}

bitflags! {
    /// Keyboard modifier mask as the legacy protocol encodes it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventModifiers: u32 {
        const SHIFT = 1 << 0;
        const CTRL = 1 << 1;
        const ALT = 1 << 2;
        const FUNC = 1 << 3;
        const CAPS_LOCK = 1 << 4;
        const NUM_LOCK = 1 << 5;
    }
}

/// When a registration wants to be told about its event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventControl {
    /// Always deliver.
    Always,
    /// Deliver only while the requesting object's group has focus.
    OnlyWithKeyboardFocus,
    /// Never deliver (registration kept but muted).
    Never,
}

/// Event codes carried in general events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCode {
    Redraw,
    KeyDown,
    KeyUp,
    FocusGained,
    FocusLost,
    ModifiersChanged,
    ScreenDeviceChanged,
    ErrorMessage,
}

/// One asynchronous event destined for a listening guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WsEvent {
    pub code: EventCode,
    /// Handle of the window-system object the event concerns.
    pub target: u32,
    /// Event-specific word (modifier mask, error code, screen number...).
    pub arg: u32,
    /// Server timestamp, microseconds.
    pub time: u64,
}

/// A pending redraw: which window, and the dirty rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedrawEvent {
    pub window_handle: u32,
    pub top_left: Vec2,
    pub bottom_right: Vec2,
}

/// Global pointer-cursor display mode, one slot server-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointerCursorMode {
    #[default]
    None,
    Fixed,
    Normal,
    Window,
}

/// Pixel size, physical size and rotation of one display mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelTwipsAndRot {
    pub pixel_size: Vec2,
    pub twips_size: Vec2,
    pub orientation: GraphicsOrientation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orientation_from_degrees() {
        assert_eq!(
            GraphicsOrientation::from_degrees(0),
            GraphicsOrientation::Normal
        );
        assert_eq!(
            GraphicsOrientation::from_degrees(270),
            GraphicsOrientation::Rotated270
        );
    }

    #[test]
    #[should_panic(expected = "invalid screen rotation")]
    fn test_orientation_rejects_odd_angle() {
        GraphicsOrientation::from_degrees(45);
    }

    #[test]
    fn test_modifier_mask_bits() {
        let m = EventModifiers::SHIFT | EventModifiers::ALT;
        assert!(m.contains(EventModifiers::SHIFT));
        assert!(!m.contains(EventModifiers::CTRL));
        assert_eq!(m.bits(), 0b101);
    }
}
