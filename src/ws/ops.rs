//! Command Protocol Module
//!
//! Wire format of the legacy client protocol: a command buffer is a run of
//! frames, each an 8-byte header followed by an opcode-specific payload,
//! padded to 4-byte alignment. Payload structs are `#[repr(C)]` PODs so the
//! layout stays bit-for-bit compatible with what guest applications send.
//!
//! Listener arming (event-ready / redraw-ready) carries a completion target
//! and therefore arrives through the service boundary, not the command
//! buffer; only the cancel half appears here.

use bytemuck::{Pod, Zeroable};

use crate::error::WsError;

/// Client-level opcodes. Numbering follows the legacy protocol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ClientOp {
    RestoreDefaultHotKey = 0x03,
    EventReadyCancel = 0x06,
    RedrawReadyCancel = 0x0a,
    CreateWindowGroup = 0x0b,
    CreateWindow = 0x0c,
    CreateGc = 0x0d,
    CreateAnimDll = 0x0e,
    CreateScreenDevice = 0x0f,
    CreateSprite = 0x10,
    NumWindowGroups = 0x15,
    NumWindowGroupsAllPriorities = 0x16,
    CreateClick = 0x29,
    FreeObject = 0x2c,
}

impl ClientOp {
    pub fn from_u16(op: u16) -> Result<Self, WsError> {
        Ok(match op {
            0x03 => ClientOp::RestoreDefaultHotKey,
            0x06 => ClientOp::EventReadyCancel,
            0x0a => ClientOp::RedrawReadyCancel,
            0x0b => ClientOp::CreateWindowGroup,
            0x0c => ClientOp::CreateWindow,
            0x0d => ClientOp::CreateGc,
            0x0e => ClientOp::CreateAnimDll,
            0x0f => ClientOp::CreateScreenDevice,
            0x10 => ClientOp::CreateSprite,
            0x15 => ClientOp::NumWindowGroups,
            0x16 => ClientOp::NumWindowGroupsAllPriorities,
            0x29 => ClientOp::CreateClick,
            0x2c => ClientOp::FreeObject,
            other => return Err(WsError::UnknownOpcode(other)),
        })
    }
}

/// Frame header preceding every command payload.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CmdHeader {
    pub op: u16,
    pub cmd_len: u16,
    /// Target object handle; 0 addresses the session itself.
    pub obj_handle: u32,
}

/// One decoded command: header plus its raw payload bytes.
#[derive(Debug, Clone)]
pub struct WsCmd<'a> {
    pub header: CmdHeader,
    pub payload: &'a [u8],
}

impl<'a> WsCmd<'a> {
    /// Decode the payload as a POD struct, checking size exactly.
    pub fn decode<T: Pod>(&self) -> Result<T, WsError> {
        if self.payload.len() != std::mem::size_of::<T>() {
            return Err(WsError::MalformedPayload {
                opcode: self.header.op,
                expected: std::mem::size_of::<T>(),
                got: self.payload.len(),
            });
        }
        // pod_read_unaligned: guest buffers carry no alignment guarantee.
        Ok(bytemuck::pod_read_unaligned(self.payload))
    }
}

/// Split a guest command buffer into frames without copying payloads.
pub fn parse_command_buffer(buf: &[u8]) -> Result<Vec<WsCmd<'_>>, WsError> {
    const HEADER_LEN: usize = std::mem::size_of::<CmdHeader>();

    let mut cmds = Vec::new();
    let mut offset = 0usize;

    while offset < buf.len() {
        if offset + HEADER_LEN > buf.len() {
            return Err(WsError::MalformedCommandBuffer(offset));
        }
        let header: CmdHeader = bytemuck::pod_read_unaligned(&buf[offset..offset + HEADER_LEN]);
        let payload_start = offset + HEADER_LEN;
        let payload_end = payload_start + header.cmd_len as usize;
        if payload_end > buf.len() {
            return Err(WsError::MalformedCommandBuffer(offset));
        }
        cmds.push(WsCmd {
            header,
            payload: &buf[payload_start..payload_end],
        });
        // Frames are padded so the next header starts 4-byte aligned.
        offset = (payload_end + 3) & !3;
    }

    Ok(cmds)
}

// ============================================================================
// Payload layouts
// ============================================================================

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CreateScreenDevice {
    /// Index into the server's screen configuration.
    pub screen_num: u32,
    /// Guest-side address of the client device object, echoed in events.
    pub client_ptr: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CreateWindowGroup {
    /// Guest-side handle/cookie of the client object.
    pub client_handle: u32,
    /// Non-zero to request focus on creation.
    pub focus: u32,
    /// Client-assigned id of the parent window; 0 for the session root.
    pub parent_id: u32,
    /// Screen device the group presents on; 0 for the primary device.
    pub screen_device_handle: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CreateWindow {
    /// Client-assigned id of the parent window or group.
    pub parent_id: u32,
    /// Guest-side handle/cookie of the client object.
    pub client_handle: u32,
    /// Window kind requested by the guest (redraw/blank/backed-up).
    pub win_type: u32,
    /// Display mode requested for the window.
    pub display_mode: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CreateSprite {
    /// Window the sprite is attached to; 0 attaches to the group.
    pub window_handle: u32,
    pub base_pos_x: i32,
    pub base_pos_y: i32,
    pub flags: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct RestoreDefaultHotKey {
    /// Hotkey class to reset (see `ws::HotKeyKind`).
    pub hotkey_type: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct NumWindowGroupsPriority {
    pub priority: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CancelNotification {
    /// Correlation id returned when the item was queued.
    pub correlation_id: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(op: u16, obj_handle: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&op.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(&obj_handle.to_le_bytes());
        out.extend_from_slice(payload);
        while out.len() % 4 != 0 {
            out.push(0);
        }
        out
    }

    #[test]
    fn test_header_layout_is_eight_bytes() {
        assert_eq!(std::mem::size_of::<CmdHeader>(), 8);
        assert_eq!(std::mem::size_of::<CreateWindowGroup>(), 16);
        assert_eq!(std::mem::size_of::<CreateWindow>(), 16);
        assert_eq!(std::mem::size_of::<CreateSprite>(), 16);
        assert_eq!(std::mem::size_of::<CreateScreenDevice>(), 8);
    }

    #[test]
    fn test_parse_two_frames() {
        let payload = bytemuck::bytes_of(&NumWindowGroupsPriority { priority: 7 }).to_vec();
        let mut buf = frame(0x16, 0, &payload);
        buf.extend(frame(0x15, 0, &[]));

        let cmds = parse_command_buffer(&buf).unwrap();
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].header.op, 0x16);
        let p: NumWindowGroupsPriority = cmds[0].decode().unwrap();
        assert_eq!(p.priority, 7);
        assert_eq!(cmds[1].header.op, 0x15);
        assert!(cmds[1].payload.is_empty());
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let mut buf = frame(0x0b, 0, &[0u8; 16]);
        buf.truncate(12); // header says 16 payload bytes, only 4 present
        assert!(matches!(
            parse_command_buffer(&buf),
            Err(WsError::MalformedCommandBuffer(0))
        ));
    }

    #[test]
    fn test_wrong_payload_size_is_protocol_error() {
        let buf = frame(0x0b, 0, &[0u8; 4]);
        let cmds = parse_command_buffer(&buf).unwrap();
        let err = cmds[0].decode::<CreateWindowGroup>().unwrap_err();
        assert!(matches!(err, WsError::MalformedPayload { got: 4, .. }));
    }

    #[test]
    fn test_unknown_opcode() {
        assert!(matches!(
            ClientOp::from_u16(0xbeef),
            Err(WsError::UnknownOpcode(0xbeef))
        ));
        assert_eq!(ClientOp::from_u16(0x0b).unwrap(), ClientOp::CreateWindowGroup);
    }
}
