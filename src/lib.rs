//! wserv: session, object and notification core of an emulated legacy
//! mobile window server.
//!
//! One server process, many guest sessions. Each session owns a handle table
//! of window-system objects, a window tree, two ordered notification queues
//! (redraws and general events) and three deduplicated notifier registries.
//! The [`ws::WindowServer`] registry tracks every live session, global focus,
//! the pointer-cursor mode and the screen configuration, and performs
//! cross-session aggregation and broadcast.
//!
//! Message transport, guest CPU/memory emulation and actual rasterization
//! are external collaborators; see [`ipc`] and [`drivers`] for the
//! boundaries this core consumes.

pub mod config;
pub mod drivers;
pub mod error;
pub mod ipc;
pub mod ws;

pub use config::WsConfig;
pub use error::WsError;
pub use ws::session::WsSession;
pub use ws::WindowServer;
