//! Driver Boundary Module
//!
//! Interfaces the core consumes from platform driver backends. The backends
//! themselves live outside this crate; the core only issues notifications
//! and queries against these traits.

pub mod audio;
