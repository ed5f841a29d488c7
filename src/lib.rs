//! tatami - a tiling window manager for X11.
//!
//! The crate is split along the transport boundary: everything the window
//! manager decides lives in [`engine`] and the modules it drives (registry,
//! layout, focus, workspaces, keys), all free of X I/O. The [`x11`] adapter
//! owns the server connection, translates protocol notifications into
//! [`engine::WmEvent`]s and executes the [`engine::Command`]s that come back.

pub mod config;
pub mod engine;
pub mod ewmh;
pub mod focus;
pub mod keys;
pub mod layout;
pub mod registry;
pub mod trace;
pub mod types;
pub mod window_query;
pub mod workspaces;
pub mod x11;
