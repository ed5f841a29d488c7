//! Window property query functions.
//!
//! Stateless helpers over X11 window properties. All of them swallow
//! protocol errors and fall back to a harmless default: the windows being
//! queried can disappear at any moment.

use anyhow::Result;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::*;

use crate::ewmh::Atoms;

/// Read the class half of WM_CLASS (falling back to the instance half).
pub fn get_wm_class(conn: &impl Connection, window: Window) -> String {
    let reply = match conn.get_property(false, window, AtomEnum::WM_CLASS, AtomEnum::STRING, 0, 256) {
        Ok(cookie) => match cookie.reply() {
            Ok(reply) => reply,
            Err(_) => return String::new(),
        },
        Err(_) => return String::new(),
    };

    // WM_CLASS is two NUL-terminated strings: instance, then class.
    let mut parts = reply.value.split(|&b| b == 0).filter(|s| !s.is_empty());
    let instance = parts.next();
    let class = parts.next().or(instance);
    class
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .unwrap_or_default()
}

/// Whether a window advertises itself as a dialog-like surface that should
/// float: WM_TRANSIENT_FOR set, or a _NET_WM_WINDOW_TYPE in the dialog
/// family (dialog, splash, toolbar, utility, menus, tooltip, notification).
pub fn is_dialog(conn: &impl Connection, atoms: &Atoms, window: Window) -> bool {
    if let Ok(cookie) = conn.get_property(
        false,
        window,
        AtomEnum::WM_TRANSIENT_FOR,
        AtomEnum::WINDOW,
        0,
        1,
    ) {
        if let Ok(reply) = cookie.reply() {
            if let Some(mut values) = reply.value32() {
                if values.next().is_some_and(|w| w != 0) {
                    return true;
                }
            }
        }
    }

    let reply = match conn.get_property(false, window, atoms.net_wm_window_type, AtomEnum::ATOM, 0, 32)
    {
        Ok(cookie) => match cookie.reply() {
            Ok(reply) => reply,
            Err(_) => return false,
        },
        Err(_) => return false,
    };

    if let Some(types) = reply.value32() {
        for window_type in types {
            if window_type == atoms.net_wm_window_type_dialog
                || window_type == atoms.net_wm_window_type_splash
                || window_type == atoms.net_wm_window_type_toolbar
                || window_type == atoms.net_wm_window_type_utility
                || window_type == atoms.net_wm_window_type_menu
                || window_type == atoms.net_wm_window_type_popup_menu
                || window_type == atoms.net_wm_window_type_dropdown_menu
                || window_type == atoms.net_wm_window_type_tooltip
                || window_type == atoms.net_wm_window_type_notification
            {
                return true;
            }
        }
    }
    false
}

/// Whether a window participates in the WM_DELETE_WINDOW protocol.
pub fn supports_delete_protocol(conn: &impl Connection, atoms: &Atoms, window: Window) -> bool {
    if let Ok(cookie) = conn.get_property(false, window, atoms.wm_protocols, AtomEnum::ATOM, 0, 32) {
        if let Ok(reply) = cookie.reply() {
            if let Some(protocol_atoms) = reply.value32() {
                return protocol_atoms.into_iter().any(|a| a == atoms.wm_delete_window);
            }
        }
    }
    false
}

/// Ask a window to close itself via WM_DELETE_WINDOW.
pub fn send_delete_window(conn: &impl Connection, atoms: &Atoms, window: Window) -> Result<()> {
    let data = ClientMessageData::from([atoms.wm_delete_window, 0u32, 0u32, 0u32, 0u32]);
    let event = ClientMessageEvent {
        response_type: CLIENT_MESSAGE_EVENT,
        format: 32,
        sequence: 0,
        window,
        type_: atoms.wm_protocols,
        data,
    };
    conn.send_event(false, window, EventMask::NO_EVENT, event)?;
    Ok(())
}
