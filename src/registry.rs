//! The window registry: the authoritative table of managed clients.
//!
//! The registry is a plain in-memory map and never talks to the X server.
//! Event handlers treat `NotFound` as a no-op, since protocol events can
//! race with window destruction.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;
use x11rb::protocol::xproto::Window;

use crate::types::Rect;

/// How a client participates in layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Placed by the layout engine; clients cannot override geometry.
    Tiled,
    /// Keeps manager- or user-assigned geometry; exempt from tiling.
    Floating,
    /// Covers the whole screen, raised above everything else.
    Fullscreen,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("window 0x{0:x} is already registered")]
    DuplicateWindow(Window),
    #[error("window 0x{0:x} is not registered")]
    NotFound(Window),
}

/// One managed client window.
#[derive(Debug, Clone, PartialEq)]
pub struct Client {
    pub id: Window,
    /// Last geometry the manager assigned or accepted from the client.
    pub geometry: Rect,
    pub mode: Mode,
    /// Currently visible on screen.
    pub mapped: bool,
    /// Owning workspace index (exactly one).
    pub workspace: usize,
    /// Visible on every workspace; exempt from hide-on-switch.
    pub sticky: bool,
    /// Decoration flag mirrored to the border color.
    pub focused_border: bool,
    /// WM_CLASS, for rule matching and diagnostics.
    pub class: String,
    /// Mode to restore when leaving fullscreen.
    pub saved_mode: Option<Mode>,
    /// Geometry to restore when leaving fullscreen.
    pub saved_geometry: Option<Rect>,
}

impl Client {
    pub fn new(id: Window, geometry: Rect, mode: Mode, workspace: usize, class: String) -> Self {
        Self {
            id,
            geometry,
            mode,
            mapped: false,
            workspace,
            sticky: false,
            focused_border: false,
            class,
            saved_mode: None,
            saved_geometry: None,
        }
    }
}

/// In-memory table of all managed clients, keyed by protocol window id.
#[derive(Debug, Default)]
pub struct Registry {
    clients: HashMap<Window, Client>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client. Fails if the window id is already present.
    pub fn register(&mut self, client: Client) -> Result<(), RegistryError> {
        if self.clients.contains_key(&client.id) {
            return Err(RegistryError::DuplicateWindow(client.id));
        }
        self.clients.insert(client.id, client);
        Ok(())
    }

    /// Remove and return a client.
    pub fn unregister(&mut self, id: Window) -> Result<Client, RegistryError> {
        self.clients.remove(&id).ok_or(RegistryError::NotFound(id))
    }

    pub fn get(&self, id: Window) -> Result<&Client, RegistryError> {
        self.clients.get(&id).ok_or(RegistryError::NotFound(id))
    }

    pub fn get_mut(&mut self, id: Window) -> Result<&mut Client, RegistryError> {
        self.clients.get_mut(&id).ok_or(RegistryError::NotFound(id))
    }

    pub fn contains(&self, id: Window) -> bool {
        self.clients.contains_key(&id)
    }

    pub fn update_geometry(&mut self, id: Window, geometry: Rect) -> Result<(), RegistryError> {
        self.get_mut(id)?.geometry = geometry;
        Ok(())
    }

    pub fn set_mode(&mut self, id: Window, mode: Mode) -> Result<(), RegistryError> {
        self.get_mut(id)?.mode = mode;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// All managed window ids, in ascending id order for stable output.
    pub fn ids(&self) -> Vec<Window> {
        let mut ids: Vec<Window> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(id: Window) -> Client {
        Client::new(id, Rect::new(0, 0, 100, 100), Mode::Tiled, 0, "xterm".to_string())
    }

    #[test]
    fn register_and_lookup() {
        let mut reg = Registry::new();
        reg.register(client(1)).unwrap();

        assert!(reg.contains(1));
        assert_eq!(reg.get(1).unwrap().class, "xterm");
        assert_eq!(reg.get(2), Err(RegistryError::NotFound(2)));
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut reg = Registry::new();
        reg.register(client(1)).unwrap();
        assert_eq!(reg.register(client(1)), Err(RegistryError::DuplicateWindow(1)));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn unregister_returns_client() {
        let mut reg = Registry::new();
        reg.register(client(7)).unwrap();

        let removed = reg.unregister(7).unwrap();
        assert_eq!(removed.id, 7);
        assert!(reg.is_empty());
        assert_eq!(reg.unregister(7), Err(RegistryError::NotFound(7)));
    }

    #[test]
    fn update_geometry_and_mode() {
        let mut reg = Registry::new();
        reg.register(client(3)).unwrap();

        let rect = Rect::new(10, 20, 300, 200);
        reg.update_geometry(3, rect).unwrap();
        reg.set_mode(3, Mode::Floating).unwrap();

        let c = reg.get(3).unwrap();
        assert_eq!(c.geometry, rect);
        assert_eq!(c.mode, Mode::Floating);

        assert_eq!(
            reg.update_geometry(9, rect),
            Err(RegistryError::NotFound(9))
        );
    }

    #[test]
    fn ids_are_sorted() {
        let mut reg = Registry::new();
        for id in [5, 1, 3] {
            reg.register(client(id)).unwrap();
        }
        assert_eq!(reg.ids(), vec![1, 3, 5]);
    }
}
