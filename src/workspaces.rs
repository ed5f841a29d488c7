//! Workspace (virtual desktop) management.
//!
//! Each workspace keeps its member windows in insertion order; that order is
//! the placement hint for tiling (the first window is the master). The
//! workspace count is fixed at startup for the whole session.

use thiserror::Error;
use x11rb::protocol::xproto::Window;

use crate::layout::LayoutMode;

/// Hard cap on the configurable workspace count.
pub const MAX_WORKSPACES: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkspaceError {
    #[error("workspace {0} is out of range")]
    InvalidWorkspace(usize),
}

/// A virtual desktop: an ordered window list and an active layout mode.
#[derive(Debug)]
pub struct Workspace {
    pub id: usize,
    pub windows: Vec<Window>,
    pub mode: LayoutMode,
}

impl Workspace {
    fn new(id: usize, mode: LayoutMode) -> Self {
        Self { id, windows: Vec::new(), mode }
    }

    /// Append a window; new windows join the end of the tiling order.
    pub fn add_window(&mut self, window: Window) {
        if !self.windows.contains(&window) {
            self.windows.push(window);
        }
    }

    pub fn remove_window(&mut self, window: Window) -> bool {
        let before = self.windows.len();
        self.windows.retain(|&w| w != window);
        self.windows.len() != before
    }

    pub fn contains(&self, window: Window) -> bool {
        self.windows.contains(&window)
    }
}

/// All workspaces plus the index of the visible one.
#[derive(Debug)]
pub struct WorkspaceManager {
    workspaces: Vec<Workspace>,
    current: usize,
}

impl WorkspaceManager {
    pub fn new(count: usize, default_mode: LayoutMode) -> Self {
        let count = count.clamp(1, MAX_WORKSPACES);
        Self {
            workspaces: (0..count).map(|i| Workspace::new(i, default_mode)).collect(),
            current: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.workspaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty()
    }

    pub fn current(&self) -> &Workspace {
        &self.workspaces[self.current]
    }

    pub fn current_mut(&mut self) -> &mut Workspace {
        &mut self.workspaces[self.current]
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn get(&self, idx: usize) -> Result<&Workspace, WorkspaceError> {
        self.workspaces.get(idx).ok_or(WorkspaceError::InvalidWorkspace(idx))
    }

    pub fn get_mut(&mut self, idx: usize) -> Result<&mut Workspace, WorkspaceError> {
        self.workspaces.get_mut(idx).ok_or(WorkspaceError::InvalidWorkspace(idx))
    }

    /// Make `target` the visible workspace. Returns the previous index, or
    /// `None` when the target is already current.
    pub fn switch_to(&mut self, target: usize) -> Result<Option<usize>, WorkspaceError> {
        if target >= self.workspaces.len() {
            return Err(WorkspaceError::InvalidWorkspace(target));
        }
        if target == self.current {
            return Ok(None);
        }
        let old = self.current;
        self.current = target;
        Ok(Some(old))
    }

    /// Index of the workspace after the current one, wrapping.
    pub fn next_index(&self) -> usize {
        (self.current + 1) % self.workspaces.len()
    }

    /// Index of the workspace before the current one, wrapping.
    pub fn prev_index(&self) -> usize {
        (self.current + self.workspaces.len() - 1) % self.workspaces.len()
    }

    /// Move a window's membership between workspaces.
    pub fn move_window(&mut self, window: Window, from: usize, to: usize) -> Result<(), WorkspaceError> {
        if to >= self.workspaces.len() {
            return Err(WorkspaceError::InvalidWorkspace(to));
        }
        self.get_mut(from)?.remove_window(window);
        self.workspaces[to].add_window(window);
        Ok(())
    }

    /// Which workspace holds a window, if any.
    pub fn find_window(&self, window: Window) -> Option<usize> {
        self.workspaces.iter().position(|ws| ws.contains(window))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Workspace> {
        self.workspaces.iter()
    }
}
