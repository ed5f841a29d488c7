//! Focus and stacking management.
//!
//! Tracks the focused window and a per-workspace recency list used to
//! restore focus on workspace switches and to pick a replacement when the
//! focused window goes away. Under the top-of-stack raising model the
//! recency list doubles as the stacking order, most recent last.

use thiserror::Error;
use x11rb::protocol::xproto::Window;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FocusError {
    #[error("window 0x{0:x} is not mapped")]
    NotMapped(Window),
}

#[derive(Debug)]
pub struct FocusManager {
    focused: Option<Window>,
    /// Focus recency per workspace, most recent last.
    history: Vec<Vec<Window>>,
}

impl FocusManager {
    pub fn new(workspaces: usize) -> Self {
        Self {
            focused: None,
            history: vec![Vec::new(); workspaces],
        }
    }

    pub fn focused(&self) -> Option<Window> {
        self.focused
    }

    /// Make `window` the focused window and record it as most recent on its
    /// workspace. Fails if the window is not currently mapped.
    pub fn focus(&mut self, window: Window, workspace: usize, mapped: bool) -> Result<(), FocusError> {
        if !mapped {
            return Err(FocusError::NotMapped(window));
        }
        self.focused = Some(window);
        if let Some(recency) = self.history.get_mut(workspace) {
            recency.retain(|&w| w != window);
            recency.push(window);
        }
        Ok(())
    }

    /// Drop focus without touching history (no window left to focus).
    pub fn clear(&mut self) {
        self.focused = None;
    }

    /// Forget a window entirely. Clears focus if it was focused.
    pub fn release(&mut self, window: Window) {
        if self.focused == Some(window) {
            self.focused = None;
        }
        for recency in &mut self.history {
            recency.retain(|&w| w != window);
        }
    }

    /// Move a window's recency record to another workspace, e.g. when its
    /// membership changes. Clears focus if the window was focused.
    pub fn reassign(&mut self, window: Window, workspace: usize) {
        if self.focused == Some(window) {
            self.focused = None;
        }
        for recency in &mut self.history {
            recency.retain(|&w| w != window);
        }
        if let Some(recency) = self.history.get_mut(workspace) {
            recency.push(window);
        }
    }

    /// Best surviving focus candidate for a workspace: the most recently
    /// focused window still in its recency list.
    pub fn replacement(&self, workspace: usize) -> Option<Window> {
        self.history.get(workspace).and_then(|r| r.last().copied())
    }

    /// Last focused window of a workspace, for restoration on switch.
    pub fn last_focused(&self, workspace: usize) -> Option<Window> {
        self.replacement(workspace)
    }

    /// Next window after the focused one in `order`, wrapping. Falls back to
    /// the first entry when nothing (or nothing in `order`) is focused.
    pub fn next_in(&self, order: &[Window]) -> Option<Window> {
        self.cycle(order, true)
    }

    /// Previous window before the focused one in `order`, wrapping.
    pub fn prev_in(&self, order: &[Window]) -> Option<Window> {
        self.cycle(order, false)
    }

    fn cycle(&self, order: &[Window], forward: bool) -> Option<Window> {
        if order.is_empty() {
            return None;
        }
        let current = self
            .focused
            .and_then(|w| order.iter().position(|&x| x == w));
        let idx = match current {
            None => 0,
            Some(i) if forward => (i + 1) % order.len(),
            Some(0) => order.len() - 1,
            Some(i) => i - 1,
        };
        Some(order[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn focus_requires_mapped() {
        let mut fm = FocusManager::new(2);
        assert_eq!(fm.focus(1, 0, false), Err(FocusError::NotMapped(1)));
        assert_eq!(fm.focused(), None);

        fm.focus(1, 0, true).unwrap();
        assert_eq!(fm.focused(), Some(1));
    }

    #[test]
    fn replacement_follows_recency() {
        let mut fm = FocusManager::new(1);
        fm.focus(1, 0, true).unwrap();
        fm.focus(2, 0, true).unwrap();
        fm.focus(3, 0, true).unwrap();

        fm.release(3);
        assert_eq!(fm.focused(), None);
        assert_eq!(fm.replacement(0), Some(2));

        fm.release(2);
        assert_eq!(fm.replacement(0), Some(1));

        fm.release(1);
        assert_eq!(fm.replacement(0), None);
    }

    #[test]
    fn refocusing_moves_to_front_of_recency() {
        let mut fm = FocusManager::new(1);
        fm.focus(1, 0, true).unwrap();
        fm.focus(2, 0, true).unwrap();
        fm.focus(1, 0, true).unwrap();

        fm.release(1);
        assert_eq!(fm.replacement(0), Some(2));
    }

    #[test]
    fn per_workspace_history_is_independent() {
        let mut fm = FocusManager::new(2);
        fm.focus(1, 0, true).unwrap();
        fm.focus(2, 1, true).unwrap();

        assert_eq!(fm.last_focused(0), Some(1));
        assert_eq!(fm.last_focused(1), Some(2));

        fm.release(2);
        assert_eq!(fm.last_focused(0), Some(1));
        assert_eq!(fm.last_focused(1), None);
    }

    #[test]
    fn cycling_wraps_both_ways() {
        let mut fm = FocusManager::new(1);
        let order = [10, 20, 30];

        assert_eq!(fm.next_in(&order), Some(10));

        fm.focus(10, 0, true).unwrap();
        assert_eq!(fm.next_in(&order), Some(20));
        assert_eq!(fm.prev_in(&order), Some(30));

        fm.focus(30, 0, true).unwrap();
        assert_eq!(fm.next_in(&order), Some(10));

        assert_eq!(fm.next_in(&[]), None);
    }

    #[test]
    fn release_of_unfocused_window_keeps_focus() {
        let mut fm = FocusManager::new(1);
        fm.focus(1, 0, true).unwrap();
        fm.focus(2, 0, true).unwrap();

        fm.release(1);
        assert_eq!(fm.focused(), Some(2));
    }
}
