//! The event dispatcher: tatami's single thread of control.
//!
//! The engine consumes a discriminated stream of protocol notifications
//! ([`WmEvent`]) and produces protocol commands ([`Command`]); it owns all
//! manager state (registry, workspaces, focus) and never touches the X
//! connection itself. That boundary keeps every window-management decision
//! drivable from tests with synthetic event streams.
//!
//! Per-window lifecycle: Unmanaged -> Mapped (Tiled | Floating | Fullscreen)
//! -> Destroyed. Events referencing unknown windows are dropped at debug
//! level; they are expected under races with destruction.

use std::collections::HashSet;

use x11rb::protocol::xproto::Window;

use crate::config::{Action, Settings};
use crate::focus::FocusManager;
use crate::keys::KeyBindings;
use crate::layout;
use crate::registry::{Client, Mode, Registry};
use crate::trace::{ClientSnapshot, EventTrace, StateSnapshot, WorkspaceSnapshot};
use crate::types::Rect;
use crate::workspaces::WorkspaceManager;

/// Window attributes gathered by the transport at map time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowHints {
    /// WM_CLASS class name, for rule matching.
    pub class: String,
    /// The window advertises itself as a dialog/transient.
    pub dialog: bool,
}

/// A protocol notification, as delivered by the transport adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum WmEvent {
    MapRequest { window: Window, geometry: Rect, hints: WindowHints },
    ConfigureRequest { window: Window, geometry: Rect },
    UnmapNotify { window: Window },
    DestroyNotify { window: Window },
    EnterNotify { window: Window },
    KeyPress { modifiers: u16, keysym: u32 },
}

impl WmEvent {
    fn kind(&self) -> &'static str {
        match self {
            WmEvent::MapRequest { .. } => "map_request",
            WmEvent::ConfigureRequest { .. } => "configure_request",
            WmEvent::UnmapNotify { .. } => "unmap_notify",
            WmEvent::DestroyNotify { .. } => "destroy_notify",
            WmEvent::EnterNotify { .. } => "enter_notify",
            WmEvent::KeyPress { .. } => "key_press",
        }
    }

    fn window(&self) -> Option<Window> {
        match self {
            WmEvent::MapRequest { window, .. }
            | WmEvent::ConfigureRequest { window, .. }
            | WmEvent::UnmapNotify { window }
            | WmEvent::DestroyNotify { window }
            | WmEvent::EnterNotify { window } => Some(*window),
            WmEvent::KeyPress { .. } => None,
        }
    }
}

/// A one-way protocol command for the transport adapter.
///
/// `border: true` means the adapter applies the configured border width and
/// shrinks the client so the outer frame matches `geometry`; `false` sends
/// the geometry untouched (fullscreen and unmanaged pass-through).
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Map(Window),
    Unmap(Window),
    Configure { window: Window, geometry: Rect, border: bool },
    Raise(Window),
    SetInputFocus(Option<Window>),
    SetBorder { window: Window, focused: bool },
    Close(Window),
    Spawn(String),
    ReloadConfig,
    Quit,
}

/// The window-management engine.
pub struct Engine {
    registry: Registry,
    workspaces: WorkspaceManager,
    focus: FocusManager,
    bindings: KeyBindings,
    settings: Settings,
    /// Full screen, used by fullscreen windows.
    screen: Rect,
    /// Screen minus reserved panel space and outer gap.
    usable: Rect,
    /// Windows unmapped by the manager itself (hidden workspaces); their
    /// UnmapNotify must not be mistaken for a client withdrawal.
    hidden: HashSet<Window>,
    trace: EventTrace,
}

impl Engine {
    pub fn new(screen: Rect, settings: Settings, bindings: KeyBindings) -> Self {
        let usable = Self::usable_area(screen, &settings);
        Self {
            registry: Registry::new(),
            workspaces: WorkspaceManager::new(settings.workspaces, settings.default_mode),
            focus: FocusManager::new(settings.workspaces),
            bindings,
            settings,
            screen,
            usable,
            hidden: HashSet::new(),
            trace: EventTrace::new(),
        }
    }

    fn usable_area(screen: Rect, settings: &Settings) -> Rect {
        screen.inset(settings.reserved).shrink(settings.outer_gap)
    }

    /// Process one event to completion and return the commands it produced.
    pub fn handle(&mut self, event: WmEvent) -> Vec<Command> {
        self.trace.record(event.kind(), event.window(), String::new());

        let mut cmds = Vec::new();
        match event {
            WmEvent::MapRequest { window, geometry, hints } => {
                self.manage(window, geometry, hints, &mut cmds);
            }
            WmEvent::ConfigureRequest { window, geometry } => {
                self.configure_request(window, geometry, &mut cmds);
            }
            WmEvent::UnmapNotify { window } => {
                if self.hidden.contains(&window) {
                    log::debug!("UnmapNotify for 0x{:x} hidden by the manager, ignoring", window);
                } else {
                    self.unmanage(window, &mut cmds);
                }
            }
            WmEvent::DestroyNotify { window } => {
                self.unmanage(window, &mut cmds);
            }
            WmEvent::EnterNotify { window } => {
                self.enter(window, &mut cmds);
            }
            WmEvent::KeyPress { modifiers, keysym } => {
                self.key_press(modifiers, keysym, &mut cmds);
            }
        }
        cmds
    }

    // -------------------------------------------------------------------
    // Window lifecycle
    // -------------------------------------------------------------------

    fn manage(&mut self, window: Window, geometry: Rect, hints: WindowHints, cmds: &mut Vec<Command>) {
        if self.registry.contains(window) {
            log::debug!("MapRequest for already-managed window 0x{:x}", window);
            return;
        }

        let rule = self.settings.rule_for(&hints.class).cloned();
        let floating = rule
            .as_ref()
            .and_then(|r| r.floating)
            .unwrap_or(hints.dialog);
        let sticky = rule.as_ref().map(|r| r.sticky).unwrap_or(false);
        let current = self.workspaces.current_index();
        let target = rule.as_ref().and_then(|r| r.workspace).unwrap_or(current);

        let mode = if floating { Mode::Floating } else { Mode::Tiled };
        let mut geometry = geometry;
        if floating && geometry.x == 0 && geometry.y == 0 {
            geometry = self.centered(geometry);
        }

        log::info!(
            "Managing window 0x{:x} ({}) as {:?} on workspace {}",
            window,
            hints.class,
            mode,
            target + 1
        );

        let visible = target == current || sticky;
        let mut client = Client::new(window, geometry, mode, target, hints.class);
        client.sticky = sticky;
        client.mapped = visible;
        if self.registry.register(client).is_err() {
            return;
        }
        if let Ok(ws) = self.workspaces.get_mut(target) {
            ws.add_window(window);
        }

        if visible {
            cmds.push(Command::Map(window));
            if mode == Mode::Floating {
                cmds.push(Command::Configure { window, geometry, border: true });
            }
            self.reflow(cmds);
            if self.settings.focus_new_windows && target == current {
                self.focus_window(window, cmds);
            } else {
                cmds.push(Command::SetBorder { window, focused: false });
            }
        }
    }

    fn unmanage(&mut self, window: Window, cmds: &mut Vec<Command>) {
        let client = match self.registry.unregister(window) {
            Ok(c) => c,
            Err(_) => {
                log::debug!("Event for unknown window 0x{:x}, dropping", window);
                return;
            }
        };

        log::info!("Unmanaging window 0x{:x}", window);
        self.hidden.remove(&window);
        if let Ok(ws) = self.workspaces.get_mut(client.workspace) {
            ws.remove_window(window);
        }

        let was_focused = self.focus.focused() == Some(window);
        self.focus.release(window);

        if client.workspace == self.workspaces.current_index() || client.sticky {
            self.reflow(cmds);
        }

        if was_focused {
            self.focus_fallback(cmds);
        }
    }

    /// Focus the best candidate on the active workspace, or nothing.
    fn focus_fallback(&mut self, cmds: &mut Vec<Command>) {
        let current = self.workspaces.current_index();
        let candidate = self
            .focus
            .replacement(current)
            .filter(|&w| self.is_mapped(w))
            .or_else(|| self.first_mapped(current));

        match candidate {
            Some(w) => self.focus_window(w, cmds),
            None => {
                self.focus.clear();
                cmds.push(Command::SetInputFocus(None));
            }
        }
    }

    fn configure_request(&mut self, window: Window, geometry: Rect, cmds: &mut Vec<Command>) {
        match self.registry.get(window) {
            // Not (yet) managed: honor the request untouched. Clients
            // configure before mapping; swallowing this breaks first-map
            // geometry.
            Err(_) => {
                cmds.push(Command::Configure { window, geometry, border: false });
            }
            Ok(client) => match client.mode {
                Mode::Floating => {
                    let _ = self.registry.update_geometry(window, geometry);
                    cmds.push(Command::Configure { window, geometry, border: true });
                }
                // Clients do not get to override tiling: acknowledge by
                // re-asserting the manager-computed geometry.
                Mode::Tiled => {
                    let geometry = client.geometry;
                    cmds.push(Command::Configure { window, geometry, border: true });
                }
                Mode::Fullscreen => {
                    let geometry = client.geometry;
                    cmds.push(Command::Configure { window, geometry, border: false });
                }
            },
        }
    }

    fn enter(&mut self, window: Window, cmds: &mut Vec<Command>) {
        if !self.settings.focus_follows_mouse {
            return;
        }
        match self.registry.get(window) {
            Ok(client) if client.mapped => self.focus_window(window, cmds),
            Ok(_) => {}
            Err(_) => log::debug!("EnterNotify for unknown window 0x{:x}, dropping", window),
        }
    }

    fn key_press(&mut self, modifiers: u16, keysym: u32, cmds: &mut Vec<Command>) {
        if let Some(action) = self.bindings.resolve(modifiers, keysym).cloned() {
            self.execute(action, cmds);
        }
    }

    // -------------------------------------------------------------------
    // Actions
    // -------------------------------------------------------------------

    fn execute(&mut self, action: Action, cmds: &mut Vec<Command>) {
        match action {
            Action::Spawn(command) => cmds.push(Command::Spawn(command)),
            Action::SpawnTerminal => cmds.push(Command::Spawn(self.settings.terminal.clone())),
            Action::FocusNext => self.cycle_focus(true, cmds),
            Action::FocusPrev => self.cycle_focus(false, cmds),
            Action::SwitchWorkspace(n) => self.switch_workspace(n, cmds),
            Action::MoveToWorkspace(n) => self.move_focused_to(n, cmds),
            Action::NextWorkspace => {
                let target = self.workspaces.next_index();
                self.switch_workspace(target, cmds);
            }
            Action::PrevWorkspace => {
                let target = self.workspaces.prev_index();
                self.switch_workspace(target, cmds);
            }
            Action::SetLayout(mode) => {
                if self.workspaces.current().mode != mode {
                    self.workspaces.current_mut().mode = mode;
                    self.reflow(cmds);
                }
            }
            Action::NextLayout => {
                let mode = self.workspaces.current().mode.next();
                self.workspaces.current_mut().mode = mode;
                self.reflow(cmds);
            }
            Action::GrowMaster => self.adjust_master(0.05, cmds),
            Action::ShrinkMaster => self.adjust_master(-0.05, cmds),
            Action::ToggleFloating => self.toggle_floating(cmds),
            Action::ToggleFullscreen => self.toggle_fullscreen(cmds),
            Action::ToggleSticky => {
                if let Some(window) = self.focus.focused() {
                    if let Ok(client) = self.registry.get_mut(window) {
                        client.sticky = !client.sticky;
                        log::info!("Window 0x{:x} sticky: {}", window, client.sticky);
                        self.reflow(cmds);
                    }
                }
            }
            Action::CloseWindow => {
                if let Some(window) = self.focus.focused() {
                    cmds.push(Command::Close(window));
                }
            }
            Action::DumpState => self.dump_state(),
            Action::ReloadConfig => cmds.push(Command::ReloadConfig),
            Action::Quit => cmds.push(Command::Quit),
        }
    }

    fn cycle_focus(&mut self, forward: bool, cmds: &mut Vec<Command>) {
        let order: Vec<Window> = self
            .workspaces
            .current()
            .windows
            .iter()
            .copied()
            .filter(|&w| self.is_mapped(w))
            .collect();

        let next = if forward {
            self.focus.next_in(&order)
        } else {
            self.focus.prev_in(&order)
        };
        if let Some(window) = next {
            self.focus_window(window, cmds);
        }
    }

    fn adjust_master(&mut self, delta: f64, cmds: &mut Vec<Command>) {
        let ratio = (self.settings.params.master_ratio + delta).clamp(0.1, 0.9);
        if ratio != self.settings.params.master_ratio {
            self.settings.params.master_ratio = ratio;
            self.reflow(cmds);
        }
    }

    fn toggle_floating(&mut self, cmds: &mut Vec<Command>) {
        let Some(window) = self.focus.focused() else { return };
        let Ok(client) = self.registry.get_mut(window) else { return };

        match client.mode {
            Mode::Tiled => client.mode = Mode::Floating,
            Mode::Floating => client.mode = Mode::Tiled,
            Mode::Fullscreen => {
                client.mode = Mode::Floating;
                client.saved_mode = None;
                if let Some(geometry) = client.saved_geometry.take() {
                    client.geometry = geometry;
                }
                let geometry = client.geometry;
                cmds.push(Command::Configure { window, geometry, border: true });
            }
        }
        self.reflow(cmds);
    }

    fn toggle_fullscreen(&mut self, cmds: &mut Vec<Command>) {
        let Some(window) = self.focus.focused() else { return };
        let Ok(client) = self.registry.get_mut(window) else { return };

        match client.mode {
            Mode::Fullscreen => {
                let restored = client.saved_mode.take().unwrap_or(Mode::Tiled);
                client.mode = restored;
                if let Some(geometry) = client.saved_geometry.take() {
                    if restored == Mode::Floating {
                        client.geometry = geometry;
                        cmds.push(Command::Configure { window, geometry, border: true });
                    }
                }
            }
            mode => {
                client.saved_mode = Some(mode);
                client.saved_geometry = Some(client.geometry);
                client.mode = Mode::Fullscreen;
            }
        }
        self.reflow(cmds);
    }

    fn dump_state(&self) {
        match serde_json::to_string(&self.snapshot()) {
            Ok(json) => log::info!("state: {}", json),
            Err(e) => log::warn!("Failed to serialize state: {}", e),
        }
        for violation in self.validate() {
            log::warn!("invariant violation: {}", violation);
        }
    }

    // -------------------------------------------------------------------
    // Workspaces
    // -------------------------------------------------------------------

    fn switch_workspace(&mut self, target: usize, cmds: &mut Vec<Command>) {
        let old = match self.workspaces.switch_to(target) {
            Err(e) => {
                log::warn!("{}", e);
                return;
            }
            Ok(None) => return,
            Ok(Some(old)) => old,
        };

        log::info!("Switching workspace {} -> {}", old + 1, target + 1);

        // Hide the previous workspace, sticky windows excepted.
        let to_hide: Vec<Window> = self.workspaces.get(old).map(|ws| ws.windows.clone()).unwrap_or_default();
        for window in to_hide {
            let Ok(client) = self.registry.get_mut(window) else { continue };
            if client.sticky || !client.mapped {
                continue;
            }
            client.mapped = false;
            self.hidden.insert(window);
            cmds.push(Command::Unmap(window));
        }

        // Show the target workspace.
        let to_show: Vec<Window> = self.workspaces.current().windows.clone();
        for window in to_show {
            let Ok(client) = self.registry.get_mut(window) else { continue };
            if !client.mapped {
                client.mapped = true;
                self.hidden.remove(&window);
                cmds.push(Command::Map(window));
            }
        }

        self.reflow(cmds);

        // Restore the workspace's last focused window.
        let candidate = self
            .focus
            .last_focused(target)
            .filter(|&w| self.is_mapped(w))
            .or_else(|| self.first_mapped(target));
        match candidate {
            Some(window) => self.focus_window(window, cmds),
            None => {
                self.focus.clear();
                cmds.push(Command::SetInputFocus(None));
            }
        }
    }

    fn move_focused_to(&mut self, target: usize, cmds: &mut Vec<Command>) {
        let Some(window) = self.focus.focused() else { return };
        if target >= self.workspaces.len() {
            log::warn!("workspace {} is out of range", target);
            return;
        }
        let current = self.workspaces.current_index();
        if target == current {
            return;
        }
        let Ok(client) = self.registry.get_mut(window) else { return };
        let from = client.workspace;
        client.workspace = target;
        if !client.sticky {
            client.mapped = false;
            self.hidden.insert(window);
            cmds.push(Command::Unmap(window));
        }

        let _ = self.workspaces.move_window(window, from, target);
        self.focus.reassign(window, target);

        log::info!("Moved window 0x{:x} to workspace {}", window, target + 1);

        self.reflow(cmds);
        self.focus_fallback(cmds);
    }

    // -------------------------------------------------------------------
    // Focus and layout plumbing
    // -------------------------------------------------------------------

    fn focus_window(&mut self, window: Window, cmds: &mut Vec<Command>) {
        let (workspace, mapped) = match self.registry.get(window) {
            Ok(c) => (c.workspace, c.mapped),
            Err(_) => {
                log::debug!("Not focusing unknown window 0x{:x}", window);
                return;
            }
        };
        if self.focus.focused() == Some(window) {
            return;
        }
        let old = self.focus.focused();
        if let Err(e) = self.focus.focus(window, workspace, mapped) {
            log::debug!("Not focusing 0x{:x}: {}", window, e);
            return;
        }

        if let Some(old) = old {
            if let Ok(client) = self.registry.get_mut(old) {
                if client.focused_border {
                    client.focused_border = false;
                    cmds.push(Command::SetBorder { window: old, focused: false });
                }
            }
        }
        if let Ok(client) = self.registry.get_mut(window) {
            client.focused_border = true;
        }
        cmds.push(Command::SetBorder { window, focused: true });
        cmds.push(Command::Raise(window));
        cmds.push(Command::SetInputFocus(Some(window)));
    }

    /// Recompute the visible workspace's layout and emit geometry commands
    /// for windows whose assignment changed. Unchanged input produces no
    /// commands, so redundant reflows cause no flicker.
    fn reflow(&mut self, cmds: &mut Vec<Command>) {
        let order: Vec<Window> = self.workspaces.current().windows.clone();
        let mode = self.workspaces.current().mode;

        let tiled: Vec<Window> = order
            .iter()
            .copied()
            .filter(|&w| {
                self.registry
                    .get(w)
                    .map(|c| c.mapped && c.mode == Mode::Tiled && !c.sticky)
                    .unwrap_or(false)
            })
            .collect();

        for (window, geometry) in layout::compute(&tiled, mode, self.usable, &self.settings.params) {
            let Ok(client) = self.registry.get_mut(window) else { continue };
            if client.geometry != geometry {
                client.geometry = geometry;
                cmds.push(Command::Configure { window, geometry, border: true });
            }
        }

        // Fullscreen windows cover the whole screen and stay on top.
        for window in order {
            let Ok(client) = self.registry.get_mut(window) else { continue };
            if client.mapped && client.mode == Mode::Fullscreen && client.geometry != self.screen {
                client.geometry = self.screen;
                let geometry = self.screen;
                cmds.push(Command::Configure { window, geometry, border: false });
                cmds.push(Command::Raise(window));
            }
        }
    }

    fn centered(&self, geometry: Rect) -> Rect {
        Rect {
            x: self.usable.x + (self.usable.width.saturating_sub(geometry.width) / 2) as i32,
            y: self.usable.y + (self.usable.height.saturating_sub(geometry.height) / 2) as i32,
            ..geometry
        }
    }

    fn is_mapped(&self, window: Window) -> bool {
        self.registry.get(window).map(|c| c.mapped).unwrap_or(false)
    }

    fn first_mapped(&self, workspace: usize) -> Option<Window> {
        self.workspaces
            .get(workspace)
            .ok()?
            .windows
            .iter()
            .copied()
            .find(|&w| self.is_mapped(w))
    }

    // -------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------

    pub fn focused(&self) -> Option<Window> {
        self.focus.focused()
    }

    pub fn active_workspace(&self) -> usize {
        self.workspaces.current_index()
    }

    pub fn workspace_count(&self) -> usize {
        self.workspaces.len()
    }

    /// All managed windows, for the EWMH client list.
    pub fn client_ids(&self) -> Vec<Window> {
        self.registry.ids()
    }

    pub fn bindings(&self) -> &KeyBindings {
        &self.bindings
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Geometry the engine believes a window has. Test hook.
    pub fn geometry_of(&self, window: Window) -> Option<Rect> {
        self.registry.get(window).map(|c| c.geometry).ok()
    }

    /// Swap in reloaded settings and bindings. The workspace count is fixed
    /// for the session; a changed count is reported and kept as-is.
    pub fn apply_settings(&mut self, mut settings: Settings, bindings: KeyBindings) -> Vec<Command> {
        if settings.workspaces != self.workspaces.len() {
            log::warn!(
                "Workspace count changes require a restart; keeping {}",
                self.workspaces.len()
            );
            settings.workspaces = self.workspaces.len();
        }
        self.settings = settings;
        self.bindings = bindings;
        self.usable = Self::usable_area(self.screen, &self.settings);

        let mut cmds = Vec::new();
        self.reflow(&mut cmds);
        cmds
    }

    /// Serializable snapshot of the full manager state.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            focused: self.focus.focused(),
            active_workspace: self.workspaces.current_index(),
            workspaces: self
                .workspaces
                .iter()
                .map(|ws| WorkspaceSnapshot {
                    id: ws.id,
                    mode: ws.mode,
                    windows: ws
                        .windows
                        .iter()
                        .filter_map(|&w| self.registry.get(w).ok())
                        .map(|c| ClientSnapshot {
                            id: c.id,
                            class: c.class.clone(),
                            mode: c.mode,
                            mapped: c.mapped,
                            sticky: c.sticky,
                            geometry: c.geometry,
                        })
                        .collect(),
                })
                .collect(),
            recent_events: self.trace.recent(32),
        }
    }

    /// Check the structural invariants. Returns human-readable violations;
    /// an empty list means the state is consistent.
    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let current = self.workspaces.current_index();

        if let Some(focused) = self.focus.focused() {
            match self.registry.get(focused) {
                Err(_) => violations.push(format!("focused window 0x{:x} is not registered", focused)),
                Ok(c) => {
                    if !c.mapped {
                        violations.push(format!("focused window 0x{:x} is not mapped", focused));
                    }
                    if c.workspace != current && !c.sticky {
                        violations.push(format!(
                            "focused window 0x{:x} is on workspace {} but {} is active",
                            focused, c.workspace, current
                        ));
                    }
                }
            }
        }

        for ws in self.workspaces.iter() {
            for &w in &ws.windows {
                match self.registry.get(w) {
                    Err(_) => violations.push(format!(
                        "workspace {} lists unregistered window 0x{:x}",
                        ws.id, w
                    )),
                    Ok(c) if c.workspace != ws.id => violations.push(format!(
                        "window 0x{:x} is owned by workspace {} but listed on {}",
                        w, c.workspace, ws.id
                    )),
                    Ok(_) => {}
                }
            }
        }

        for client in self.registry.iter() {
            match self.workspaces.get(client.workspace) {
                Err(_) => violations.push(format!(
                    "window 0x{:x} references invalid workspace {}",
                    client.id, client.workspace
                )),
                Ok(ws) if !ws.contains(client.id) => violations.push(format!(
                    "window 0x{:x} is missing from workspace {}",
                    client.id, client.workspace
                )),
                Ok(_) => {}
            }

            if client.mapped
                && client.mode == Mode::Tiled
                && !client.sticky
                && client.workspace == current
                && !self.usable.contains(&client.geometry)
            {
                violations.push(format!(
                    "tiled window 0x{:x} geometry {:?} escapes the usable area {:?}",
                    client.id, client.geometry, self.usable
                ));
            }
        }

        for &w in &self.hidden {
            match self.registry.get(w) {
                Err(_) => violations.push(format!("hidden window 0x{:x} is not registered", w)),
                Ok(c) if c.mapped => {
                    violations.push(format!("hidden window 0x{:x} is marked mapped", w))
                }
                Ok(_) => {}
            }
        }

        violations
    }
}
