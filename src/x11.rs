//! The X11 transport adapter.
//!
//! Owns the server connection and everything protocol-shaped: becoming the
//! window manager, key grabbing, keycode resolution, translating x11rb
//! events into [`WmEvent`]s and executing the [`Command`]s the engine
//! returns. No window-management policy lives here.

use std::process::Command as ProcessCommand;

use anyhow::{Context, Result};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::*;
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

use crate::config::Settings;
use crate::engine::{Command, Engine, WindowHints, WmEvent};
use crate::ewmh::Atoms;
use crate::keys::Chord;
use crate::types::Rect;
use crate::window_query;

/// Cached keyboard mapping for keycode <-> keysym resolution.
struct KeyboardMap {
    min_keycode: Keycode,
    keysyms_per_keycode: usize,
    keysyms: Vec<u32>,
}

impl KeyboardMap {
    fn load(conn: &RustConnection) -> Result<Self> {
        let setup = conn.setup();
        let min_keycode = setup.min_keycode;
        let max_keycode = setup.max_keycode;
        let mapping = conn
            .get_keyboard_mapping(min_keycode, max_keycode - min_keycode + 1)?
            .reply()?;
        Ok(Self {
            min_keycode,
            keysyms_per_keycode: mapping.keysyms_per_keycode as usize,
            keysyms: mapping.keysyms,
        })
    }

    /// Primary (unshifted) keysym for a keycode.
    fn keysym(&self, keycode: Keycode) -> u32 {
        let idx = keycode.saturating_sub(self.min_keycode) as usize * self.keysyms_per_keycode;
        self.keysyms.get(idx).copied().unwrap_or(0)
    }

    /// First keycode producing a keysym, in any shift column.
    fn keycode(&self, keysym: u32) -> Option<Keycode> {
        self.keysyms
            .chunks(self.keysyms_per_keycode)
            .position(|chunk| chunk.contains(&keysym))
            .map(|i| self.min_keycode + i as u8)
    }
}

/// The connection to the display server, exclusively owned here; all
/// commands are serialized through it in event-arrival order.
pub struct X11Adapter {
    conn: RustConnection,
    screen_num: usize,
    root: Window,
    atoms: Atoms,
    check_window: Window,
    border_width: u32,
    border_focused: u32,
    border_unfocused: u32,
    keymap: KeyboardMap,
    grabbed: Vec<(Keycode, u16)>,
    last_client_list: Vec<Window>,
    last_active: Option<Window>,
    last_desktop: Option<usize>,
}

impl X11Adapter {
    /// Connect to the X server and intern the atoms we need.
    pub fn connect(settings: &Settings) -> Result<Self> {
        let (conn, screen_num) =
            RustConnection::connect(None).context("Failed to connect to X11 server")?;

        let screen = &conn.setup().roots[screen_num];
        let root = screen.root;
        log::info!(
            "Connected to X11, screen {}, root window 0x{:x}, {}x{}",
            screen_num,
            root,
            screen.width_in_pixels,
            screen.height_in_pixels
        );

        let atoms = Atoms::new(&conn)?;

        // Small invisible window backing _NET_SUPPORTING_WM_CHECK.
        let check_window = conn.generate_id()?;
        conn.create_window(
            0,
            check_window,
            root,
            -1,
            -1,
            1,
            1,
            0,
            WindowClass::INPUT_ONLY,
            0,
            &CreateWindowAux::new(),
        )?;

        let keymap = KeyboardMap::load(&conn)?;

        Ok(Self {
            conn,
            screen_num,
            root,
            atoms,
            check_window,
            border_width: settings.border_width,
            border_focused: settings.border_focused,
            border_unfocused: settings.border_unfocused,
            keymap,
            grabbed: Vec::new(),
            last_client_list: Vec::new(),
            last_active: None,
            last_desktop: None,
        })
    }

    /// Full screen geometry.
    pub fn screen_rect(&self) -> Rect {
        let screen = &self.conn.setup().roots[self.screen_num];
        Rect::new(
            0,
            0,
            screen.width_in_pixels as u32,
            screen.height_in_pixels as u32,
        )
    }

    /// Become the window manager by requesting SubstructureRedirect on the
    /// root window. Fails if another manager is running.
    pub fn become_wm(&self) -> Result<()> {
        let event_mask = EventMask::SUBSTRUCTURE_REDIRECT
            | EventMask::SUBSTRUCTURE_NOTIFY
            | EventMask::STRUCTURE_NOTIFY;

        let result = self.conn.change_window_attributes(
            self.root,
            &ChangeWindowAttributesAux::new().event_mask(event_mask),
        );
        self.conn.flush()?;

        if let Err(e) = result?.check() {
            anyhow::bail!("Another window manager is already running! Error: {}", e);
        }

        log::info!("Successfully became the window manager");
        Ok(())
    }

    /// Advertise EWMH support on the root window.
    pub fn setup_ewmh(&self, workspaces: usize) -> Result<()> {
        let supported = [
            self.atoms.net_supported,
            self.atoms.net_client_list,
            self.atoms.net_active_window,
            self.atoms.net_wm_name,
            self.atoms.net_supporting_wm_check,
            self.atoms.net_current_desktop,
            self.atoms.net_number_of_desktops,
            self.atoms.net_wm_window_type,
        ];
        self.conn.change_property32(
            PropMode::REPLACE,
            self.root,
            self.atoms.net_supported,
            AtomEnum::ATOM,
            &supported,
        )?;

        self.conn.change_property32(
            PropMode::REPLACE,
            self.root,
            self.atoms.net_supporting_wm_check,
            AtomEnum::WINDOW,
            &[self.check_window],
        )?;
        self.conn.change_property32(
            PropMode::REPLACE,
            self.check_window,
            self.atoms.net_supporting_wm_check,
            AtomEnum::WINDOW,
            &[self.check_window],
        )?;
        self.conn.change_property8(
            PropMode::REPLACE,
            self.check_window,
            self.atoms.net_wm_name,
            self.atoms.utf8_string,
            b"tatami",
        )?;

        self.conn.change_property32(
            PropMode::REPLACE,
            self.root,
            self.atoms.net_number_of_desktops,
            AtomEnum::CARDINAL,
            &[workspaces as u32],
        )?;
        self.conn.change_property32(
            PropMode::REPLACE,
            self.root,
            self.atoms.net_current_desktop,
            AtomEnum::CARDINAL,
            &[0],
        )?;
        self.conn.change_property32(
            PropMode::REPLACE,
            self.root,
            self.atoms.net_client_list,
            AtomEnum::WINDOW,
            &[],
        )?;

        self.conn.flush()?;
        log::info!("EWMH properties set up");
        Ok(())
    }

    /// Grab every bound chord, with and without NumLock/CapsLock. A failed
    /// grab (key already grabbed elsewhere) is reported and skipped.
    pub fn grab_keys<'a>(&mut self, chords: impl Iterator<Item = &'a Chord>) -> Result<()> {
        self.ungrab_all()?;

        for chord in chords {
            let Some(keycode) = self.keymap.keycode(chord.keysym) else {
                log::warn!("No keycode for keysym 0x{:x}, skipping grab", chord.keysym);
                continue;
            };
            match self.grab_chord(keycode, chord.modifiers) {
                Ok(()) => self.grabbed.push((keycode, chord.modifiers)),
                Err(e) => log::warn!(
                    "Failed to grab keysym 0x{:x} (keycode {}): {}",
                    chord.keysym,
                    keycode,
                    e
                ),
            }
        }

        self.conn.flush()?;
        log::info!("Grabbed {} key bindings", self.grabbed.len());
        Ok(())
    }

    fn grab_chord(&self, keycode: Keycode, modifiers: u16) -> Result<()> {
        let base = ModMask::from(modifiers);
        for extra in Self::lock_variants() {
            self.conn
                .grab_key(
                    false,
                    self.root,
                    base | extra,
                    keycode,
                    GrabMode::ASYNC,
                    GrabMode::ASYNC,
                )?
                .check()?;
        }
        Ok(())
    }

    /// Release every grab we hold. Part of both reload and shutdown.
    pub fn ungrab_all(&mut self) -> Result<()> {
        for (keycode, modifiers) in self.grabbed.drain(..) {
            let base = ModMask::from(modifiers);
            for extra in Self::lock_variants() {
                let _ = self.conn.ungrab_key(keycode, self.root, base | extra);
            }
        }
        self.conn.flush()?;
        Ok(())
    }

    fn lock_variants() -> [ModMask; 4] {
        let numlock = ModMask::M2;
        let capslock = ModMask::LOCK;
        [ModMask::from(0u16), capslock, numlock, capslock | numlock]
    }

    /// Manage windows that existed before we started, as synthetic map
    /// requests for the engine.
    pub fn adopt_existing(&self) -> Result<Vec<WmEvent>> {
        let tree = self.conn.query_tree(self.root)?.reply()?;

        let mut events = Vec::new();
        for &window in &tree.children {
            if window == self.check_window {
                continue;
            }
            let attrs = match self.conn.get_window_attributes(window)?.reply() {
                Ok(attrs) => attrs,
                Err(_) => continue,
            };
            // Skip popups and windows that are not viewable.
            if attrs.override_redirect || attrs.map_state != MapState::VIEWABLE {
                continue;
            }
            match self.map_request_event(window) {
                Ok(event) => {
                    log::info!("Adopting existing window 0x{:x}", window);
                    events.push(event);
                }
                Err(e) => log::debug!("Skipping window 0x{:x}: {}", window, e),
            }
        }
        Ok(events)
    }

    /// Block for the next protocol notification and translate it. `None`
    /// for events the engine has no interest in; `Err` only for connection
    /// loss, which is fatal.
    pub fn next_event(&mut self) -> Result<Option<WmEvent>> {
        let event = self
            .conn
            .wait_for_event()
            .context("Lost connection to the X server")?;
        Ok(self.translate(event))
    }

    fn translate(&mut self, event: Event) -> Option<WmEvent> {
        match event {
            Event::MapRequest(e) => match self.map_request_event(e.window) {
                Ok(event) => Some(event),
                Err(err) => {
                    log::debug!("MapRequest for 0x{:x} raced with destruction: {}", e.window, err);
                    None
                }
            },
            Event::ConfigureRequest(e) => Some(self.configure_request_event(e)),
            // Only root-delivered unmaps matter; reparenting noise does not.
            Event::UnmapNotify(e) => {
                (e.event == self.root).then_some(WmEvent::UnmapNotify { window: e.window })
            }
            Event::DestroyNotify(e) => Some(WmEvent::DestroyNotify { window: e.window }),
            Event::EnterNotify(e) => Some(WmEvent::EnterNotify { window: e.event }),
            Event::KeyPress(e) => {
                let state = u16::from(e.state);
                // Mask NumLock and CapsLock out of the comparison state.
                let clean = state & !(u16::from(ModMask::M2) | u16::from(ModMask::LOCK));
                Some(WmEvent::KeyPress {
                    modifiers: clean,
                    keysym: self.keymap.keysym(e.detail),
                })
            }
            Event::MappingNotify(_) => {
                match KeyboardMap::load(&self.conn) {
                    Ok(keymap) => self.keymap = keymap,
                    Err(e) => log::warn!("Failed to reload keyboard mapping: {}", e),
                }
                None
            }
            Event::Error(e) => {
                // Expected under races with destroyed windows.
                log::debug!("X11 error (likely a raced request): {:?}", e);
                None
            }
            _ => None,
        }
    }

    fn map_request_event(&self, window: Window) -> Result<WmEvent> {
        let geom = self.conn.get_geometry(window)?.reply()?;
        let geometry = Rect::new(
            geom.x as i32,
            geom.y as i32,
            geom.width as u32,
            geom.height as u32,
        );
        let hints = WindowHints {
            class: window_query::get_wm_class(&self.conn, window),
            dialog: window_query::is_dialog(&self.conn, &self.atoms, window),
        };

        // Watch for pointer crossings, for focus-follows-mouse.
        let _ = self.conn.change_window_attributes(
            window,
            &ChangeWindowAttributesAux::new().event_mask(EventMask::ENTER_WINDOW),
        );

        Ok(WmEvent::MapRequest { window, geometry, hints })
    }

    /// Resolve a partial configure request into an absolute rectangle; the
    /// engine decides whether to honor or re-assert it.
    fn configure_request_event(&self, e: ConfigureRequestEvent) -> WmEvent {
        let mut rect = self
            .conn
            .get_geometry(e.window)
            .ok()
            .and_then(|cookie| cookie.reply().ok())
            .map(|g| Rect::new(g.x as i32, g.y as i32, g.width as u32, g.height as u32))
            .unwrap_or_else(|| Rect::new(e.x as i32, e.y as i32, e.width as u32, e.height as u32));

        let mask = u16::from(e.value_mask);
        if mask & u16::from(ConfigWindow::X) != 0 {
            rect.x = e.x as i32;
        }
        if mask & u16::from(ConfigWindow::Y) != 0 {
            rect.y = e.y as i32;
        }
        if mask & u16::from(ConfigWindow::WIDTH) != 0 {
            rect.width = e.width as u32;
        }
        if mask & u16::from(ConfigWindow::HEIGHT) != 0 {
            rect.height = e.height as u32;
        }
        WmEvent::ConfigureRequest { window: e.window, geometry: rect }
    }

    /// Execute one protocol command. `Spawn`, `ReloadConfig` and `Quit` are
    /// the main loop's concern, not the connection's.
    pub fn execute(&self, command: &Command) -> Result<()> {
        match command {
            Command::Map(window) => {
                self.conn.map_window(*window)?;
            }
            Command::Unmap(window) => {
                self.conn.unmap_window(*window)?;
            }
            Command::Configure { window, geometry, border } => {
                let bw = if *border { self.border_width } else { 0 };
                self.conn.configure_window(
                    *window,
                    &ConfigureWindowAux::new()
                        .x(geometry.x)
                        .y(geometry.y)
                        .width(geometry.width.saturating_sub(bw * 2).max(1))
                        .height(geometry.height.saturating_sub(bw * 2).max(1))
                        .border_width(bw),
                )?;
            }
            Command::Raise(window) => {
                self.conn.configure_window(
                    *window,
                    &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE),
                )?;
            }
            Command::SetInputFocus(Some(window)) => {
                self.conn
                    .set_input_focus(InputFocus::POINTER_ROOT, *window, x11rb::CURRENT_TIME)?;
            }
            Command::SetInputFocus(None) => {
                self.conn.set_input_focus(
                    InputFocus::POINTER_ROOT,
                    u32::from(InputFocus::POINTER_ROOT),
                    x11rb::CURRENT_TIME,
                )?;
            }
            Command::SetBorder { window, focused } => {
                let pixel = if *focused { self.border_focused } else { self.border_unfocused };
                self.conn.change_window_attributes(
                    *window,
                    &ChangeWindowAttributesAux::new().border_pixel(pixel),
                )?;
            }
            Command::Close(window) => self.close_window(*window)?,
            Command::Spawn(_) | Command::ReloadConfig | Command::Quit => {}
        }
        Ok(())
    }

    /// Close a window gracefully when it supports WM_DELETE_WINDOW, else
    /// forcibly.
    fn close_window(&self, window: Window) -> Result<()> {
        if window_query::supports_delete_protocol(&self.conn, &self.atoms, window) {
            log::info!("Requesting close of window 0x{:x}", window);
            window_query::send_delete_window(&self.conn, &self.atoms, window)?;
        } else {
            log::info!("Killing window 0x{:x}", window);
            self.conn.kill_client(window)?;
        }
        Ok(())
    }

    /// Mirror the engine's state into the EWMH root properties. Cached, so
    /// calling it after every event batch is cheap.
    pub fn sync(&mut self, engine: &Engine) -> Result<()> {
        let clients = engine.client_ids();
        if clients != self.last_client_list {
            self.conn.change_property32(
                PropMode::REPLACE,
                self.root,
                self.atoms.net_client_list,
                AtomEnum::WINDOW,
                &clients,
            )?;
            self.last_client_list = clients;
        }

        let active = engine.focused();
        if active != self.last_active {
            self.conn.change_property32(
                PropMode::REPLACE,
                self.root,
                self.atoms.net_active_window,
                AtomEnum::WINDOW,
                &[active.unwrap_or(0)],
            )?;
            self.last_active = active;
        }

        let desktop = engine.active_workspace();
        if Some(desktop) != self.last_desktop {
            self.conn.change_property32(
                PropMode::REPLACE,
                self.root,
                self.atoms.net_current_desktop,
                AtomEnum::CARDINAL,
                &[desktop as u32],
            )?;
            self.last_desktop = Some(desktop);
        }

        self.conn.flush()?;
        Ok(())
    }

    /// Pick up reloaded border appearance.
    pub fn apply_appearance(&mut self, settings: &Settings) {
        self.border_width = settings.border_width;
        self.border_focused = settings.border_focused;
        self.border_unfocused = settings.border_unfocused;
    }

    pub fn flush(&self) -> Result<()> {
        self.conn.flush()?;
        Ok(())
    }

    /// Best-effort release of protocol resources on the way out.
    pub fn cleanup(&mut self) {
        let _ = self.ungrab_all();
        let _ = self.conn.destroy_window(self.check_window);
        let _ = self.conn.flush();
    }
}

/// Spawn a command, fire-and-forget. The child is detached into its own
/// session so it survives the manager, and is never waited on.
pub fn spawn_detached(command: &str) {
    let expanded = shellexpand::tilde(command);
    let parts: Vec<&str> = expanded.split_whitespace().collect();
    let Some((program, args)) = parts.split_first() else {
        log::warn!("Refusing to spawn empty command");
        return;
    };

    let mut cmd = ProcessCommand::new(program);
    cmd.args(args);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
    }

    match cmd.spawn() {
        Ok(child) => log::info!("Spawned '{}' (pid {})", command, child.id()),
        Err(e) => log::error!("Failed to spawn '{}': {}", command, e),
    }
}
