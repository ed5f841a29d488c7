//! Configuration file support.
//!
//! Loads settings from ~/.config/tatami/config.toml if it exists, otherwise
//! uses built-in defaults. Configuration problems are reported and degraded,
//! never fatal: a malformed file falls back to defaults, a malformed binding
//! or rule is skipped, and the manager always starts.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::keys::Chord;
use crate::layout::{LayoutMode, LayoutParams};
use crate::types::Insets;
use crate::workspaces::MAX_WORKSPACES;

// X11 modifier masks.
const SHIFT_MASK: u16 = 1 << 0;
const CONTROL_MASK: u16 = 1 << 2;
const MOD1_MASK: u16 = 1 << 3; // Alt
const MOD4_MASK: u16 = 1 << 6; // Super/Win

/// A window manager action, bound to a chord or executed directly.
///
/// Actions are plain data; the engine interprets them. This keeps the
/// bindable surface statically enumerable.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Spawn(String),
    SpawnTerminal,
    FocusNext,
    FocusPrev,
    SwitchWorkspace(usize),
    MoveToWorkspace(usize),
    NextWorkspace,
    PrevWorkspace,
    SetLayout(LayoutMode),
    NextLayout,
    GrowMaster,
    ShrinkMaster,
    ToggleFloating,
    ToggleFullscreen,
    ToggleSticky,
    CloseWindow,
    DumpState,
    ReloadConfig,
    Quit,
}

// =============================================================================
// File-based configuration (TOML parsing)
// =============================================================================

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub layout: LayoutConfig,
    pub appearance: AppearanceConfig,
    pub keybindings: KeybindingConfig,
    pub exec: ExecConfig,
    pub rules: Vec<RuleConfig>,
}

/// General settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Terminal emulator for the spawn-terminal action.
    pub terminal: String,
    /// Focus the window under the pointer on crossing events.
    pub focus_follows_mouse: bool,
    /// Give newly mapped windows focus immediately.
    pub focus_new_windows: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            terminal: "xterm".to_string(),
            focus_follows_mouse: true,
            focus_new_windows: true,
        }
    }
}

/// Layout settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Default layout mode for every workspace.
    pub mode: LayoutMode,
    /// Gap between adjacent tiles.
    pub gap: u32,
    /// Margin from the screen edge.
    pub outer_gap: u32,
    /// Share of the width given to the master window.
    pub master_ratio: f64,
    /// Number of workspaces for the session.
    pub workspaces: usize,
    /// Space reserved for an external panel, per screen edge.
    pub reserved: Insets,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            mode: LayoutMode::MasterStack,
            gap: 8,
            outer_gap: 8,
            master_ratio: 0.6,
            workspaces: 9,
            reserved: Insets::default(),
        }
    }
}

/// Appearance settings (borders only; tatami draws no other decorations).
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppearanceConfig {
    pub border_width: u32,
    pub border_focused: String,
    pub border_unfocused: String,
}

impl Default for AppearanceConfig {
    fn default() -> Self {
        Self {
            border_width: 2,
            border_focused: "#5294e2".to_string(),
            border_unfocused: "#3a3a3a".to_string(),
        }
    }
}

/// Named keybindings ("Mod4+j" style chord strings).
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct KeybindingConfig {
    pub spawn_terminal: Option<String>,
    pub focus_next: Option<String>,
    pub focus_prev: Option<String>,
    pub close_window: Option<String>,
    pub quit: Option<String>,
    pub next_layout: Option<String>,
    pub layout_master_stack: Option<String>,
    pub layout_grid: Option<String>,
    pub layout_monocle: Option<String>,
    pub grow_master: Option<String>,
    pub shrink_master: Option<String>,
    pub toggle_floating: Option<String>,
    pub toggle_fullscreen: Option<String>,
    pub toggle_sticky: Option<String>,
    pub workspace_next: Option<String>,
    pub workspace_prev: Option<String>,
    pub dump_state: Option<String>,
    pub reload_config: Option<String>,
}

impl Default for KeybindingConfig {
    fn default() -> Self {
        Self {
            spawn_terminal: Some("Mod4+Return".to_string()),
            focus_next: Some("Mod4+j".to_string()),
            focus_prev: Some("Mod4+k".to_string()),
            close_window: Some("Mod4+q".to_string()),
            quit: Some("Mod4+Shift+e".to_string()),
            next_layout: Some("Mod4+space".to_string()),
            layout_master_stack: Some("Mod4+t".to_string()),
            layout_grid: Some("Mod4+g".to_string()),
            layout_monocle: Some("Mod4+m".to_string()),
            grow_master: Some("Mod4+l".to_string()),
            shrink_master: Some("Mod4+h".to_string()),
            toggle_floating: Some("Mod4+f".to_string()),
            toggle_fullscreen: Some("Mod4+Shift+f".to_string()),
            toggle_sticky: Some("Mod4+s".to_string()),
            workspace_next: Some("Mod4+bracketright".to_string()),
            workspace_prev: Some("Mod4+bracketleft".to_string()),
            dump_state: Some("Mod4+Shift+d".to_string()),
            reload_config: Some("Mod4+Shift+r".to_string()),
        }
    }
}

/// Exec keybindings (chord -> command to run).
#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default)]
pub struct ExecConfig {
    #[serde(flatten)]
    pub bindings: HashMap<String, String>,
}

/// A window rule: match by class, override mode/workspace/stickiness.
#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default)]
pub struct RuleConfig {
    pub class: String,
    pub floating: Option<bool>,
    /// Target workspace, 1-based as in keybindings.
    pub workspace: Option<usize>,
    pub sticky: bool,
}

// =============================================================================
// Resolved runtime settings
// =============================================================================

/// A validated window rule (workspace index 0-based).
#[derive(Debug, Clone)]
pub struct Rule {
    pub class: String,
    pub floating: Option<bool>,
    pub workspace: Option<usize>,
    pub sticky: bool,
}

impl Rule {
    pub fn matches(&self, class: &str) -> bool {
        self.class.eq_ignore_ascii_case(class)
    }
}

/// Runtime settings with validated values, consumed by the engine.
#[derive(Debug, Clone)]
pub struct Settings {
    pub terminal: String,
    pub focus_follows_mouse: bool,
    pub focus_new_windows: bool,
    pub default_mode: LayoutMode,
    pub params: LayoutParams,
    pub outer_gap: u32,
    pub reserved: Insets,
    pub workspaces: usize,
    pub border_width: u32,
    pub border_focused: u32,
    pub border_unfocused: u32,
    pub rules: Vec<Rule>,
}

impl Default for Settings {
    fn default() -> Self {
        Config::default().settings()
    }
}

impl Settings {
    pub fn rule_for(&self, class: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.matches(class))
    }
}

impl Config {
    /// Load config from the default path (~/.config/tatami/config.toml).
    pub fn load() -> Self {
        Self::load_from_path(Self::default_path())
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tatami")
            .join("config.toml")
    }

    /// Load config from a specific path, falling back to defaults.
    pub fn load_from_path(path: PathBuf) -> Self {
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {:?}", path);
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse config: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("No config file found at {:?}, using defaults", path);
                Self::default()
            }
        }
    }

    /// Resolve the file-based config into validated runtime settings.
    pub fn settings(&self) -> Settings {
        let workspaces = if (1..=MAX_WORKSPACES).contains(&self.layout.workspaces) {
            self.layout.workspaces
        } else {
            let fallback = LayoutConfig::default().workspaces;
            log::warn!(
                "Workspace count {} out of range (1-{}), using {}",
                self.layout.workspaces,
                MAX_WORKSPACES,
                fallback
            );
            fallback
        };

        let master_ratio = self.layout.master_ratio.clamp(0.1, 0.9);
        if master_ratio != self.layout.master_ratio {
            log::warn!(
                "Master ratio {} out of range, clamped to {}",
                self.layout.master_ratio,
                master_ratio
            );
        }

        let rules = self
            .rules
            .iter()
            .filter_map(|r| {
                if r.class.is_empty() {
                    log::warn!("Ignoring window rule without a class");
                    return None;
                }
                let workspace = match r.workspace {
                    Some(n) if (1..=workspaces).contains(&n) => Some(n - 1),
                    Some(n) => {
                        log::warn!(
                            "Rule for '{}' targets workspace {} (have {}), ignoring target",
                            r.class,
                            n,
                            workspaces
                        );
                        None
                    }
                    None => None,
                };
                Some(Rule {
                    class: r.class.clone(),
                    floating: r.floating,
                    workspace,
                    sticky: r.sticky,
                })
            })
            .collect();

        Settings {
            terminal: self.general.terminal.clone(),
            focus_follows_mouse: self.general.focus_follows_mouse,
            focus_new_windows: self.general.focus_new_windows,
            default_mode: self.layout.mode,
            params: LayoutParams { gap: self.layout.gap, master_ratio },
            outer_gap: self.layout.outer_gap,
            reserved: self.layout.reserved,
            workspaces,
            border_width: self.appearance.border_width,
            border_focused: parse_color(&self.appearance.border_focused).unwrap_or(0x5294e2),
            border_unfocused: parse_color(&self.appearance.border_unfocused).unwrap_or(0x3a3a3a),
            rules,
        }
    }

    /// Parse all keybindings into a chord -> action map.
    ///
    /// Unparsable chord strings are reported and skipped; the remaining
    /// bindings (and the built-in workspace chords) still apply.
    pub fn parse_keybindings(&self) -> HashMap<Chord, Action> {
        let mut bindings = HashMap::new();

        let mut insert = |chord_str: &Option<String>, action: Action| {
            let Some(s) = chord_str else { return };
            match parse_chord(s) {
                Some(chord) => {
                    if bindings.insert(chord, action).is_some() {
                        log::warn!("Chord '{}' is bound more than once, keeping the last", s);
                    }
                }
                None => log::warn!("Failed to parse keybinding: {}", s),
            }
        };

        let kb = &self.keybindings;
        insert(&kb.spawn_terminal, Action::SpawnTerminal);
        insert(&kb.focus_next, Action::FocusNext);
        insert(&kb.focus_prev, Action::FocusPrev);
        insert(&kb.close_window, Action::CloseWindow);
        insert(&kb.quit, Action::Quit);
        insert(&kb.next_layout, Action::NextLayout);
        insert(&kb.layout_master_stack, Action::SetLayout(LayoutMode::MasterStack));
        insert(&kb.layout_grid, Action::SetLayout(LayoutMode::Grid));
        insert(&kb.layout_monocle, Action::SetLayout(LayoutMode::Monocle));
        insert(&kb.grow_master, Action::GrowMaster);
        insert(&kb.shrink_master, Action::ShrinkMaster);
        insert(&kb.toggle_floating, Action::ToggleFloating);
        insert(&kb.toggle_fullscreen, Action::ToggleFullscreen);
        insert(&kb.toggle_sticky, Action::ToggleSticky);
        insert(&kb.workspace_next, Action::NextWorkspace);
        insert(&kb.workspace_prev, Action::PrevWorkspace);
        insert(&kb.dump_state, Action::DumpState);
        insert(&kb.reload_config, Action::ReloadConfig);

        // Mod4+N switches, Mod4+Shift+N moves, for workspaces 1-9.
        let workspaces = if (1..=MAX_WORKSPACES).contains(&self.layout.workspaces) {
            self.layout.workspaces
        } else {
            LayoutConfig::default().workspaces
        };
        for n in 1..=9usize.min(workspaces) {
            insert(
                &Some(format!("Mod4+{}", n)),
                Action::SwitchWorkspace(n - 1),
            );
            insert(
                &Some(format!("Mod4+Shift+{}", n)),
                Action::MoveToWorkspace(n - 1),
            );
        }

        // Exec bindings (chord -> command).
        for (chord_str, command) in &self.exec.bindings {
            insert(&Some(chord_str.clone()), Action::Spawn(command.clone()));
        }

        bindings
    }
}

/// Parse a chord string like "Mod4+Shift+h" into modifiers and keysym.
pub fn parse_chord(s: &str) -> Option<Chord> {
    let parts: Vec<&str> = s.split('+').collect();
    let (key_part, mod_parts) = parts.split_last()?;

    let mut modifiers: u16 = 0;
    for part in mod_parts {
        match part.to_ascii_lowercase().as_str() {
            "mod4" | "super" | "win" => modifiers |= MOD4_MASK,
            "mod1" | "alt" => modifiers |= MOD1_MASK,
            "control" | "ctrl" => modifiers |= CONTROL_MASK,
            "shift" => modifiers |= SHIFT_MASK,
            other => {
                log::warn!("Unknown modifier: {}", other);
                return None;
            }
        }
    }

    let keysym = key_to_keysym(key_part)?;
    Some(Chord { modifiers, keysym })
}

/// Convert a key name to an X11 keysym.
///
/// Printable latin-1 characters are their own keysyms; everything else
/// goes through the named table.
fn key_to_keysym(key: &str) -> Option<u32> {
    let k = key.to_ascii_lowercase();

    if k.len() == 1 {
        let c = k.chars().next()?;
        if c.is_ascii_graphic() {
            return Some(c as u32);
        }
    }

    // F1-F12
    if let Some(n) = k.strip_prefix('f').and_then(|n| n.parse::<u32>().ok()) {
        if (1..=12).contains(&n) {
            return Some(0xffbd + n);
        }
    }

    match k.as_str() {
        "return" | "enter" => Some(0xff0d),
        "tab" => Some(0xff09),
        "escape" | "esc" => Some(0xff1b),
        "space" => Some(0x20),
        "backspace" => Some(0xff08),
        "delete" => Some(0xffff),
        "left" => Some(0xff51),
        "up" => Some(0xff52),
        "right" => Some(0xff53),
        "down" => Some(0xff54),
        "home" => Some(0xff50),
        "end" => Some(0xff57),
        "page_up" | "prior" => Some(0xff55),
        "page_down" | "next" => Some(0xff56),
        "bracketleft" => Some(0x5b),
        "bracketright" => Some(0x5d),
        "slash" => Some(0x2f),
        "comma" => Some(0x2c),
        "period" => Some(0x2e),
        _ => {
            log::warn!("Unknown key: {}", key);
            None
        }
    }
}

/// Parse a hex color string (e.g. "#5294e2" or "5294e2") to a pixel value.
pub fn parse_color(s: &str) -> Option<u32> {
    u32::from_str_radix(s.trim_start_matches('#'), 16).ok()
}
