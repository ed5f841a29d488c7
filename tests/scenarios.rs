//! End-to-end engine scenarios.
//!
//! These tests drive the window-management engine with synthetic event
//! streams, the same discriminated stream the X11 adapter produces at
//! runtime, and assert the manager's observable guarantees: focus
//! consistency, workspace round-trips, tiling discipline, and command-free
//! redundant reflows. Every scenario finishes with an invariant check.

use tatami::config::{parse_chord, Config};
use tatami::engine::{Command, Engine, WindowHints, WmEvent};
use tatami::keys::KeyBindings;
use tatami::registry::Mode;
use tatami::types::Rect;

const SCREEN: Rect = Rect { x: 0, y: 0, width: 1000, height: 800 };

/// Engine over a 1000x800 screen with no gaps, 60% master, 4 workspaces.
fn engine() -> Engine {
    engine_from(
        r#"
[layout]
gap = 0
outer_gap = 0
master_ratio = 0.6
workspaces = 4
"#,
    )
}

fn engine_from(toml: &str) -> Engine {
    let config: Config = toml::from_str(toml).unwrap();
    let settings = config.settings();
    let bindings = KeyBindings::new(config.parse_keybindings());
    Engine::new(SCREEN, settings, bindings)
}

fn map(engine: &mut Engine, window: u32) -> Vec<Command> {
    map_class(engine, window, "xterm", false)
}

fn map_class(engine: &mut Engine, window: u32, class: &str, dialog: bool) -> Vec<Command> {
    engine.handle(WmEvent::MapRequest {
        window,
        geometry: Rect::new(0, 0, 640, 480),
        hints: WindowHints { class: class.to_string(), dialog },
    })
}

fn destroy(engine: &mut Engine, window: u32) -> Vec<Command> {
    engine.handle(WmEvent::DestroyNotify { window })
}

fn press(engine: &mut Engine, chord: &str) -> Vec<Command> {
    let chord = parse_chord(chord).unwrap();
    engine.handle(WmEvent::KeyPress { modifiers: chord.modifiers, keysym: chord.keysym })
}

fn assert_valid(engine: &Engine) {
    let violations = engine.validate();
    assert!(violations.is_empty(), "invariant violations: {:?}", violations);
}

#[test]
fn master_stack_reference_scenario() {
    // Single workspace, master-stack, gap 0, three windows mapped in order
    // on a 1000x800 area with a 60% master ratio.
    let mut engine = engine();
    map(&mut engine, 1);
    map(&mut engine, 2);
    map(&mut engine, 3);

    assert_eq!(engine.geometry_of(1), Some(Rect::new(0, 0, 600, 800)));
    assert_eq!(engine.geometry_of(2), Some(Rect::new(600, 0, 400, 400)));
    assert_eq!(engine.geometry_of(3), Some(Rect::new(600, 400, 400, 400)));
    assert_valid(&engine);
}

#[test]
fn focus_invariant_through_map_unmap_storm() {
    let mut engine = engine();

    for w in 1..=5 {
        map(&mut engine, w);
        assert_eq!(engine.focused(), Some(w));
        assert_valid(&engine);
    }
    for w in [3, 1, 5] {
        engine.handle(WmEvent::UnmapNotify { window: w });
        // Something mapped remains, so something must hold focus.
        assert!(engine.focused().is_some());
        assert_valid(&engine);
    }
    destroy(&mut engine, 2);
    destroy(&mut engine, 4);

    assert_eq!(engine.focused(), None);
    assert!(engine.client_ids().is_empty());
    assert_valid(&engine);
}

#[test]
fn destroying_focused_window_promotes_previous_focus() {
    let mut engine = engine();
    map(&mut engine, 1);
    map(&mut engine, 2);
    map(&mut engine, 3);
    assert_eq!(engine.focused(), Some(3));

    let cmds = destroy(&mut engine, 3);
    assert_eq!(engine.focused(), Some(2));
    assert!(cmds.contains(&Command::SetInputFocus(Some(2))));

    destroy(&mut engine, 2);
    assert_eq!(engine.focused(), Some(1));

    let cmds = destroy(&mut engine, 1);
    assert_eq!(engine.focused(), None);
    assert!(cmds.contains(&Command::SetInputFocus(None)));
    assert_valid(&engine);
}

#[test]
fn workspace_round_trip_restores_geometry_and_focus() {
    let mut engine = engine();
    map(&mut engine, 1);
    map(&mut engine, 2);
    map(&mut engine, 3);
    press(&mut engine, "Mod4+j"); // cycle focus 3 -> 1
    let focused_before = engine.focused();
    let geoms_before: Vec<_> = [1, 2, 3].iter().map(|&w| engine.geometry_of(w)).collect();

    // A -> B: everything on A hides.
    let cmds = press(&mut engine, "Mod4+2");
    for w in [1, 2, 3] {
        assert!(cmds.contains(&Command::Unmap(w)));
    }
    assert_eq!(engine.focused(), None);
    assert_eq!(engine.active_workspace(), 1);
    assert_valid(&engine);

    // The manager's own unmaps must not unmanage the windows.
    for w in [1, 2, 3] {
        engine.handle(WmEvent::UnmapNotify { window: w });
    }
    assert_eq!(engine.client_ids(), vec![1, 2, 3]);

    // B -> A: same geometry, same focus.
    let cmds = press(&mut engine, "Mod4+1");
    for w in [1, 2, 3] {
        assert!(cmds.contains(&Command::Map(w)));
    }
    let geoms_after: Vec<_> = [1, 2, 3].iter().map(|&w| engine.geometry_of(w)).collect();
    assert_eq!(geoms_before, geoms_after);
    assert_eq!(engine.focused(), focused_before);
    assert_valid(&engine);
}

#[test]
fn switching_to_current_workspace_is_free() {
    let mut engine = engine();
    map(&mut engine, 1);
    let cmds = press(&mut engine, "Mod4+1");
    assert!(cmds.is_empty());
}

#[test]
fn moving_a_window_between_workspaces() {
    let mut engine = engine();
    map(&mut engine, 1);
    map(&mut engine, 2);

    // Send the focused window (2) to workspace 3.
    let cmds = press(&mut engine, "Mod4+Shift+3");
    assert!(cmds.contains(&Command::Unmap(2)));
    assert_eq!(engine.focused(), Some(1));
    // The survivor owns the whole usable area again.
    assert_eq!(engine.geometry_of(1), Some(SCREEN));
    assert_valid(&engine);

    // Following it restores both visibility and focus.
    let cmds = press(&mut engine, "Mod4+3");
    assert!(cmds.contains(&Command::Map(2)));
    assert_eq!(engine.focused(), Some(2));
    assert_eq!(engine.geometry_of(2), Some(SCREEN));
    assert_valid(&engine);
}

#[test]
fn dialogs_float_and_are_excluded_from_tiling() {
    let mut engine = engine();
    map(&mut engine, 1);
    map(&mut engine, 2);

    let tiled_before = (engine.geometry_of(1), engine.geometry_of(2));
    map_class(&mut engine, 3, "popup", true);

    assert_eq!(engine.registry().get(3).unwrap().mode, Mode::Floating);
    // The tiles did not move for the dialog.
    assert_eq!((engine.geometry_of(1), engine.geometry_of(2)), tiled_before);
    assert_valid(&engine);
}

#[test]
fn rules_assign_mode_workspace_and_stickiness() {
    let mut engine = engine_from(
        r#"
[layout]
gap = 0
outer_gap = 0
workspaces = 4

[[rules]]
class = "Gimp"
floating = true

[[rules]]
class = "Firefox"
workspace = 2

[[rules]]
class = "Keepassxc"
sticky = true
"#,
    );

    map_class(&mut engine, 1, "Gimp", false);
    assert_eq!(engine.registry().get(1).unwrap().mode, Mode::Floating);

    // Rule-targeted windows land on their workspace unmapped and unfocused.
    let cmds = map_class(&mut engine, 2, "Firefox", false);
    assert!(!cmds.contains(&Command::Map(2)));
    assert_eq!(engine.registry().get(2).unwrap().workspace, 1);
    assert_ne!(engine.focused(), Some(2));

    map_class(&mut engine, 3, "Keepassxc", false);
    assert!(engine.registry().get(3).unwrap().sticky);

    // Sticky windows stay visible across switches.
    let cmds = press(&mut engine, "Mod4+2");
    assert!(!cmds.contains(&Command::Unmap(3)));
    assert!(engine.registry().get(3).unwrap().mapped);
    // And the rule-placed window shows up on its workspace.
    assert!(cmds.contains(&Command::Map(2)));
    assert_valid(&engine);
}

#[test]
fn redundant_reflow_emits_no_commands() {
    let mut engine = engine();
    map(&mut engine, 1);
    map(&mut engine, 2);
    map(&mut engine, 3);
    let before: Vec<_> = [1, 2, 3].iter().map(|&w| engine.geometry_of(w)).collect();

    // Grow then shrink: the second reflow must land on bit-identical
    // geometry, and a switch-and-return must emit no configures at all.
    press(&mut engine, "Mod4+l");
    press(&mut engine, "Mod4+h");
    let after: Vec<_> = [1, 2, 3].iter().map(|&w| engine.geometry_of(w)).collect();
    assert_eq!(before, after);

    let cmds = press(&mut engine, "Mod4+2");
    assert!(!cmds.iter().any(|c| matches!(c, Command::Configure { .. })));
    let cmds = press(&mut engine, "Mod4+1");
    assert!(!cmds.iter().any(|c| matches!(c, Command::Configure { .. })));
    assert_valid(&engine);
}

#[test]
fn unbound_chord_changes_nothing() {
    let mut engine = engine();
    map(&mut engine, 1);
    let snapshot_before = serde_json::to_value(engine.snapshot()).unwrap();

    // Ctrl+Alt+F13: no configured action.
    let cmds = engine.handle(WmEvent::KeyPress { modifiers: 4 | 8, keysym: 0xffca });
    assert!(cmds.is_empty());

    let mut snapshot_after = serde_json::to_value(engine.snapshot()).unwrap();
    // The trace records the keypress itself; everything else is identical.
    snapshot_after["recent_events"] = snapshot_before["recent_events"].clone();
    assert_eq!(snapshot_before, snapshot_after);
    assert_valid(&engine);
}

#[test]
fn layout_switching_retiles_the_workspace() {
    let mut engine = engine();
    for w in 1..=4 {
        map(&mut engine, w);
    }

    press(&mut engine, "Mod4+g");
    assert_eq!(engine.geometry_of(1), Some(Rect::new(0, 0, 500, 400)));
    assert_eq!(engine.geometry_of(4), Some(Rect::new(500, 400, 500, 400)));

    press(&mut engine, "Mod4+m");
    for w in 1..=4 {
        assert_eq!(engine.geometry_of(w), Some(SCREEN));
    }
    assert_valid(&engine);
}

#[test]
fn focus_cycling_wraps_in_workspace_order() {
    let mut engine = engine();
    map(&mut engine, 1);
    map(&mut engine, 2);
    map(&mut engine, 3);
    assert_eq!(engine.focused(), Some(3));

    press(&mut engine, "Mod4+j");
    assert_eq!(engine.focused(), Some(1));
    press(&mut engine, "Mod4+j");
    assert_eq!(engine.focused(), Some(2));
    press(&mut engine, "Mod4+k");
    assert_eq!(engine.focused(), Some(1));
    press(&mut engine, "Mod4+k");
    assert_eq!(engine.focused(), Some(3));
    assert_valid(&engine);
}

#[test]
fn close_quits_and_reloads_surface_as_commands() {
    let mut engine = engine();
    map(&mut engine, 1);

    assert_eq!(press(&mut engine, "Mod4+q"), vec![Command::Close(1)]);
    assert_eq!(press(&mut engine, "Mod4+Shift+r"), vec![Command::ReloadConfig]);
    assert_eq!(press(&mut engine, "Mod4+Shift+e"), vec![Command::Quit]);
}

#[test]
fn reload_keeps_session_workspace_count_and_retiles() {
    let mut engine = engine();
    map(&mut engine, 1);
    map(&mut engine, 2);

    let config: Config = toml::from_str(
        r#"
[layout]
gap = 0
outer_gap = 0
master_ratio = 0.5
workspaces = 9
"#,
    )
    .unwrap();
    let cmds = engine.apply_settings(
        config.settings(),
        KeyBindings::new(config.parse_keybindings()),
    );

    // The count stays at 4 for the session; the new ratio applies at once.
    assert_eq!(engine.workspace_count(), 4);
    assert!(!cmds.is_empty());
    assert_eq!(engine.geometry_of(1), Some(Rect::new(0, 0, 500, 800)));
    assert_valid(&engine);
}

#[test]
fn reserved_panel_space_is_left_uncovered() {
    let mut engine = engine_from(
        r#"
[layout]
gap = 0
outer_gap = 0
workspaces = 2

[layout.reserved]
top = 40
"#,
    );
    map(&mut engine, 1);
    assert_eq!(engine.geometry_of(1), Some(Rect::new(0, 40, 1000, 760)));
    assert_valid(&engine);
}

#[test]
fn fullscreen_ignores_reserved_space_and_restores() {
    let mut engine = engine_from(
        r#"
[layout]
gap = 0
outer_gap = 0
master_ratio = 0.6
workspaces = 2

[layout.reserved]
top = 40
"#,
    );
    map(&mut engine, 1);
    map(&mut engine, 2);
    assert_eq!(engine.geometry_of(2), Some(Rect::new(600, 40, 400, 760)));

    // Fullscreen covers the whole screen, reserved panel space included.
    press(&mut engine, "Mod4+Shift+f");
    assert_eq!(engine.geometry_of(2), Some(SCREEN));
    assert_eq!(engine.registry().get(2).unwrap().mode, Mode::Fullscreen);

    press(&mut engine, "Mod4+Shift+f");
    assert_eq!(engine.registry().get(2).unwrap().mode, Mode::Tiled);
    assert_eq!(engine.geometry_of(2), Some(Rect::new(600, 40, 400, 760)));
    assert_valid(&engine);
}

#[test]
fn toggle_floating_round_trip_rejoins_tiling() {
    let mut engine = engine();
    map(&mut engine, 1);
    map(&mut engine, 2);

    press(&mut engine, "Mod4+f");
    assert_eq!(engine.registry().get(2).unwrap().mode, Mode::Floating);
    // The remaining tile expands.
    assert_eq!(engine.geometry_of(1), Some(SCREEN));

    press(&mut engine, "Mod4+f");
    assert_eq!(engine.registry().get(2).unwrap().mode, Mode::Tiled);
    assert_eq!(engine.geometry_of(1), Some(Rect::new(0, 0, 600, 800)));
    assert_eq!(engine.geometry_of(2), Some(Rect::new(600, 0, 400, 800)));
    assert_valid(&engine);
}
