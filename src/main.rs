//! tatami - a tiling window manager for X11.
//!
//! Startup sequence: load config, connect, become the window manager, set
//! up EWMH, grab keys, adopt existing windows, then run the blocking event
//! loop. Per-event errors are contained; only the loss of the server
//! connection terminates the process (after releasing grabs), with a
//! non-zero exit status.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;

use tatami::config::Config;
use tatami::engine::{Command, Engine};
use tatami::keys::KeyBindings;
use tatami::x11::{self, X11Adapter};

#[derive(Parser)]
#[command(name = "tatami", version, about = "A tiling window manager for X11")]
struct Args {
    /// Path to the configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    log::info!("Starting tatami");

    let config_path = args.config.unwrap_or_else(Config::default_path);
    let config = Config::load_from_path(config_path.clone());
    let settings = config.settings();
    let bindings = KeyBindings::new(config.parse_keybindings());

    let mut adapter = X11Adapter::connect(&settings)?;
    adapter.become_wm()?;
    adapter.setup_ewmh(settings.workspaces)?;

    let mut engine = Engine::new(adapter.screen_rect(), settings, bindings);
    adapter.grab_keys(engine.bindings().chords())?;

    // Adopt windows that existed before we started.
    for event in adapter.adopt_existing()? {
        let cmds = engine.handle(event);
        run_commands(&mut adapter, &mut engine, &config_path, &cmds)?;
    }
    adapter.sync(&engine)?;

    let result = run(&mut adapter, &mut engine, &config_path);
    adapter.cleanup();
    if let Err(e) = &result {
        log::error!("Fatal: {:#}", e);
    } else {
        log::info!("Exiting tatami");
    }
    result
}

/// The event loop: block for the next notification, let the engine process
/// it to completion, execute the resulting commands.
fn run(adapter: &mut X11Adapter, engine: &mut Engine, config_path: &Path) -> Result<()> {
    loop {
        let Some(event) = adapter.next_event()? else { continue };
        let cmds = engine.handle(event);
        if run_commands(adapter, engine, config_path, &cmds)? {
            return Ok(());
        }
        adapter.sync(engine)?;
    }
}

/// Execute a command batch. Returns true when a quit was requested.
fn run_commands(
    adapter: &mut X11Adapter,
    engine: &mut Engine,
    config_path: &Path,
    cmds: &[Command],
) -> Result<bool> {
    for cmd in cmds {
        match cmd {
            Command::Quit => {
                log::info!("Quit requested");
                return Ok(true);
            }
            Command::ReloadConfig => {
                log::info!("Reloading configuration from {:?}", config_path);
                let config = Config::load_from_path(config_path.to_path_buf());
                let settings = config.settings();
                let bindings = KeyBindings::new(config.parse_keybindings());
                adapter.apply_appearance(&settings);
                let reflow = engine.apply_settings(settings, bindings);
                adapter.grab_keys(engine.bindings().chords())?;
                for cmd in &reflow {
                    adapter.execute(cmd)?;
                }
            }
            Command::Spawn(command) => x11::spawn_detached(command),
            other => adapter.execute(other)?,
        }
    }
    adapter.flush()?;
    Ok(false)
}
