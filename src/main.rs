//! inkterm: a VT100/ANSI terminal emulator for an embedded e-ink device
//! with a physical keyboard and five-way controller.
//!
//! Usage: `inkterm [--cfg <path>] [-v|--verbose]...`

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use inkterm::config::{RawConfig, Settings};
use inkterm::keymap::KeyMap;
use inkterm::launchpad::Launchpad;
use inkterm::lifecycle;
use inkterm::pty::PortablePty;

/// Presence of these device nodes distinguishes the two hardware
/// revisions the reference firmware targets; see
/// [`inkterm::config::probe_platform_section`].
const K3_PROBE_PATH: &str = "/dev/input/by-path/platform-k3-kpd";
const DX_PROBE_PATH: &str = "/dev/input/by-path/platform-dx-kpd";

struct Cli {
    cfg_path: Option<PathBuf>,
    shell: Option<String>,
    verbosity: u8,
    help: bool,
}

const USAGE: &str = "\
inkterm [--cfg <path>] [--shell <path>] [-v|--verbose]...

  --cfg <path>     Load configuration from <path> instead of the default
  --shell <path>   Spawn <path> instead of $SHELL (falls back to /bin/sh)
  -v, --verbose    Increase log verbosity (repeatable)
  -h, --help       Print this message and exit";

fn parse_args(args: impl Iterator<Item = String>) -> Result<Cli> {
    let mut cfg_path = None;
    let mut shell = None;
    let mut verbosity = 0u8;
    let mut help = false;
    let mut args = args.skip(1).peekable();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--cfg" => {
                let path = args.next().context("--cfg requires a path argument")?;
                cfg_path = Some(PathBuf::from(path));
            }
            "--shell" => {
                shell = Some(args.next().context("--shell requires a path argument")?);
            }
            "-v" | "--verbose" => verbosity = verbosity.saturating_add(1),
            "-h" | "--help" => help = true,
            other => anyhow::bail!("unrecognized argument: {other}"),
        }
    }

    Ok(Cli {
        cfg_path,
        shell,
        verbosity,
        help,
    })
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .try_init();
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("inkterm").join("inkterm.ini"))
        .unwrap_or_else(|| PathBuf::from("/etc/inkterm.ini"))
}

fn load_config(path: &std::path::Path) -> Result<(RawConfig, Settings, KeyMap)> {
    let raw = RawConfig::parse_file(path).with_context(|| format!("loading config from {}", path.display()))?;
    let settings = Settings::from_raw(&raw);
    let section = inkterm::config::probe_platform_section(
        std::path::Path::new(K3_PROBE_PATH),
        std::path::Path::new(DX_PROBE_PATH),
    );
    let mut lines = raw.section_lines("inkeys");
    lines.extend(raw.section_lines(section));
    let keymap = KeyMap::from_lines(lines.iter().map(String::as_str));
    Ok((raw, settings, keymap))
}

/// Guarantees [`Launchpad::shutdown`] runs on every exit path, including a
/// panic unwinding out of `run`, so a crash never leaves a physical keypad
/// grabbed.
struct ShutdownGuard<'a>(&'a mut Launchpad);

impl Drop for ShutdownGuard<'_> {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}

fn main() -> Result<()> {
    let cli = parse_args(std::env::args())?;
    if cli.help {
        println!("{USAGE}");
        return Ok(());
    }
    init_tracing(cli.verbosity);

    let cfg_path = cli.cfg_path.unwrap_or_else(default_config_path);
    let (_raw, settings, keymap) = load_config(&cfg_path)?;

    lifecycle::install_handlers();

    let mut launchpad = Launchpad::new(settings, keymap, Box::new(PortablePty));
    launchpad.set_shell_override(cli.shell);
    launchpad.enter_terminal_mode();
    if let Err(e) = launchpad.capture_inputs() {
        error!(error = %e, "failed to capture input devices");
        return Err(e.into());
    }
    launchpad.open_special_device();
    launchpad
        .create_session("main")
        .context("spawning the initial shell session")?;

    info!("inkterm running");
    {
        let guard = ShutdownGuard(&mut launchpad);
        run(guard.0, &cfg_path);
    }
    info!("inkterm exiting");
    Ok(())
}

fn run(launchpad: &mut Launchpad, cfg_path: &std::path::Path) {
    loop {
        if lifecycle::shutdown_requested() {
            break;
        }
        if lifecycle::take_reload_requested() {
            match load_config(cfg_path) {
                Ok((raw, _settings, keymap)) => launchpad.reload_config(&raw, keymap),
                Err(e) => error!(error = %e, "config reload failed, keeping previous configuration"),
            }
        }

        while let Ok(event) = launchpad.key_rx.try_recv() {
            let outcome = launchpad.handle_key(event);
            if outcome.end_terminal {
                return;
            }
            if outcome.refresh_requested {
                launchpad.render_current();
            }
        }

        while let Ok(packet) = launchpad.special_rx.try_recv() {
            match launchpad.select_or_create_by_name(&packet) {
                Ok(true) => launchpad.render_current(),
                Ok(false) => {}
                Err(e) => error!(error = %e, "failed to select/create session from special packet"),
            }
        }

        let ready = launchpad.tick();
        if !ready.is_empty() {
            launchpad.render_current();
        }

        if launchpad.current_session().is_none() {
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_args_reads_cfg_path_and_counts_verbosity() {
        let cli = parse_args(
            ["inkterm", "--cfg", "/tmp/x.ini", "-v", "--verbose"]
                .into_iter()
                .map(String::from),
        )
        .unwrap();
        assert_eq!(cli.cfg_path, Some(PathBuf::from("/tmp/x.ini")));
        assert_eq!(cli.verbosity, 2);
    }

    #[test]
    fn parse_args_rejects_unknown_flags() {
        let err = parse_args(["inkterm", "--bogus"].into_iter().map(String::from));
        assert!(err.is_err());
    }

    #[test]
    fn parse_args_reads_shell_override_and_help_flag() {
        let cli = parse_args(["inkterm", "--shell", "/bin/zsh", "-h"].into_iter().map(String::from)).unwrap();
        assert_eq!(cli.shell, Some("/bin/zsh".to_string()));
        assert!(cli.help);
    }
}
