//! The process-wide context: sessions, the current-session pointer, the
//! framebuffer, and configuration, passed explicitly rather than reached
//! for as global state (the only true global state is the signal flags in
//! [`crate::lifecycle`]).

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};

use tracing::{info, warn};

use crate::config::{RawConfig, Settings};
use crate::device::{parse_special_packet, GrabHandle, InputDevice};
use crate::error::{EmuError, Result};
use crate::event_loop::EventLoop;
use crate::font::{BlankFont, FontSystem};
use crate::framebuffer::{Framebuffer, NullFramebuffer};
use crate::input::{DispatchConfig, InputDispatch, KeyEvent};
use crate::keymap::KeyMap;
use crate::pty::PtySpawn;
use crate::renderer::Renderer;
use crate::session::{Session, SessionId, StateOptions};

const DEFAULT_ROWS: u16 = 25;
const DEFAULT_COLS: u16 = 80;

/// Resolve a configured key name (e.g. `TermShift = Shift`) to the physical
/// code the keymap assigns it. Unconfigured or unknown names leave the
/// dispatch slot disabled rather than failing startup.
fn resolve_code(keymap: &KeyMap, name: &Option<String>) -> Option<u16> {
    keymap.lookup_by_name(name.as_deref()?).map(|e| e.code)
}

fn build_dispatch_config(settings: &Settings, keymap: &KeyMap) -> DispatchConfig {
    DispatchConfig {
        term_shift: resolve_code(keymap, &settings.term_shift),
        term_ctrl: resolve_code(keymap, &settings.term_ctrl),
        term_sym: resolve_code(keymap, &settings.term_sym),
        term_fn: resolve_code(keymap, &settings.term_fn),
        term_lang: resolve_code(keymap, &settings.term_lang),
        term_home: resolve_code(keymap, &settings.term_home),
        term_end: resolve_code(keymap, &settings.term_end),
        term_scrollup: resolve_code(keymap, &settings.term_scroll_up),
        term_scrolldown: resolve_code(keymap, &settings.term_scroll_down),
        scrollback_step: 1,
        symbols: settings.symbols.clone(),
        lang_symbols: settings.lang_symbols.clone(),
        shift_lang_symbols: settings.shift_lang_symbols.clone(),
    }
}

/// Outcome of feeding one physical key event through the launchpad.
#[derive(Debug, Default)]
pub struct KeyOutcome {
    pub refresh_requested: bool,
    pub end_terminal: bool,
}

pub struct Launchpad {
    event_loop: EventLoop,
    names: HashMap<SessionId, String>,
    current: Option<SessionId>,
    next_id: SessionId,
    framebuffer: Box<dyn Framebuffer>,
    font: Box<dyn FontSystem>,
    renderer: Renderer,
    settings: Settings,
    keymap: KeyMap,
    dispatch: InputDispatch,
    dispatch_cfg: DispatchConfig,
    spawner: Box<dyn PtySpawn>,
    capture: Vec<GrabHandle>,
    key_tx: Sender<KeyEvent>,
    pub key_rx: Receiver<KeyEvent>,
    special_tx: Sender<Vec<u8>>,
    pub special_rx: Receiver<Vec<u8>>,
    shell_override: Option<String>,
    saved_image: Option<Vec<u8>>,
}

impl Launchpad {
    pub fn new(settings: Settings, keymap: KeyMap, spawner: Box<dyn PtySpawn>) -> Self {
        let dispatch_cfg = build_dispatch_config(&settings, &keymap);
        let font: Box<dyn FontSystem> = Box::new(BlankFont::new(settings.font_width, settings.font_height));
        let renderer = Renderer::new(settings.y_offset);
        let (key_tx, key_rx) = mpsc::channel();
        let (special_tx, special_rx) = mpsc::channel();
        Self {
            event_loop: EventLoop::new(settings.refresh_delay),
            names: HashMap::new(),
            current: None,
            next_id: 0,
            framebuffer: Box::new(NullFramebuffer::new(
                settings.font_width * 160,
                settings.y_offset + settings.font_height * 80,
            )),
            font,
            renderer,
            settings,
            keymap,
            dispatch: InputDispatch::new(),
            dispatch_cfg,
            spawner,
            capture: Vec::new(),
            key_tx,
            key_rx,
            special_tx,
            special_rx,
            shell_override: None,
            saved_image: None,
        }
    }

    pub fn set_shell_override(&mut self, shell: Option<String>) {
        self.shell_override = shell;
    }

    /// Opens the framebuffer and snapshots its current contents, so
    /// [`Self::shutdown`] can restore the screen to how it looked before
    /// the terminal took it over. A framebuffer that fails to open makes
    /// entering terminal mode a no-op: input still dispatches, nothing
    /// draws.
    pub fn enter_terminal_mode(&mut self) {
        if self.framebuffer.open() {
            self.saved_image = Some(self.framebuffer.save_image());
        }
    }

    /// Creates a new session running the default shell and stages it into
    /// the event loop; the first session created also becomes current.
    pub fn create_session(&mut self, name: impl Into<String>) -> Result<SessionId> {
        let name = name.into();
        let id = self.next_id;
        self.next_id += 1;

        let command = self.shell_override.clone().unwrap_or_else(crate::pty::default_shell);
        let sb_lines = self.settings.scrollback_lines;
        let session = Session::create(
            id,
            &command,
            name.clone(),
            DEFAULT_ROWS,
            DEFAULT_COLS,
            sb_lines,
            self.settings.is_wide(),
            self.spawner.as_ref(),
            None,
        )?;

        self.names.insert(id, name);
        self.event_loop.stage(session);
        if self.current.is_none() {
            self.current = Some(id);
        }
        Ok(id)
    }

    pub fn current_session(&self) -> Option<SessionId> {
        self.current
    }

    pub fn switch_current(&mut self, id: SessionId) {
        if self.names.contains_key(&id) {
            self.current = Some(id);
        }
    }

    /// Resolves a one-character session-selection packet from the special
    /// input device: opens the framebuffer (saving its contents for restore
    /// on exit), switches to an existing session of that name, or creates
    /// one if none exists yet. Returns `true` if a packet was recognized,
    /// so the caller can arm an immediate refresh.
    pub fn select_or_create_by_name(&mut self, bytes: &[u8]) -> Result<bool> {
        let Some(tag) = parse_special_packet(bytes) else {
            return Ok(false);
        };
        self.enter_terminal_mode();
        let existing = self
            .names
            .iter()
            .find(|(_, n)| n.chars().next() == Some(tag))
            .map(|(id, _)| *id);
        match existing {
            Some(id) => self.switch_current(id),
            None => {
                let id = self.create_session(tag.to_string())?;
                self.switch_current(id);
            }
        }
        Ok(true)
    }

    /// Opens and exclusively grabs the configured keypad/five-way/volume
    /// input devices, starting a background reader per device. Individual
    /// device failures are tolerated; failing all three is fatal.
    pub fn capture_inputs(&mut self) -> Result<()> {
        let candidates = [
            self.settings.kpad_in.clone(),
            self.settings.fw_in.clone(),
            self.settings.vol_in.clone(),
        ];
        let mut opened = 0;
        for path in candidates.into_iter().flatten() {
            match InputDevice::open(&path) {
                Ok(mut dev) => {
                    dev.set_grab(true);
                    if let Ok(handle) = dev.grab_handle() {
                        self.capture.push(handle);
                    }
                    let tx = self.key_tx.clone();
                    dev.spawn_reader(tx);
                    opened += 1;
                }
                Err(e) => warn!(error = %e, path = %path.display(), "input device unavailable"),
            }
        }
        if opened == 0 {
            return Err(EmuError::NoInputDevices);
        }
        Ok(())
    }

    /// Opens the special session-selection device, if configured, and
    /// starts a background reader forwarding raw packets to
    /// [`Self::special_rx`]. Not exclusively grabbed: unlike the keypad
    /// class devices it carries application-level packets, not key events
    /// other consumers would contend over. Absence is tolerated; this
    /// device is optional.
    pub fn open_special_device(&mut self) {
        let Some(path) = self.settings.special_in.clone() else {
            return;
        };
        match InputDevice::open(&path) {
            Ok(dev) => {
                let tx = self.special_tx.clone();
                dev.spawn_raw_reader(tx);
            }
            Err(e) => warn!(error = %e, path = %path.display(), "special input device unavailable"),
        }
    }

    /// Dispatches one physical key event against the current session.
    pub fn handle_key(&mut self, event: KeyEvent) -> KeyOutcome {
        let Some(id) = self.current else {
            return KeyOutcome::default();
        };
        let scrollback_top = self
            .event_loop
            .session_mut(id)
            .map(|s| s.scrollback_top())
            .unwrap_or(0);
        let base = self
            .keymap
            .lookup_by_code(event.code)
            .map(|e| e.name.chars().next().unwrap_or('\0'));
        let kind = self.keymap.lookup_by_code(event.code).map(|e| e.kind);

        let outcome = self
            .dispatch
            .dispatch(event, base, kind, &self.dispatch_cfg, scrollback_top);

        if let Some(session) = self.event_loop.session_mut(id) {
            if !outcome.bytes.is_empty() {
                session.key_in(&outcome.bytes);
            }
        }
        KeyOutcome {
            refresh_requested: outcome.refresh_requested,
            end_terminal: outcome.end_terminal,
        }
    }

    /// Advances the event loop by one iteration, dropping bookkeeping for
    /// any sessions that died this pass.
    pub fn tick(&mut self) -> Vec<SessionId> {
        let report = self.event_loop.run_iteration();
        for id in &report.died {
            self.names.remove(id);
            if self.current == Some(*id) {
                self.current = self.names.keys().next().copied();
            }
        }
        report.ready_to_render
    }

    /// Renders the current session's grid, if any, to the framebuffer.
    pub fn render_current(&mut self) {
        let Some(id) = self.current else { return };
        let Some(session) = self.event_loop.session_mut(id) else {
            return;
        };
        let (_, snap) = session.state(StateOptions {
            reset_modified: false,
            want_snapshot: true,
        });
        let Some(snap) = snap else { return };
        self.renderer.render(
            &snap,
            self.dispatch.scrollback_pos,
            self.font.as_ref(),
            self.framebuffer.as_mut(),
        );
    }

    /// Applies a freshly-parsed config without tearing down sessions: swaps
    /// in the new settings and KeyMap, then releases and reopens the
    /// keypad-class and special input devices against the new paths.
    /// Existing sessions and their Grids are left untouched, per the
    /// SIGHUP-reload contract.
    pub fn reload_config(&mut self, raw: &RawConfig, keymap: KeyMap) {
        self.settings = Settings::from_raw(raw);
        self.keymap = keymap;
        self.dispatch_cfg = build_dispatch_config(&self.settings, &self.keymap);

        for mut dev in self.capture.drain(..) {
            dev.set_grab(false);
        }
        if let Err(e) = self.capture_inputs() {
            warn!(error = %e, "reopening input devices after reload failed");
        }
        self.open_special_device();

        info!("configuration reloaded");
    }

    /// Releases input-device grabs, kills every session's child, and
    /// restores the framebuffer's pre-launch contents if one was saved.
    /// Idempotent and safe to call on every shutdown path, including after
    /// a panic.
    pub fn shutdown(&mut self) {
        for dev in &mut self.capture {
            dev.set_grab(false);
        }
        self.event_loop.kill_all();
        if let Some(image) = self.saved_image.take() {
            self.framebuffer.restore_image(&image);
        }
        self.framebuffer.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::PtyChannel;
    use std::time::Duration;

    struct FailingSpawn;
    impl PtySpawn for FailingSpawn {
        fn spawn(&self, _command_path: &str, _rows: u16, _cols: u16) -> Result<PtyChannel> {
            Err(EmuError::SessionSpawn("no pty in tests".to_string()))
        }
    }

    fn test_settings() -> Settings {
        let raw = RawConfig::default();
        Settings::from_raw(&raw)
    }

    #[test]
    fn create_session_propagates_spawn_failure() {
        let mut lp = Launchpad::new(test_settings(), KeyMap::from_lines(Vec::<&str>::new()), Box::new(FailingSpawn));
        assert!(lp.create_session("main").is_err());
        assert!(lp.current_session().is_none());
    }

    #[test]
    fn select_or_create_by_name_ignores_malformed_packet() {
        let mut lp = Launchpad::new(test_settings(), KeyMap::from_lines(Vec::<&str>::new()), Box::new(FailingSpawn));
        assert!(!lp.select_or_create_by_name(b"B").unwrap());
        assert!(lp.current_session().is_none());
    }

    #[test]
    fn select_or_create_by_name_propagates_spawn_failure_for_new_session() {
        let mut lp = Launchpad::new(test_settings(), KeyMap::from_lines(Vec::<&str>::new()), Box::new(FailingSpawn));
        assert!(lp.select_or_create_by_name(b"Ax").is_err());
    }

    #[test]
    fn open_special_device_is_a_no_op_without_configured_path() {
        let mut lp = Launchpad::new(test_settings(), KeyMap::from_lines(Vec::<&str>::new()), Box::new(FailingSpawn));
        lp.open_special_device();
        assert!(lp.special_rx.try_recv().is_err());
    }

    #[test]
    fn switch_current_ignores_unknown_session_id() {
        let mut lp = Launchpad::new(test_settings(), KeyMap::from_lines(Vec::<&str>::new()), Box::new(FailingSpawn));
        lp.switch_current(42);
        assert!(lp.current_session().is_none());
    }

    #[test]
    fn dispatch_config_resolves_names_to_codes_when_keymap_has_them() {
        let settings = Settings {
            term_shift: Some("Shift".to_string()),
            ..test_settings()
        };
        let keymap = KeyMap::from_lines(["s5 = Shift"]);
        let cfg = build_dispatch_config(&settings, &keymap);
        assert_eq!(cfg.term_shift, Some(5));
    }

    #[test]
    fn refresh_delay_defaults_flow_from_settings_into_the_event_loop() {
        let settings = test_settings();
        assert_eq!(settings.refresh_delay, Duration::from_millis(100));
    }
}
