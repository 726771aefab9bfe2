//! Sticky-modifier key dispatch: physical key events in, PTY byte strings out.
//!
//! The physical keyboard has far fewer keys than a full terminal keyboard,
//! so modifiers are "sticky" (set on press, cleared on release) rather than
//! held-while-pressed, and several overlay layers (Fn, Sym, an alternate
//! language layer) reuse the same physical keys for different output.

use crate::keymap::KeyKind;

/// A 28-position physical key layout shared by the Fn and Sym overlays:
/// digit row, then the two letter rows reachable without the bottom-most
/// row. Both overlay tables are indexed by position in this string.
const LAYOUT_ROW: &str = "1234567890qwertyuiopasdfghjk";

/// Fn-overlay output for each [`LAYOUT_ROW`] position: the first ten are
/// F1-F10, the next two F11/F12, the rest punctuation not otherwise
/// reachable from the base layout.
const FN_TABLE: [&[u8]; 28] = [
    b"\x1bOP", b"\x1bOQ", b"\x1bOR", b"\x1bOS", b"\x1b[15~", b"\x1b[17~", b"\x1b[18~", b"\x1b[19~",
    b"\x1b[20~", b"\x1b[21~", b"\x1b[23~", b"\x1b[24~", b"!", b"@", b"#", b"$", b"%", b"^", b"&",
    b"*", b"(", b")", b"-", b"_", b"=", b"+", b"[", b"]",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventValue {
    Release = 0,
    Press = 1,
    Repeat = 2,
}

#[derive(Debug, Clone, Copy)]
pub struct KeyEvent {
    pub value: EventValue,
    pub code: u16,
}

/// Physical codes the dispatcher treats specially, resolved from config.
#[derive(Debug, Clone, Default)]
pub struct DispatchConfig {
    pub term_shift: Option<u16>,
    pub term_ctrl: Option<u16>,
    pub term_sym: Option<u16>,
    pub term_fn: Option<u16>,
    pub term_lang: Option<u16>,
    pub term_home: Option<u16>,
    pub term_end: Option<u16>,
    pub term_scrollup: Option<u16>,
    pub term_scrolldown: Option<u16>,
    pub scrollback_step: usize,
    /// User-configured 28-position symbol overlay string.
    pub symbols: String,
    pub lang_symbols: String,
    pub shift_lang_symbols: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StickyModifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub sym: bool,
    pub fn_: bool,
    pub lang: bool,
    pub lang_lock: bool,
    pub home: bool,
    pub help: bool,
}

#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub bytes: Vec<u8>,
    pub refresh_requested: bool,
    pub end_terminal: bool,
}

pub struct InputDispatch {
    pub modifiers: StickyModifiers,
    pub scrollback_pos: usize,
}

impl InputDispatch {
    pub fn new() -> Self {
        Self {
            modifiers: StickyModifiers::default(),
            scrollback_pos: 0,
        }
    }

    /// Resolve one physical key event into PTY bytes plus side effects.
    /// `keymap` resolves the event's code to a base character (via its
    /// `by_code` table); `scrollback_top` bounds `scrollback_pos`.
    pub fn dispatch(
        &mut self,
        event: KeyEvent,
        base_char: Option<char>,
        key_kind: Option<KeyKind>,
        cfg: &DispatchConfig,
        scrollback_top: usize,
    ) -> DispatchOutcome {
        let mut out = DispatchOutcome::default();

        match event.value {
            EventValue::Press | EventValue::Repeat => {
                if Some(event.code) == cfg.term_shift {
                    self.modifiers.shift = true;
                    return out;
                }
                if Some(event.code) == cfg.term_ctrl {
                    self.modifiers.ctrl = true;
                    return out;
                }
                if Some(event.code) == cfg.term_sym {
                    self.modifiers.sym = true;
                    return out;
                }
                if Some(event.code) == cfg.term_fn {
                    self.modifiers.fn_ = true;
                    return out;
                }
                if Some(event.code) == cfg.term_lang {
                    if self.modifiers.shift {
                        self.modifiers.lang_lock = !self.modifiers.lang_lock;
                    } else {
                        self.modifiers.lang = true;
                    }
                    return out;
                }
                if Some(event.code) == cfg.term_scrollup {
                    self.scrollback_pos = (self.scrollback_pos + cfg.scrollback_step).min(scrollback_top);
                    out.refresh_requested = true;
                    return out;
                }
                if Some(event.code) == cfg.term_scrolldown {
                    self.scrollback_pos = self.scrollback_pos.saturating_sub(cfg.scrollback_step);
                    out.refresh_requested = true;
                    return out;
                }
                if Some(event.code) == cfg.term_home {
                    out.bytes = if self.modifiers.shift {
                        b"\x1bOF".to_vec()
                    } else {
                        b"\x1bOH".to_vec()
                    };
                } else if self.modifiers.fn_ {
                    out.bytes = self.fn_bytes(base_char, key_kind);
                } else if self.modifiers.sym {
                    out.bytes = self.sym_bytes(base_char, &cfg.symbols);
                } else if self.modifiers.lang || self.modifiers.lang_lock {
                    out.bytes = self.lang_bytes(base_char, cfg);
                } else {
                    out.bytes = self.base_bytes(base_char, key_kind);
                }

                if !out.bytes.is_empty() && self.scrollback_pos > 0 {
                    self.scrollback_pos = 0;
                    out.refresh_requested = true;
                }
            }
            EventValue::Release => {
                if Some(event.code) == cfg.term_shift {
                    self.modifiers.shift = false;
                } else if Some(event.code) == cfg.term_ctrl {
                    self.modifiers.ctrl = false;
                } else if Some(event.code) == cfg.term_sym {
                    self.modifiers.sym = false;
                } else if Some(event.code) == cfg.term_fn {
                    self.modifiers.fn_ = false;
                } else if Some(event.code) == cfg.term_lang {
                    self.modifiers.lang = false;
                } else if Some(event.code) == cfg.term_end {
                    if self.modifiers.help {
                        self.modifiers.help = false;
                        out.refresh_requested = true;
                    } else {
                        out.end_terminal = true;
                    }
                }
            }
        }
        out
    }

    fn fn_bytes(&self, base_char: Option<char>, key_kind: Option<KeyKind>) -> Vec<u8> {
        if matches!(key_kind, Some(KeyKind::FiveWay)) {
            // Backtab overlays the five-way select under Fn+Shift.
            if self.modifiers.shift {
                return b"\x1b[Z".to_vec();
            }
        }
        let Some(c) = base_char else { return Vec::new() };
        match LAYOUT_ROW.find(c.to_ascii_lowercase()) {
            Some(idx) => FN_TABLE[idx].to_vec(),
            None => Vec::new(),
        }
    }

    fn sym_bytes(&self, base_char: Option<char>, symbols: &str) -> Vec<u8> {
        let Some(c) = base_char else { return Vec::new() };
        let syms: Vec<char> = symbols.chars().collect();
        match LAYOUT_ROW.find(c.to_ascii_lowercase()) {
            Some(idx) if idx < syms.len() => {
                let mut buf = [0u8; 4];
                syms[idx].encode_utf8(&mut buf).as_bytes().to_vec()
            }
            _ => Vec::new(),
        }
    }

    fn lang_bytes(&self, base_char: Option<char>, cfg: &DispatchConfig) -> Vec<u8> {
        let Some(c) = base_char else { return Vec::new() };
        let table = if self.modifiers.shift && !cfg.shift_lang_symbols.is_empty() {
            &cfg.shift_lang_symbols
        } else {
            &cfg.lang_symbols
        };
        let syms: Vec<char> = table.chars().collect();
        match LAYOUT_ROW.find(c.to_ascii_lowercase()) {
            Some(idx) if idx < syms.len() => {
                let mut buf = [0u8; 4];
                syms[idx].encode_utf8(&mut buf).as_bytes().to_vec()
            }
            _ => Vec::new(),
        }
    }

    fn base_bytes(&self, base_char: Option<char>, key_kind: Option<KeyKind>) -> Vec<u8> {
        let Some(c) = base_char else {
            return Vec::new();
        };
        if c.is_ascii_alphabetic() {
            if self.modifiers.ctrl {
                let lower = c.to_ascii_lowercase() as u8;
                return vec![lower + 1 - b'a'];
            }
            let out = if self.modifiers.shift {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            return vec![out as u8];
        }
        if c.is_ascii_digit() && self.modifiers.shift {
            const SHIFTED: &[u8; 10] = b")!@#$%^&*(";
            let idx = (c as u8 - b'0') as usize;
            return vec![SHIFTED[idx]];
        }
        match c {
            '\r' | '\n' => vec![13],
            '\x1b' => vec![0x1b],
            ' ' => vec![0x20],
            '\x7f' => vec![0x7f],
            _ => match key_kind {
                Some(KeyKind::FiveWay) => self.five_way_bytes(c),
                _ => vec![c as u8],
            },
        }
    }

    fn five_way_bytes(&self, c: char) -> Vec<u8> {
        match c {
            'u' if self.modifiers.shift => b"\x1b[5~".to_vec(),
            'u' => b"\x1b[A".to_vec(),
            'd' if self.modifiers.shift => b"\x1b[6~".to_vec(),
            'd' => b"\x1b[B".to_vec(),
            'r' => b"\x1b[C".to_vec(),
            'l' => b"\x1b[D".to_vec(),
            _ => Vec::new(),
        }
    }
}

impl Default for InputDispatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> DispatchConfig {
        DispatchConfig {
            term_shift: Some(1),
            term_ctrl: Some(2),
            term_sym: Some(3),
            term_fn: Some(4),
            term_lang: Some(5),
            term_home: Some(6),
            term_end: Some(7),
            term_scrollup: Some(8),
            term_scrolldown: Some(9),
            scrollback_step: 3,
            symbols: "!@#$%^&*()qwertyuiopasdfghjk".chars().take(28).collect(),
            lang_symbols: String::new(),
            shift_lang_symbols: String::new(),
        }
    }

    #[test]
    fn letter_key_lowercase_by_default_uppercase_on_shift() {
        let mut d = InputDispatch::new();
        let out = d.dispatch(
            KeyEvent { value: EventValue::Press, code: 100 },
            Some('a'),
            None,
            &cfg(),
            0,
        );
        assert_eq!(out.bytes, b"a");

        d.dispatch(KeyEvent { value: EventValue::Press, code: 1 }, None, None, &cfg(), 0);
        let out = d.dispatch(
            KeyEvent { value: EventValue::Press, code: 100 },
            Some('a'),
            None,
            &cfg(),
            0,
        );
        assert_eq!(out.bytes, b"A");
    }

    #[test]
    fn ctrl_modifier_maps_letter_to_control_code() {
        let mut d = InputDispatch::new();
        d.dispatch(KeyEvent { value: EventValue::Press, code: 2 }, None, None, &cfg(), 0);
        let out = d.dispatch(
            KeyEvent { value: EventValue::Press, code: 100 },
            Some('c'),
            None,
            &cfg(),
            0,
        );
        assert_eq!(out.bytes, vec![3]);
    }

    #[test]
    fn shift_digit_maps_to_symbol_row() {
        let mut d = InputDispatch::new();
        d.dispatch(KeyEvent { value: EventValue::Press, code: 1 }, None, None, &cfg(), 0);
        let out = d.dispatch(
            KeyEvent { value: EventValue::Press, code: 100 },
            Some('1'),
            None,
            &cfg(),
            0,
        );
        assert_eq!(out.bytes, b"!");
    }

    #[test]
    fn scrollup_clamps_to_scrollback_top_and_requests_refresh() {
        let mut d = InputDispatch::new();
        let out = d.dispatch(KeyEvent { value: EventValue::Press, code: 8 }, None, None, &cfg(), 5);
        assert!(out.refresh_requested);
        assert_eq!(d.scrollback_pos, 3);
        let out = d.dispatch(KeyEvent { value: EventValue::Press, code: 8 }, None, None, &cfg(), 5);
        assert!(out.refresh_requested);
        assert_eq!(d.scrollback_pos, 5);
    }

    #[test]
    fn release_of_term_end_closes_terminal_unless_help_shown() {
        let mut d = InputDispatch::new();
        let out = d.dispatch(KeyEvent { value: EventValue::Release, code: 7 }, None, None, &cfg(), 0);
        assert!(out.end_terminal);

        let mut d = InputDispatch::new();
        d.modifiers.help = true;
        let out = d.dispatch(KeyEvent { value: EventValue::Release, code: 7 }, None, None, &cfg(), 0);
        assert!(!out.end_terminal);
        assert!(out.refresh_requested);
    }

    #[test]
    fn fn_modifier_maps_digit_row_to_function_keys() {
        let mut d = InputDispatch::new();
        d.dispatch(KeyEvent { value: EventValue::Press, code: 4 }, None, None, &cfg(), 0);
        let out = d.dispatch(
            KeyEvent { value: EventValue::Press, code: 100 },
            Some('1'),
            None,
            &cfg(),
            0,
        );
        assert_eq!(out.bytes, b"\x1bOP");
    }

    #[test]
    fn term_home_emits_shift_sensitive_sequence() {
        let mut d = InputDispatch::new();
        let out = d.dispatch(KeyEvent { value: EventValue::Press, code: 6 }, None, None, &cfg(), 0);
        assert_eq!(out.bytes, b"\x1bOH");
    }

    #[test]
    fn scrollback_reset_on_keypress_after_scrolling() {
        let mut d = InputDispatch::new();
        d.dispatch(KeyEvent { value: EventValue::Press, code: 8 }, None, None, &cfg(), 5);
        assert_eq!(d.scrollback_pos, 3);
        let out = d.dispatch(
            KeyEvent { value: EventValue::Press, code: 100 },
            Some('a'),
            None,
            &cfg(),
            5,
        );
        assert_eq!(d.scrollback_pos, 0);
        assert!(out.refresh_requested);
    }
}
