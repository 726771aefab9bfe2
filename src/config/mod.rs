//! INI-like configuration loading.
//!
//! Sections are headed `[name]`, each line inside is `key = value`. `;`
//! anywhere starts a trailing comment, a leading `#` comments out the whole
//! line, double quotes protect `=`/`;` from being treated as separators, and
//! a backslash escapes the following byte literally. An `include = path`
//! line inlines another file's sections into the current set, resolved
//! relative to the directory of the file it appears in when not absolute.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{EmuError, Result};

pub type Section = HashMap<String, String>;

/// The parsed `sections -> key -> value` tree, before any typed lookups.
#[derive(Debug, Clone, Default)]
pub struct RawConfig {
    sections: HashMap<String, Section>,
}

impl RawConfig {
    pub fn parse_file(path: &Path) -> Result<Self> {
        let mut cfg = RawConfig::default();
        let mut seen = HashSet::new();
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        load_into(path, &base_dir, &mut cfg, &mut seen)?;
        Ok(cfg)
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    /// Reconstruct `code = name1 name2 ...` lines from a section, in the
    /// shape [`crate::keymap::KeyMap::from_lines`] expects.
    pub fn section_lines(&self, name: &str) -> Vec<String> {
        let Some(section) = self.sections.get(name) else {
            return Vec::new();
        };
        section.iter().map(|(k, v)| format!("{k} = {v}")).collect()
    }

    fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections.get(section)?.get(key).map(String::as_str)
    }
}

fn load_into(
    path: &Path,
    base_dir: &Path,
    cfg: &mut RawConfig,
    seen: &mut HashSet<PathBuf>,
) -> Result<()> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !seen.insert(canonical) {
        return Ok(());
    }

    let text = fs::read_to_string(path).map_err(|_| EmuError::ConfigNotFound(path.to_path_buf()))?;

    let mut current_section = String::new();
    for raw_line in text.lines() {
        let trimmed = raw_line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some(name) = trimmed.strip_prefix('[').and_then(|s| s.split(']').next()) {
            current_section = name.trim().to_string();
            continue;
        }
        let Some((key, value)) = parse_kv(raw_line) else {
            continue;
        };
        if key.eq_ignore_ascii_case("include") {
            let inc_path = resolve_include(&value, base_dir);
            load_into(&inc_path, base_dir, cfg, seen)?;
            continue;
        }
        cfg.sections
            .entry(current_section.clone())
            .or_default()
            .insert(key, value);
    }
    Ok(())
}

fn resolve_include(value: &str, base_dir: &Path) -> PathBuf {
    let p = Path::new(value);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

/// Parse one `key = value` line honoring quotes, comments, and a single
/// backslash escape of the following byte. Returns `None` for lines with no
/// `=` (including blank/comment lines already filtered by the caller).
fn parse_kv(raw: &str) -> Option<(String, String)> {
    let mut key = String::new();
    let mut value = String::new();
    let mut in_quotes = false;
    let mut escape = false;
    let mut seen_eq = false;

    for c in raw.chars() {
        if escape {
            if seen_eq {
                value.push(c);
            } else {
                key.push(c);
            }
            escape = false;
            continue;
        }
        match c {
            '\\' => escape = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => break,
            '=' if !in_quotes && !seen_eq => seen_eq = true,
            _ => {
                if seen_eq {
                    value.push(c);
                } else {
                    key.push(c);
                }
            }
        }
    }

    if !seen_eq {
        return None;
    }
    let key = key.trim().to_string();
    let value = value.trim().to_string();
    if key.is_empty() {
        None
    } else {
        Some((key, value))
    }
}

/// Typed view over the `[Settings]` section plus resolved key names.
#[derive(Debug, Clone)]
pub struct Settings {
    pub refresh_delay: Duration,
    pub kpad_in: Option<PathBuf>,
    pub kpad_out: Option<PathBuf>,
    pub fw_in: Option<PathBuf>,
    pub fw_out: Option<PathBuf>,
    pub vol_in: Option<PathBuf>,
    pub vol_out: Option<PathBuf>,
    pub special_in: Option<PathBuf>,
    pub special_out: Option<PathBuf>,
    pub symbols: String,
    pub lang_symbols: String,
    pub lang_symbols_16: String,
    pub shift_lang_symbols: String,
    pub shift_lang_symbols_16: String,
    pub font: Option<PathBuf>,
    pub encoding: String,
    pub font_height: u32,
    pub font_width: u32,
    pub y_offset: u32,
    pub scrollback_lines: usize,
    pub term_end: Option<String>,
    pub term_esc: Option<String>,
    pub term_shift: Option<String>,
    pub term_ctrl: Option<String>,
    pub term_sym: Option<String>,
    pub term_fn: Option<String>,
    pub term_lang: Option<String>,
    pub term_home: Option<String>,
    pub term_scroll_up: Option<String>,
    pub term_scroll_down: Option<String>,
}

impl Settings {
    pub fn from_raw(raw: &RawConfig) -> Self {
        let int = |key: &str, default: i64| -> i64 {
            raw.get("Settings", key)
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(default)
        };
        let string = |key: &str| raw.get("Settings", key).unwrap_or("").to_string();
        let path = |key: &str| raw.get("Settings", key).map(PathBuf::from);
        let name = |key: &str| raw.get("Settings", key).map(str::to_string);

        Self {
            refresh_delay: Duration::from_millis(int("RefreshDelay", 100).max(0) as u64),
            kpad_in: path("KpadIn"),
            kpad_out: path("KpadOut"),
            fw_in: path("FwIn"),
            fw_out: path("FwOut"),
            vol_in: path("VolIn"),
            vol_out: path("VolOut"),
            special_in: path("SpecialIn"),
            special_out: path("SpecialOut"),
            symbols: string("Symbols"),
            lang_symbols: string("LangSymbols"),
            lang_symbols_16: string("LangSymbols16"),
            shift_lang_symbols: string("ShiftLangSymbols"),
            shift_lang_symbols_16: string("ShiftLangSymbols16"),
            font: path("Font"),
            encoding: string("Encoding"),
            font_height: int("FontHeight", 16).max(0) as u32,
            font_width: int("FontWidth", 8).max(0) as u32,
            y_offset: int("YOffset", 40).max(0) as u32,
            scrollback_lines: int("ScrollbackLines", 0).max(0) as usize,
            term_end: name("TermEnd"),
            term_esc: name("TermEsc"),
            term_shift: name("TermShift"),
            term_ctrl: name("TermCtrl"),
            term_sym: name("TermSym"),
            term_fn: name("TermFn"),
            term_lang: name("TermLang"),
            term_home: name("TermHome"),
            term_scroll_up: name("TermScrollUp"),
            term_scroll_down: name("TermScrollDown"),
        }
    }

    /// Whether the grid should run in wide (UTF-8/UCS-2) character mode.
    /// Matches the reference firmware's `init_font`: unset or `"UTF8"`
    /// (case-insensitively) means wide mode; any other codepage name means
    /// narrow, 8-bit mode.
    pub fn is_wide(&self) -> bool {
        self.encoding.is_empty() || self.encoding.eq_ignore_ascii_case("UTF8")
    }
}

/// Choose which platform-specific `[inkeys-*]` overlay section to load
/// alongside `[inkeys]`, probing the candidate input devices for existence.
/// Falls back to `k3` when neither probe succeeds (matches the reference
/// device's own default).
pub fn probe_platform_section(k3_probe: &Path, dx_probe: &Path) -> &'static str {
    if dx_probe.exists() {
        "inkeys-dx"
    } else if k3_probe.exists() {
        "inkeys-k3"
    } else {
        "inkeys-k3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_sections_and_keys() {
        let f = write_temp("[Settings]\nRefreshDelay = 250\nFont = /lib/fonts/a\n");
        let cfg = RawConfig::parse_file(f.path()).unwrap();
        assert_eq!(cfg.get("Settings", "RefreshDelay"), Some("250"));
        let settings = Settings::from_raw(&cfg);
        assert_eq!(settings.refresh_delay, Duration::from_millis(250));
        assert_eq!(settings.font, Some(PathBuf::from("/lib/fonts/a")));
    }

    #[test]
    fn semicolon_comment_truncates_line() {
        let f = write_temp("[Settings]\nFontHeight = 20 ; override\n");
        let cfg = RawConfig::parse_file(f.path()).unwrap();
        assert_eq!(cfg.get("Settings", "FontHeight"), Some("20"));
    }

    #[test]
    fn leading_hash_comments_out_whole_line() {
        let f = write_temp("[Settings]\n# FontHeight = 99\nFontHeight = 20\n");
        let cfg = RawConfig::parse_file(f.path()).unwrap();
        assert_eq!(cfg.get("Settings", "FontHeight"), Some("20"));
    }

    #[test]
    fn quotes_protect_semicolon_from_comment_start() {
        let f = write_temp("[Settings]\nSymbols = \"a;b;c\"\n");
        let cfg = RawConfig::parse_file(f.path()).unwrap();
        assert_eq!(cfg.get("Settings", "Symbols"), Some("a;b;c"));
    }

    #[test]
    fn backslash_escapes_next_byte() {
        let f = write_temp("[Settings]\nSymbols = a\\;b\n");
        let cfg = RawConfig::parse_file(f.path()).unwrap();
        assert_eq!(cfg.get("Settings", "Symbols"), Some("a;b"));
    }

    #[test]
    fn keymap_section_lines_round_trip() {
        let f = write_temp("[inkeys]\n65 = a b c\n66 = sShift\n");
        let cfg = RawConfig::parse_file(f.path()).unwrap();
        let lines = cfg.section_lines("inkeys");
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().any(|l| l.starts_with("65")));
    }

    #[test]
    fn include_inlines_other_file_relative_to_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let included = dir.path().join("extra.ini");
        fs::write(&included, "[Settings]\nFontWidth = 9\n").unwrap();
        let main = dir.path().join("main.ini");
        fs::write(&main, "[Settings]\ninclude = extra.ini\nFontHeight = 30\n").unwrap();

        let cfg = RawConfig::parse_file(&main).unwrap();
        assert_eq!(cfg.get("Settings", "FontWidth"), Some("9"));
        assert_eq!(cfg.get("Settings", "FontHeight"), Some("30"));
    }

    #[test]
    fn missing_file_is_config_not_found() {
        let err = RawConfig::parse_file(Path::new("/nonexistent/path.ini")).unwrap_err();
        assert!(matches!(err, EmuError::ConfigNotFound(_)));
    }
}
