//! Physical key code tables loaded from configuration.
//!
//! Mirrors the original device's two-section config scheme: a
//! platform-independent `[inkeys]` table plus a platform-specific overlay,
//! each contributing `code = name1 name2 ...` entries that expand into
//! individual [`KeyMapEntry`] records.

/// The kind of physical input an entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeyKind {
    Send = 0,
    FiveWay = 1,
    Volume = 2,
    Shift = 3,
    Alt = 4,
    Sym = 5,
}

#[derive(Debug, Clone)]
pub struct KeyMapEntry {
    pub name: String,
    pub kind: KeyKind,
    pub code: u16,
    /// Row index within the symbol overlay, set only for `Sym` entries.
    pub ysteps: u8,
}

pub struct KeyMap {
    /// Sorted by (name length, case-folded name, kind) for name lookups.
    by_name: Vec<KeyMapEntry>,
    /// Direct-addressed by code, populated only for Send/FiveWay entries.
    by_code: Box<[Option<KeyMapEntry>; 256]>,
}

fn fold_key(name: &str) -> (usize, String) {
    (name.len(), name.to_ascii_lowercase())
}

impl KeyMap {
    /// Build a KeyMap from raw `code = name1 name2 ...` lines, e.g. as read
    /// from the `[inkeys]` and platform-specific config sections.
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut entries = Vec::new();
        for line in lines {
            parse_line(line, &mut entries);
        }

        entries.sort_by(|a, b| fold_key(&a.name).cmp(&fold_key(&b.name)).then(a.kind.cmp(&b.kind)));
        entries.dedup_by(|a, b| fold_key(&a.name) == fold_key(&b.name));

        let mut by_code_vec: Vec<Option<KeyMapEntry>> = std::iter::repeat_with(|| None).take(256).collect();
        for e in &entries {
            if matches!(e.kind, KeyKind::Send | KeyKind::FiveWay) && (e.code as usize) < 256 {
                by_code_vec[e.code as usize] = Some(e.clone());
            }
        }
        let by_code: Box<[Option<KeyMapEntry>; 256]> = by_code_vec.try_into().unwrap_or_else(|_| {
            unreachable!("by_code_vec is always exactly 256 entries long")
        });

        Self {
            by_name: entries,
            by_code,
        }
    }

    /// Binary search by `(length, case-folded name)`. A single space looks
    /// up `"Space"` per the original device's shorthand.
    pub fn lookup_by_name(&self, name: &str) -> Option<&KeyMapEntry> {
        let name = if name == " " { "Space" } else { name };
        let key = fold_key(name);
        self.by_name
            .binary_search_by(|e| fold_key(&e.name).cmp(&key))
            .ok()
            .map(|idx| &self.by_name[idx])
    }

    pub fn lookup_by_code(&self, code: u16) -> Option<&KeyMapEntry> {
        self.by_code.get(code as usize).and_then(|e| e.as_ref())
    }
}

/// Parse one `code = name1 name2 ...` config line into entries, appending
/// them to `out`. Malformed lines are silently skipped (best-effort, as the
/// original config loader does for stray input).
fn parse_line(line: &str, out: &mut Vec<KeyMapEntry>) {
    let Some((code_str, rest)) = line.split_once('=') else {
        return;
    };
    let Some((kind, base_code, ysteps)) = classify_key(code_str.trim()) else {
        return;
    };

    for (idx, raw_tok) in tokenize(rest.trim()).into_iter().enumerate() {
        out.push(KeyMapEntry {
            name: raw_tok,
            kind,
            code: base_code + idx as u16,
            ysteps,
        });
    }
}

/// Split on whitespace, honoring a single backslash-escape of the next byte
/// within a token (so `\ ` inside a token is a literal space, not a
/// separator).
fn tokenize(s: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut cur = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                cur.push(escaped);
            }
        } else if c.is_whitespace() {
            if !cur.is_empty() {
                tokens.push(std::mem::take(&mut cur));
            }
        } else {
            cur.push(c);
        }
    }
    if !cur.is_empty() {
        tokens.push(cur);
    }
    tokens
}

/// Classify the *key* (left side of `=`) into a kind, base code, and ysteps,
/// applied to every name token in the value. `s`/`f`/`v` prefix the code
/// with SHIFT/FW/VOL; a `row` prefix (followed by the step count) selects
/// SYM with `ysteps = N` and a base code of 0; anything else is a plain
/// numeric code and type SEND. Returns `None` for a key that parses as
/// neither, so the whole line is skipped.
fn classify_key(key: &str) -> Option<(KeyKind, u16, u8)> {
    if let Some(rest) = key.strip_prefix("row") {
        let ysteps = rest.parse::<u8>().unwrap_or(0);
        return Some((KeyKind::Sym, 0, ysteps));
    }
    match key.chars().next() {
        Some('s') => key[1..].parse::<u16>().ok().map(|c| (KeyKind::Shift, c, 0)),
        Some('f') => key[1..].parse::<u16>().ok().map(|c| (KeyKind::FiveWay, c, 0)),
        Some('v') => key[1..].parse::<u16>().ok().map(|c| (KeyKind::Volume, c, 0)),
        _ => key.parse::<u16>().ok().map(|c| (KeyKind::Send, c, 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_code_assignment_across_tokens() {
        let km = KeyMap::from_lines(["65 = a b c"]);
        assert_eq!(km.lookup_by_code(65).map(|e| e.name.as_str()), Some("a"));
        assert_eq!(km.lookup_by_code(66).map(|e| e.name.as_str()), Some("b"));
        assert_eq!(km.lookup_by_code(67).map(|e| e.name.as_str()), Some("c"));
    }

    #[test]
    fn space_name_lookup_uses_shorthand() {
        let km = KeyMap::from_lines(["32 = Space"]);
        assert!(km.lookup_by_name(" ").is_some());
        assert_eq!(km.lookup_by_name(" ").unwrap().name, "Space");
    }

    #[test]
    fn by_code_only_populated_for_send_and_fiveway() {
        let km = KeyMap::from_lines(["v1 = VolUp", "s2 = Shift"]);
        assert!(km.lookup_by_code(1).is_none());
        assert!(km.lookup_by_code(2).is_none());
    }

    #[test]
    fn dedup_keeps_smallest_kind_for_duplicate_names() {
        let km = KeyMap::from_lines(["10 = a", "f20 = a"]);
        let entry = km.lookup_by_name("a").unwrap();
        assert_eq!(entry.kind, KeyKind::Send);
    }

    #[test]
    fn type_prefix_on_key_applies_to_every_token_in_the_value() {
        let km = KeyMap::from_lines(["s5 = Shift"]);
        let entry = km.lookup_by_name("Shift").unwrap();
        assert_eq!(entry.kind, KeyKind::Shift);
        assert_eq!(entry.code, 5);
    }

    #[test]
    fn row_prefix_on_key_sets_sym_kind_and_ysteps() {
        let km = KeyMap::from_lines(["row3 = q w e"]);
        let entry = km.lookup_by_name("w").unwrap();
        assert_eq!(entry.kind, KeyKind::Sym);
        assert_eq!(entry.ysteps, 3);
        assert_eq!(entry.code, 1);
    }

    #[test]
    fn backslash_escapes_space_within_token() {
        let km = KeyMap::from_lines([r"30 = \ "]);
        assert_eq!(km.lookup_by_code(30).map(|e| e.name.as_str()), Some(" "));
    }
}
