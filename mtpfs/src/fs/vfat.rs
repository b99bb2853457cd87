//! Name rewriting for storages formatted with VFAT, and sibling
//! de-duplication for every listing.

use std::collections::HashSet;

/// Longest name, in UTF-16 code units, that survives a PTP string field.
/// VFAT itself allows one more.
pub const MAX_NAME_UNITS: usize = libmtp::codec::MAX_STRING_CHARS - 1;

const REPLACEMENT: char = '_';

fn forbidden(c: char) -> bool {
    matches!(c, '"' | '*' | '/' | ':' | '<' | '>' | '?' | '\\' | '|') || c.is_control()
}

pub fn utf16_len(s: &str) -> usize {
    s.chars().map(char::len_utf16).sum()
}

/// Cuts `s` to at most `units` UTF-16 code units on a character boundary.
fn truncate_units(s: &str, units: usize) -> &str {
    let mut used = 0;
    for (i, c) in s.char_indices() {
        used += c.len_utf16();
        if used > units {
            return &s[..i];
        }
    }
    s
}

/// Rewrites `name` into a name VFAT accepts.
pub fn sanitize(name: &str) -> String {
    let mut out: Vec<char> = name
        .chars()
        .map(|c| if forbidden(c) { REPLACEMENT } else { c })
        .collect();
    for c in out.iter_mut().rev() {
        if *c == '.' || *c == ' ' {
            *c = REPLACEMENT;
        } else {
            break;
        }
    }
    let out: String = out.into_iter().collect();
    let out = truncate_units(&out, MAX_NAME_UNITS);
    if out.is_empty() {
        REPLACEMENT.to_string()
    } else {
        out.to_string()
    }
}

/// Minimal rewriting for storages that are not VFAT: only what a POSIX
/// directory entry cannot hold.
pub fn path_safe(name: &str) -> String {
    match name {
        "" | "." | ".." => REPLACEMENT.to_string().repeat(name.len().max(1)),
        _ => name
            .chars()
            .map(|c| if c == '/' || c == '\0' { REPLACEMENT } else { c })
            .collect(),
    }
}

/// Splits at the last dot, keeping leading-dot names whole.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 => name.split_at(i),
        _ => (name, ""),
    }
}

fn with_suffix(name: &str, n: usize) -> String {
    let suffix = format!("~{n}");
    let (stem, ext) = match split_extension(name) {
        (stem, ext) if utf16_len(&suffix) + utf16_len(ext) < MAX_NAME_UNITS => (stem, ext),
        // an extension that leaves no room for the stem counts as part of it
        _ => (name, ""),
    };
    let budget = MAX_NAME_UNITS - utf16_len(&suffix) - utf16_len(ext);
    format!("{}{suffix}{ext}", truncate_units(stem, budget))
}

/// Tracks names already handed out within one directory.
#[derive(Debug, Default)]
pub struct Siblings {
    taken: HashSet<String>,
}

impl Siblings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_taken<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            taken: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns `name`, or the first `stem~N.ext` not yet taken, and reserves it.
    pub fn claim(&mut self, name: String) -> String {
        let mut unique = name.clone();
        let mut n = 0;
        while self.taken.contains(&unique) {
            n += 1;
            unique = with_suffix(&name, n);
        }
        self.taken.insert(unique.clone());
        unique
    }
}

/// Exposed names for siblings given in ascending object-handle order.
pub fn expose_all<'a, I>(names: I, vfat: bool) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut siblings = Siblings::new();
    names
        .into_iter()
        .map(|name| {
            let rewritten = if vfat { sanitize(name) } else { path_safe(name) };
            siblings.claim(rewritten)
        })
        .collect()
}
