//! Flat `key=value` property files.
//!
//! Reads and writes the line-oriented property format used for persisted
//! pipeline configuration: `#`/`!` comments, `=`, `:` or whitespace as the
//! key separator, backslash escapes and trailing-backslash continuations.

use std::collections::BTreeMap;
use std::io::{self, Write};

/// Parse property text into an ordered key/value map.
///
/// Later duplicates override earlier ones.
pub fn parse(input: &str) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    let mut lines = input.lines();

    while let Some(line) = lines.next() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
            continue;
        }

        let mut logical = String::from(trimmed);
        while ends_with_continuation(&logical) {
            logical.pop();
            match lines.next() {
                Some(next) => logical.push_str(next.trim_start()),
                None => break,
            }
        }

        let (key, value) = split_entry(&logical);
        entries.insert(unescape(key), unescape(value));
    }

    entries
}

/// Write a property file with a comment header followed by the entries in order.
pub fn write<W, I, K, V>(out: &mut W, comments: &[&str], entries: I) -> io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    for comment in comments {
        writeln!(out, "#{}", comment)?;
    }
    for (key, value) in entries {
        writeln!(
            out,
            "{}={}",
            escape(key.as_ref(), true),
            escape(value.as_ref(), false)
        )?;
    }
    Ok(())
}

// An odd number of trailing backslashes continues the line.
fn ends_with_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

fn split_entry(line: &str) -> (&str, &str) {
    let mut escaped = false;
    for (idx, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '=' | ':' => return (&line[..idx], line[idx + 1..].trim_start()),
            c if c.is_whitespace() => {
                let rest = line[idx..].trim_start();
                let rest = rest
                    .strip_prefix('=')
                    .or_else(|| rest.strip_prefix(':'))
                    .unwrap_or(rest);
                return (&line[..idx], rest.trim_start());
            }
            _ => {}
        }
    }
    (line, "")
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{000c}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn escape(raw: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for (idx, ch) in raw.chars().enumerate() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{000c}' => out.push_str("\\f"),
            '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(ch);
            }
            ' ' if is_key || idx == 0 => out.push_str("\\ "),
            _ => out.push(ch),
        }
    }
    out
}
