//! Streaming `.reg` text parser: decodes the input encoding, scans lines
//! on borrowed slices wherever possible, and emits a flat [`EditOp`]
//! sequence. Parse errors always abort immediately — partial edit lists
//! are never returned, per the apply side's all-or-nothing expectations.

use crate::cell::ValueType;
use crate::editop::EditOp;
use crate::error::{HiveError, Result};
use crate::regfile::config::{InputEncoding, ParserConfig};
use encoding_rs::UTF_16LE;
use std::borrow::Cow;
use std::collections::HashSet;
use tracing::{debug, trace};

const HEADER_LINE: &str = "Windows Registry Editor Version 5.00";

const ROOT_ALIASES: &[(&str, &str)] = &[
    ("HKLM", "HKEY_LOCAL_MACHINE"),
    ("HKCU", "HKEY_CURRENT_USER"),
    ("HKCR", "HKEY_CLASSES_ROOT"),
    ("HKU", "HKEY_USERS"),
    ("HKCC", "HKEY_CURRENT_CONFIG"),
];

/// Tried in order when [`ParserConfig::auto_prefix`] is set: the five
/// `HKEY_LOCAL_MACHINE` subtrees Windows treats as separate hive files,
/// then each other root as a whole.
const AUTO_PREFIXES: &[&str] = &[
    "HKEY_LOCAL_MACHINE\\SOFTWARE",
    "HKEY_LOCAL_MACHINE\\SYSTEM",
    "HKEY_LOCAL_MACHINE\\SAM",
    "HKEY_LOCAL_MACHINE\\SECURITY",
    "HKEY_LOCAL_MACHINE\\HARDWARE",
    "HKEY_LOCAL_MACHINE",
    "HKEY_CURRENT_USER",
    "HKEY_CLASSES_ROOT",
    "HKEY_USERS",
    "HKEY_CURRENT_CONFIG",
];

/// Parses `input` into a flat sequence of edit operations, in file order.
pub fn parse(input: &[u8], config: &ParserConfig) -> Result<Vec<EditOp>> {
    let decoded = decode_input(input, config.input_encoding)?;
    let bytes: &[u8] = &decoded;
    debug!(len = bytes.len(), "parsing .reg input");

    let mut ops = Vec::with_capacity(bytes.len() / 50 + 8);
    let mut seen = HashSet::with_capacity(bytes.len() / 50 + 8);
    let mut lines = Lines::new(bytes);
    let mut header_seen = false;
    let mut current_section: Option<String> = None;

    while let Some((raw_line, offset)) = lines.next() {
        let line = trim_ascii(raw_line);
        if line.is_empty() || line[0] == b';' {
            continue;
        }

        if !header_seen {
            if line == HEADER_LINE.as_bytes() {
                header_seen = true;
                continue;
            }
            if config.allow_missing_header {
                header_seen = true;
            } else {
                return Err(HiveError::MissingHeader);
            }
        }

        if line[0] == b'[' {
            current_section = parse_section(line, offset, config, &mut ops, &mut seen)?;
            continue;
        }

        let section = current_section.clone().ok_or_else(|| HiveError::MalformedSection {
            offset,
            excerpt: HiveError::excerpt(line),
        })?;
        let op = parse_value_line(line, offset, &section, &mut lines)?;
        ops.push(op);
    }

    trace!(ops = ops.len(), "parse complete");
    Ok(ops)
}

/// Splits a byte buffer into physical lines (terminator stripped),
/// recognizing CRLF, LF, and bare CR.
struct Lines<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Lines<'a> {
    fn new(data: &'a [u8]) -> Self {
        Lines { data, pos: 0 }
    }

    fn next(&mut self) -> Option<(&'a [u8], usize)> {
        if self.pos >= self.data.len() {
            return None;
        }
        let start = self.pos;
        let mut end = start;
        while end < self.data.len() && self.data[end] != b'\n' && self.data[end] != b'\r' {
            end += 1;
        }
        let line = &self.data[start..end];
        let mut next = end;
        if next < self.data.len() && self.data[next] == b'\r' {
            next += 1;
        }
        if next < self.data.len() && self.data[next] == b'\n' {
            next += 1;
        }
        self.pos = next;
        Some((line, start))
    }
}

/// Splices continuation lines onto `first` when it ends (after trimming
/// trailing whitespace) in a bare `\`. String-value lines never end this
/// way — their closing quote is always the last non-whitespace byte — so
/// this only ever fires for hex payloads, matching spec guidance that
/// continuation is purely a hex-payload concept.
fn splice_continuations<'a>(lines: &mut Lines<'a>, first: &'a [u8]) -> Cow<'a, [u8]> {
    if trim_ascii_end(first).last() != Some(&b'\\') {
        return Cow::Borrowed(first);
    }
    let mut buf = first.to_vec();
    loop {
        match lines.next() {
            Some((next, _)) => {
                buf.extend_from_slice(next);
                if trim_ascii_end(next).last() != Some(&b'\\') {
                    break;
                }
            }
            None => break,
        }
    }
    Cow::Owned(buf)
}

fn parse_section(
    line: &[u8],
    offset: usize,
    config: &ParserConfig,
    ops: &mut Vec<EditOp>,
    seen: &mut HashSet<String>,
) -> Result<Option<String>> {
    if line.last() != Some(&b']') {
        return Err(HiveError::MalformedSection {
            offset,
            excerpt: HiveError::excerpt(line),
        });
    }
    let inner = &line[1..line.len() - 1];
    let (delete, raw_path) = match inner.first() {
        Some(b'-') => (true, &inner[1..]),
        _ => (false, inner),
    };
    let raw_path = std::str::from_utf8(raw_path).map_err(|_| HiveError::MalformedSection {
        offset,
        excerpt: HiveError::excerpt(line),
    })?;
    let path = strip_prefix(raw_path, config)?;

    if delete {
        ops.push(EditOp::DeleteKey {
            path,
            recursive: true,
        });
        Ok(None)
    } else {
        if seen.insert(path.clone()) {
            ops.push(EditOp::CreateKey { path: path.clone() });
        }
        Ok(Some(path))
    }
}

fn expand_root_alias(path: &str) -> String {
    let (head, rest) = match path.find('\\') {
        Some(idx) => (&path[..idx], &path[idx..]),
        None => (path, ""),
    };
    for (alias, full) in ROOT_ALIASES {
        if head.eq_ignore_ascii_case(alias) {
            return format!("{full}{rest}");
        }
    }
    path.to_string()
}

fn strip_prefix(raw_path: &str, config: &ParserConfig) -> Result<String> {
    let expanded = expand_root_alias(raw_path);
    let stripped = if let Some(prefix) = &config.prefix {
        let prefix_expanded = expand_root_alias(prefix);
        if starts_with_ignore_case(&expanded, &prefix_expanded) {
            expanded[prefix_expanded.len()..].to_string()
        } else {
            return Err(HiveError::InvalidArgument(format!(
                "path '{raw_path}' does not start with configured prefix '{prefix}'"
            )));
        }
    } else if config.auto_prefix {
        match AUTO_PREFIXES.iter().find(|p| starts_with_ignore_case(&expanded, p)) {
            Some(found) => expanded[found.len()..].to_string(),
            None => expanded,
        }
    } else {
        match expanded.find('\\') {
            Some(idx) => expanded[idx..].to_string(),
            None => String::new(),
        }
    };
    Ok(stripped.trim_start_matches('\\').to_string())
}

fn starts_with_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.len() >= needle.len() && haystack[..needle.len()].eq_ignore_ascii_case(needle)
}

fn parse_value_line<'a>(line: &'a [u8], offset: usize, section: &str, lines: &mut Lines<'a>) -> Result<EditOp> {
    let logical = splice_continuations(lines, line);
    let logical: &[u8] = &logical;

    let (name, payload) = if logical.first() == Some(&b'@') {
        let rest = trim_ascii_start(&logical[1..]);
        if rest.first() != Some(&b'=') {
            return Err(HiveError::MalformedSection {
                offset,
                excerpt: HiveError::excerpt(logical),
            });
        }
        (String::new(), trim_ascii_start(&rest[1..]))
    } else if logical.first() == Some(&b'"') {
        let (name, rest) = parse_quoted(logical, offset)?;
        let rest = trim_ascii_start(rest);
        if rest.first() != Some(&b'=') {
            return Err(HiveError::MalformedSection {
                offset,
                excerpt: HiveError::excerpt(logical),
            });
        }
        (name, trim_ascii_start(&rest[1..]))
    } else {
        return Err(HiveError::MalformedSection {
            offset,
            excerpt: HiveError::excerpt(logical),
        });
    };

    parse_value_payload(name, payload, section, offset)
}

/// Unescapes a quoted `"..."` string starting at `data[0] == '"'`,
/// returning the decoded text and the slice immediately after the
/// closing quote. Backslash-escapes only `\\` and `\"`; a quote is only
/// the closing delimiter when an even number of backslashes precede it.
fn parse_quoted(data: &[u8], offset: usize) -> Result<(String, &[u8])> {
    let body = &data[1..];
    if !body.contains(&b'\\') {
        return match body.iter().position(|&b| b == b'"') {
            Some(end) => {
                let name = std::str::from_utf8(&body[..end])
                    .map_err(|_| unterminated(offset, data))?
                    .to_string();
                Ok((name, &body[end + 1..]))
            }
            None => Err(unterminated(offset, data)),
        };
    }

    let mut raw = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        match body[i] {
            b'"' => {
                let name = String::from_utf8(raw).map_err(|_| unterminated(offset, data))?;
                return Ok((name, &body[i + 1..]));
            }
            b'\\' if i + 1 < body.len() && matches!(body[i + 1], b'\\' | b'"') => {
                raw.push(body[i + 1]);
                i += 2;
            }
            b => {
                raw.push(b);
                i += 1;
            }
        }
    }
    Err(unterminated(offset, data))
}

fn unterminated(offset: usize, data: &[u8]) -> HiveError {
    HiveError::UnterminatedString {
        offset,
        excerpt: HiveError::excerpt(data),
    }
}

fn parse_value_payload(name: String, payload: &[u8], section: &str, offset: usize) -> Result<EditOp> {
    let payload = trim_ascii(payload);
    if payload == b"-" {
        return Ok(EditOp::DeleteValue {
            path: section.to_string(),
            name,
        });
    }
    if payload.first() == Some(&b'"') {
        let (value, _) = parse_quoted(payload, offset)?;
        let data = crate::utils::encode_utf16le(&value, true);
        return Ok(EditOp::SetValue {
            path: section.to_string(),
            name,
            value_type: ValueType::String,
            data,
        });
    }
    if let Some(rest) = strip_ci_prefix(payload, b"dword:") {
        let hex = std::str::from_utf8(rest).map_err(|_| unsupported_form(offset, payload))?;
        if hex.len() != 8 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(unsupported_form(offset, payload));
        }
        let value = u32::from_str_radix(hex, 16).map_err(|_| unsupported_form(offset, payload))?;
        return Ok(EditOp::SetValue {
            path: section.to_string(),
            name,
            value_type: ValueType::Dword,
            data: value.to_le_bytes().to_vec(),
        });
    }
    if let Some(rest) = strip_ci_prefix(payload, b"hex(") {
        let close = rest.iter().position(|&b| b == b')').ok_or_else(|| unsupported_form(offset, payload))?;
        let type_hex = std::str::from_utf8(&rest[..close]).map_err(|_| unsupported_form(offset, payload))?;
        let type_tag = u32::from_str_radix(type_hex, 16).map_err(|_| unsupported_form(offset, payload))?;
        let after = rest[close + 1..]
            .strip_prefix(b":")
            .ok_or_else(|| unsupported_form(offset, payload))?;
        let data = parse_hex_bytes(after, offset)?;
        return Ok(EditOp::SetValue {
            path: section.to_string(),
            name,
            value_type: ValueType::from_u32(type_tag),
            data,
        });
    }
    if let Some(rest) = strip_ci_prefix(payload, b"hex:") {
        let data = parse_hex_bytes(rest, offset)?;
        return Ok(EditOp::SetValue {
            path: section.to_string(),
            name,
            value_type: ValueType::Binary,
            data,
        });
    }
    Err(unsupported_form(offset, payload))
}

fn unsupported_form(offset: usize, payload: &[u8]) -> HiveError {
    HiveError::UnsupportedValueForm {
        offset,
        excerpt: HiveError::excerpt(payload),
    }
}

fn strip_ci_prefix<'a>(data: &'a [u8], prefix: &[u8]) -> Option<&'a [u8]> {
    if data.len() >= prefix.len() && data[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&data[prefix.len()..])
    } else {
        None
    }
}

/// Scans a hex payload, skipping separators and the continuation marker,
/// pairing two hex digits per byte; a trailing lone digit is zero-padded.
fn parse_hex_bytes(data: &[u8], offset: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() / 3 + 1);
    let mut high_nibble: Option<u8> = None;
    for &b in data {
        match b {
            b' ' | b'\t' | b',' | b'\\' | b'\r' | b'\n' => continue,
            b'0'..=b'9' | b'a'..=b'f' | b'A'..=b'F' => {
                let value = hex_nibble(b);
                match high_nibble.take() {
                    Some(hi) => out.push((hi << 4) | value),
                    None => high_nibble = Some(value),
                }
            }
            _ => {
                return Err(HiveError::corrupt(format!(
                    "invalid hex byte {b:#x} at offset {offset:#x}"
                )))
            }
        }
    }
    if let Some(hi) = high_nibble {
        out.push(hi << 4);
    }
    Ok(out)
}

fn hex_nibble(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        b'A'..=b'F' => b - b'A' + 10,
        _ => unreachable!("caller already matched a hex digit"),
    }
}

fn decode_input(input: &[u8], encoding: InputEncoding) -> Result<Cow<[u8]>> {
    match encoding {
        InputEncoding::Utf16Le => Ok(Cow::Owned(utf16le_to_utf8(strip_utf16_bom(input))?)),
        InputEncoding::Utf8 => Ok(Cow::Borrowed(strip_utf8_bom(input))),
        InputEncoding::Auto => {
            if input.starts_with(&[0xFF, 0xFE]) {
                Ok(Cow::Owned(utf16le_to_utf8(&input[2..])?))
            } else if input.starts_with(&[0xEF, 0xBB, 0xBF]) {
                Ok(Cow::Borrowed(&input[3..]))
            } else {
                Ok(Cow::Borrowed(input))
            }
        }
    }
}

fn strip_utf16_bom(data: &[u8]) -> &[u8] {
    if data.starts_with(&[0xFF, 0xFE]) {
        &data[2..]
    } else {
        data
    }
}

fn strip_utf8_bom(data: &[u8]) -> &[u8] {
    if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
        &data[3..]
    } else {
        data
    }
}

fn utf16le_to_utf8(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() % 2 != 0 {
        return Err(HiveError::UnsupportedEncoding(
            "odd-length UTF-16LE .reg input".into(),
        ));
    }
    let (decoded, _enc, had_errors) = UTF_16LE.decode(data);
    if had_errors {
        return Err(HiveError::UnsupportedEncoding(
            "invalid UTF-16LE .reg input".into(),
        ));
    }
    Ok(decoded.into_owned().into_bytes())
}

fn trim_ascii(data: &[u8]) -> &[u8] {
    trim_ascii_end(trim_ascii_start(data))
}

fn trim_ascii_start(data: &[u8]) -> &[u8] {
    let start = data.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(data.len());
    &data[start..]
}

fn trim_ascii_end(data: &[u8]) -> &[u8] {
    let end = data
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|i| i + 1)
        .unwrap_or(0);
    &data[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cfg() -> ParserConfig {
        ParserConfig::default()
    }

    fn escape(name: &str) -> String {
        let mut out = String::with_capacity(name.len());
        for ch in name.chars() {
            match ch {
                '\\' => out.push_str("\\\\"),
                '"' => out.push_str("\\\""),
                other => out.push(other),
            }
        }
        out
    }

    proptest! {
        #[test]
        fn escape_then_parse_quoted_round_trips(s in "[^\0]{0,40}") {
            let escaped = escape(&s);
            let quoted = format!("\"{escaped}\"");
            let (decoded, rest) = parse_quoted(quoted.as_bytes(), 0).unwrap();
            prop_assert_eq!(decoded, s);
            prop_assert!(rest.is_empty());
        }
    }

    #[test]
    fn rejects_missing_header_by_default() {
        let input = b"[HKEY_LOCAL_MACHINE\\Software]\r\n";
        assert!(matches!(parse(input, &cfg()).unwrap_err(), HiveError::MissingHeader));
    }

    #[test]
    fn allows_missing_header_when_configured() {
        let input = b"[HKEY_LOCAL_MACHINE\\Software]\r\n";
        let mut config = cfg();
        config.allow_missing_header = true;
        let ops = parse(input, &config).unwrap();
        assert_eq!(ops, vec![EditOp::CreateKey { path: "Software".into() }]);
    }

    #[test]
    fn parses_section_and_string_value() {
        let input = b"Windows Registry Editor Version 5.00\r\n\r\n\
[HKEY_LOCAL_MACHINE\\Software\\Widget]\r\n\
\"Name\"=\"Acme\"\r\n\
@=\"default text\"\r\n";
        let ops = parse(input, &cfg()).unwrap();
        assert_eq!(
            ops,
            vec![
                EditOp::CreateKey { path: "Software\\Widget".into() },
                EditOp::SetValue {
                    path: "Software\\Widget".into(),
                    name: "Name".into(),
                    value_type: ValueType::String,
                    data: crate::utils::encode_utf16le("Acme", true),
                },
                EditOp::SetValue {
                    path: "Software\\Widget".into(),
                    name: String::new(),
                    value_type: ValueType::String,
                    data: crate::utils::encode_utf16le("default text", true),
                },
            ]
        );
    }

    #[test]
    fn parses_dword_and_hex_and_hex_n() {
        let input = b"Windows Registry Editor Version 5.00\r\n\r\n\
[HKEY_LOCAL_MACHINE\\Software\\Widget]\r\n\
\"Count\"=dword:0000002a\r\n\
\"Blob\"=hex:01,02,03\r\n\
\"Big\"=hex(b):01,00,00,00,00,00,00,00\r\n";
        let ops = parse(input, &cfg()).unwrap();
        assert_eq!(
            ops[1],
            EditOp::SetValue {
                path: "Software\\Widget".into(),
                name: "Count".into(),
                value_type: ValueType::Dword,
                data: vec![0x2a, 0, 0, 0],
            }
        );
        assert_eq!(
            ops[2],
            EditOp::SetValue {
                path: "Software\\Widget".into(),
                name: "Blob".into(),
                value_type: ValueType::Binary,
                data: vec![1, 2, 3],
            }
        );
        assert_eq!(
            ops[3],
            EditOp::SetValue {
                path: "Software\\Widget".into(),
                name: "Big".into(),
                value_type: ValueType::Qword,
                data: vec![1, 0, 0, 0, 0, 0, 0, 0],
            }
        );
    }

    #[test]
    fn hex_continuation_line_splices_onto_payload() {
        let input = b"Windows Registry Editor Version 5.00\r\n\r\n\
[HKEY_LOCAL_MACHINE\\Software\\Widget]\r\n\
\"Blob\"=hex:01,02,03,\\\r\n  04,05\r\n";
        let ops = parse(input, &cfg()).unwrap();
        assert_eq!(
            ops[1],
            EditOp::SetValue {
                path: "Software\\Widget".into(),
                name: "Blob".into(),
                value_type: ValueType::Binary,
                data: vec![1, 2, 3, 4, 5],
            }
        );
    }

    #[test]
    fn delete_key_section_resets_current_section() {
        let input = b"Windows Registry Editor Version 5.00\r\n\r\n\
[-HKEY_LOCAL_MACHINE\\Software\\Widget]\r\n\
\"Name\"=\"Acme\"\r\n";
        let err = parse(input, &cfg()).unwrap_err();
        assert!(matches!(err, HiveError::MalformedSection { .. }));
    }

    #[test]
    fn delete_value_line_is_recognized() {
        let input = b"Windows Registry Editor Version 5.00\r\n\r\n\
[HKEY_LOCAL_MACHINE\\Software\\Widget]\r\n\
\"Name\"=-\r\n";
        let ops = parse(input, &cfg()).unwrap();
        assert_eq!(
            ops[1],
            EditOp::DeleteValue {
                path: "Software\\Widget".into(),
                name: "Name".into(),
            }
        );
    }

    #[test]
    fn repeated_section_does_not_duplicate_create_key() {
        let input = b"Windows Registry Editor Version 5.00\r\n\r\n\
[HKEY_LOCAL_MACHINE\\Software\\Widget]\r\n\
\"A\"=dword:00000001\r\n\
[HKEY_LOCAL_MACHINE\\Software\\Widget]\r\n\
\"B\"=dword:00000002\r\n";
        let ops = parse(input, &cfg()).unwrap();
        let creates = ops.iter().filter(|op| matches!(op, EditOp::CreateKey { .. })).count();
        assert_eq!(creates, 1);
    }

    #[test]
    fn hklm_alias_expands_and_strips_auto_prefix() {
        let input = b"Windows Registry Editor Version 5.00\r\n\r\n[HKLM\\SOFTWARE\\Widget]\r\n";
        let mut config = cfg();
        config.auto_prefix = true;
        let ops = parse(input, &config).unwrap();
        assert_eq!(ops, vec![EditOp::CreateKey { path: "Widget".into() }]);
    }

    #[test]
    fn configured_prefix_mismatch_is_an_error() {
        let input = b"Windows Registry Editor Version 5.00\r\n\r\n[HKLM\\SOFTWARE\\Widget]\r\n";
        let mut config = cfg();
        config.prefix = Some("HKEY_CURRENT_USER".into());
        assert!(parse(input, &config).is_err());
    }

    #[test]
    fn escaped_quote_and_backslash_in_name_round_trip() {
        let input = b"Windows Registry Editor Version 5.00\r\n\r\n\
[HKEY_LOCAL_MACHINE\\Software\\Widget]\r\n\
\"C:\\\\Program Files\\\\Acme\"=\"literal \\\"quote\\\"\"\r\n";
        let ops = parse(input, &cfg()).unwrap();
        match &ops[1] {
            EditOp::SetValue { name, .. } => assert_eq!(name, "C:\\Program Files\\Acme"),
            other => panic!("unexpected op: {other:?}"),
        }
    }

    #[test]
    fn comment_and_blank_lines_are_skipped() {
        let input = b"Windows Registry Editor Version 5.00\r\n\
; a comment\r\n\
\r\n\
[HKEY_LOCAL_MACHINE\\Software\\Widget]\r\n\
; another comment\r\n\
\"A\"=dword:00000001\r\n";
        let ops = parse(input, &cfg()).unwrap();
        assert_eq!(ops.len(), 2);
    }
}
