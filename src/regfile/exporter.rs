//! `.reg` text exporter: walks a [`Hive`] subtree directly (not an
//! [`crate::ast::Tree`] — export is read-only and never needs the AST's
//! mutation/dirty-tracking machinery) and renders it as Windows
//! Registry Editor 5.00 text.

use crate::cell::value::ValueData;
use crate::cell::ValueType;
use crate::error::Result;
use crate::hive::{Hive, NodeId};
use crate::regfile::config::{ExporterConfig, OutputEncoding};
use std::fmt::Write as _;
use tracing::{debug, trace};

const HEADER_LINE: &str = "Windows Registry Editor Version 5.00";

/// Hex payloads wrap after this many bytes per line, matching the
/// Windows Registry Editor's own export width.
const HEX_LINE_WIDTH: usize = 25;

/// Renders `hive`'s subtree rooted at `root` as `.reg` text. `root_path`
/// is the fully-expanded path (e.g. `HKEY_LOCAL_MACHINE\Software`) used
/// for `root`'s own `[...]` line; descendants append their name to it.
pub fn export(hive: &Hive, root: NodeId, root_path: &str, config: &ExporterConfig) -> Result<Vec<u8>> {
    debug!(root_path, "exporting hive subtree to .reg text");
    let mut out = String::with_capacity(4096);
    out.push_str(HEADER_LINE);
    out.push_str("\r\n\r\n");
    write_key(hive, root, root_path, &mut out)?;
    trace!(len = out.len(), "export complete");
    Ok(encode_output(&out, config))
}

fn write_key(hive: &Hive, id: NodeId, path: &str, out: &mut String) -> Result<()> {
    out.push('[');
    out.push_str(path);
    out.push_str("]\r\n");

    let mut values = hive.values(id)?;
    values.sort_by(|a, b| {
        let stat_a = hive.stat_value(*a);
        let stat_b = hive.stat_value(*b);
        match (stat_a, stat_b) {
            (Ok(a), Ok(b)) => value_sort_key(&a.name).cmp(&value_sort_key(&b.name)),
            _ => std::cmp::Ordering::Equal,
        }
    });
    for value_id in values {
        let stat = hive.stat_value(value_id)?;
        let data = hive.value_data(value_id)?;
        write_value_line(&stat.name, stat.data_type, &data, out);
    }
    out.push_str("\r\n");

    let mut children: Vec<(String, NodeId)> = hive
        .subkeys(id)?
        .into_iter()
        .map(|child| hive.stat_key(child).map(|stat| (stat.name, child)))
        .collect::<Result<_>>()?;
    children.sort_by(|a, b| a.0.to_ascii_lowercase().cmp(&b.0.to_ascii_lowercase()));

    for (name, child) in children {
        let child_path = format!("{path}\\{name}");
        write_key(hive, child, &child_path, out)?;
    }
    Ok(())
}

/// Default value sorts first; everything else alphabetically, case-insensitive.
fn value_sort_key(name: &str) -> (bool, String) {
    (!name.is_empty(), name.to_ascii_lowercase())
}

fn write_value_line(name: &str, data_type: ValueType, data: &ValueData, out: &mut String) {
    if name.is_empty() {
        out.push('@');
    } else {
        out.push('"');
        escape_name(name, out);
        out.push('"');
    }
    out.push('=');
    write_payload(data_type, data, out);
    out.push_str("\r\n");
}

fn escape_name(name: &str, out: &mut String) {
    for ch in name.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            other => out.push(other),
        }
    }
}

fn write_payload(data_type: ValueType, data: &ValueData, out: &mut String) {
    match data {
        ValueData::String(s) => {
            out.push('"');
            escape_name(s, out);
            out.push('"');
        }
        ValueData::Dword(d) => {
            let _ = write!(out, "dword:{d:08x}");
        }
        ValueData::Binary(bytes) => write_hex_payload(None, bytes, out),
        _ => write_hex_payload(Some(data_type.to_u32()), &data.encode(), out),
    }
}

/// Writes `hex:<bytes>` (no type tag) or `hex(N):<bytes>`, wrapping at
/// [`HEX_LINE_WIDTH`] bytes per line with a trailing `\` continuation.
fn write_hex_payload(type_tag: Option<u32>, bytes: &[u8], out: &mut String) {
    match type_tag {
        Some(tag) => {
            let _ = write!(out, "hex({tag:x}):");
        }
        None => out.push_str("hex:"),
    }
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if i > 0 && i % HEX_LINE_WIDTH == 0 {
            out.push_str("\\\r\n  ");
        }
        let _ = write!(out, "{byte:02x}");
    }
}

fn encode_output(text: &str, config: &ExporterConfig) -> Vec<u8> {
    match config.output_encoding {
        OutputEncoding::Utf8 => text.as_bytes().to_vec(),
        OutputEncoding::Utf16Le => {
            let mut out = Vec::with_capacity(text.len() * 2 + 2);
            if config.with_bom {
                out.extend_from_slice(&[0xFF, 0xFE]);
            }
            out.extend_from_slice(&crate::utils::encode_utf16le(text, false));
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Tree;
    use crate::editop::{apply_all, EditOp};
    use crate::hive::OpenMode;
    use crate::serializer::serialize_full;

    fn build_hive() -> Hive {
        let mut tree = Tree::new_empty();
        let ops = vec![
            EditOp::CreateKey {
                path: "Software\\Widget".into(),
            },
            EditOp::SetValue {
                path: "Software\\Widget".into(),
                name: String::new(),
                value_type: ValueType::String,
                data: crate::utils::encode_utf16le("default text", true),
            },
            EditOp::SetValue {
                path: "Software\\Widget".into(),
                name: "Count".into(),
                value_type: ValueType::Dword,
                data: vec![0x2a, 0, 0, 0],
            },
            EditOp::SetValue {
                path: "Software\\Widget".into(),
                name: "Blob".into(),
                value_type: ValueType::Binary,
                data: (0..30u8).collect(),
            },
            EditOp::CreateKey {
                path: "Software\\Widget\\Alpha".into(),
            },
            EditOp::CreateKey {
                path: "Software\\Widget\\beta".into(),
            },
        ];
        apply_all(&mut tree, &ops).unwrap();
        let bytes = serialize_full(&mut tree, 0).unwrap();
        Hive::from_bytes(bytes, OpenMode::Strict).unwrap()
    }

    #[test]
    fn exports_header_and_values() {
        let hive = build_hive();
        let root = hive.root().unwrap();
        let widget = hive.get_child(root, "Software").unwrap();
        let widget = hive.get_child(widget, "Widget").unwrap();
        let bytes = export(&hive, widget, "HKEY_LOCAL_MACHINE\\Software\\Widget", &ExporterConfig::default()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("Windows Registry Editor Version 5.00\r\n\r\n"));
        assert!(text.contains("[HKEY_LOCAL_MACHINE\\Software\\Widget]\r\n"));
        assert!(text.contains("@=\"default text\"\r\n"));
        assert!(text.contains("\"Count\"=dword:0000002a\r\n"));
    }

    #[test]
    fn default_value_sorts_before_named_values() {
        let hive = build_hive();
        let root = hive.root().unwrap();
        let widget = hive.get_child(root, "Software").unwrap();
        let widget = hive.get_child(widget, "Widget").unwrap();
        let bytes = export(&hive, widget, "Software\\Widget", &ExporterConfig::default()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let default_pos = text.find("@=").unwrap();
        let count_pos = text.find("\"Count\"").unwrap();
        assert!(default_pos < count_pos);
    }

    #[test]
    fn children_sort_case_insensitively() {
        let hive = build_hive();
        let root = hive.root().unwrap();
        let widget = hive.get_child(root, "Software").unwrap();
        let widget = hive.get_child(widget, "Widget").unwrap();
        let bytes = export(&hive, widget, "Software\\Widget", &ExporterConfig::default()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let alpha_pos = text.find("Alpha]").unwrap();
        let beta_pos = text.find("beta]").unwrap();
        assert!(alpha_pos < beta_pos);
    }

    #[test]
    fn long_binary_value_wraps_at_line_width() {
        let hive = build_hive();
        let root = hive.root().unwrap();
        let widget = hive.get_child(root, "Software").unwrap();
        let widget = hive.get_child(widget, "Widget").unwrap();
        let bytes = export(&hive, widget, "Software\\Widget", &ExporterConfig::default()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"Blob\"=hex:"));
        assert!(text.contains("\\\r\n  "));
    }

    #[test]
    fn utf16le_output_with_bom_round_trips_through_parser() {
        let hive = build_hive();
        let root = hive.root().unwrap();
        let mut config = ExporterConfig::default();
        config.output_encoding = OutputEncoding::Utf16Le;
        config.with_bom = true;
        let bytes = export(&hive, root, "", &config).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xFE]);

        let ops = crate::regfile::parser::parse(&bytes, &crate::regfile::config::ParserConfig::default()).unwrap();
        assert!(ops.iter().any(|op| matches!(op, EditOp::CreateKey { path } if path == "Software\\Widget\\Alpha")));
    }
}
