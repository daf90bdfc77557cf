//! Configuration knobs for [`super::parser::parse`] and [`super::exporter::export`].

/// How to interpret the raw bytes handed to [`super::parser::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputEncoding {
    /// Sniff a BOM (UTF-16LE or UTF-8); fall back to UTF-8 if neither is present.
    #[default]
    Auto,
    /// Treat the buffer as UTF-8, stripping a BOM if present.
    Utf8,
    /// Treat the buffer as UTF-16LE, stripping a BOM if present.
    Utf16Le,
}

/// Parser options (spec'd as the `.reg` parser's "Configuration" table).
#[derive(Debug, Clone, Default)]
pub struct ParserConfig {
    pub input_encoding: InputEncoding,
    /// Tolerate `.reg` input missing the `Windows Registry Editor Version
    /// 5.00` header line.
    pub allow_missing_header: bool,
    /// A literal prefix to strip from every key path, after root-alias
    /// expansion. A path that doesn't start with it is a parse error.
    pub prefix: Option<String>,
    /// Try the standard `HKLM\SOFTWARE`/`HKLM\SYSTEM`/... prefix table,
    /// stripping the first one that matches. Ignored if `prefix` is set.
    pub auto_prefix: bool,
}

/// Byte encoding for [`super::exporter::export`]'s output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputEncoding {
    #[default]
    Utf8,
    Utf16Le,
}

/// Exporter options.
#[derive(Debug, Clone, Default)]
pub struct ExporterConfig {
    pub output_encoding: OutputEncoding,
    /// Emit a UTF-16LE BOM. Ignored when `output_encoding` is `Utf8`.
    pub with_bom: bool,
}
