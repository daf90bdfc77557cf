//! # HiveKit
//!
//! A library for reading, mutating, and rewriting Windows Registry hive
//! files (the `regf` binary format), with a companion pipeline for
//! interoperating with the Windows `.reg` text export format.
//!
//! ## Architecture
//!
//! The crate is built in layers, each addressable on its own:
//!
//! 1. **Base Block ([`header`])**: the 4KB header — signature, version,
//!    root key offset, checksum.
//! 2. **Hive Bins ([`hbin`])**: 4KB-aligned blocks containing cells.
//! 3. **Cells ([`cell`])**: the variable-sized records inside a bin —
//!    key nodes (`nk`), value keys (`vk`), subkey lists (`lf`/`lh`/`li`/
//!    `ri`), security descriptors (`sk`), and big-data blocks (`db`).
//! 4. **Reader ([`hive`])**: resolves cell offsets into key/value trees
//!    over a memory-mapped or in-memory buffer, read-only and zero-copy.
//! 5. **Mutable tree ([`ast`])**: a lazily-materialized, copy-on-write
//!    overlay of a [`hive::Hive`] (or a tree built from scratch) that
//!    supports creating/deleting keys and values.
//! 6. **Edit operations ([`editop`])**: the flat vocabulary the `.reg`
//!    parser and any other caller use to describe a batch of mutations.
//! 7. **Serializer ([`serializer`])**: writes an [`ast::Tree`] back out
//!    as `regf` bytes, either as a full rewrite or — given the
//!    originating hive — an incremental rewrite that reuses the cell
//!    offsets of every untouched subtree.
//! 8. **`.reg` pipeline ([`regfile`])**: parses Windows Registry Editor
//!    text into [`editop::EditOp`]s, and exports a [`hive::Hive`]
//!    subtree back out as `.reg` text.
//!
//! ## Binary layout
//!
//! ```text
//! [Base Block - 4KB]
//!   - Signature: "regf"
//!   - Version, timestamps, root offset
//!   - Checksum
//!
//! [Hive Bins - variable size, 4KB aligned]
//!   [Hbin Header - 32 bytes]
//!     - Signature: "hbin"
//!     - Offset, size
//!
//!   [Cells - variable size]
//!     [Cell Size - 4 bytes, negative if allocated]
//!     [Cell Data]
//!       - Key nodes (nk)
//!       - Value keys (vk)
//!       - Subkey lists (lf/lh/li/ri)
//!       - Security descriptors (sk)
//! ```
//!
//! ## Reading a hive
//!
//! ```no_run
//! use hivekit::{Hive, OpenMode};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let hive = Hive::open("SOFTWARE", OpenMode::Strict)?;
//! let root = hive.root()?;
//!
//! for child in hive.subkeys(root)? {
//!     println!("{}", hive.stat_key(child)?.name);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Mutating and rewriting
//!
//! ```no_run
//! use hivekit::{ast::Tree, editop::EditOp, serializer};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut tree = Tree::new_empty();
//! tree.create_key("Software\\Widget")?;
//! let bytes = serializer::serialize_full(&mut tree, 0)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Importing and exporting `.reg` text
//!
//! ```no_run
//! use hivekit::regfile::{self, ParserConfig};
//! use hivekit::{ast::Tree, editop};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let text = b"Windows Registry Editor Version 5.00\r\n\r\n[HKEY_LOCAL_MACHINE\\Software\\Widget]\r\n\"Count\"=dword:0000002a\r\n";
//! let ops = regfile::parse(text, &ParserConfig::default())?;
//! let mut tree = Tree::new_empty();
//! editop::apply_all(&mut tree, &ops)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Supported features
//!
//! - Full hive parsing and mutation (`SYSTEM`, `SOFTWARE`, `SAM`,
//!   `SECURITY`, `NTUSER.DAT`, etc.)
//! - All common value types (`REG_SZ`, `REG_DWORD`, `REG_BINARY`,
//!   `REG_MULTI_SZ`, `REG_QWORD`, etc.), plus unrecognized types passed
//!   through unchanged
//! - Big-data block (`db`) support for values too large for one cell
//! - Full and incremental `regf` serialization
//! - `.reg` text import and export
//!
//! ## Non-goals
//!
//! - Transaction log (`.LOG1`/`.LOG2`) replay — callers that need a
//!   fully up-to-date hive are expected to apply the logs themselves
//!   (or use a live system's in-memory view) before handing bytes here.
//! - Security descriptor *editing* — descriptors are read and preserved
//!   on untouched subtrees, but this crate doesn't construct new ones.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ast;
pub mod cell;
pub mod editop;
pub mod error;
pub mod hbin;
pub mod header;
pub mod hive;
pub mod regfile;
pub mod serializer;
pub mod utils;

pub use ast::Tree;
pub use cell::{CellType, KeyNodeFlags, ValueType};
pub use editop::EditOp;
pub use error::{HiveError, Result};
pub use hbin::HbinHeader;
pub use header::BaseBlock;
pub use hive::{Hive, KeyStat, NodeId, OpenMode, ValueId, ValueStat};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
