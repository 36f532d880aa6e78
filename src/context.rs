//! On-disk layout of the file-backed ledger.
//!
//! Every process that shares a ledger resolves the same directory tree from
//! the configured `ledger_dir`:
//!
//! ```text
//! {ledger_dir}/
//!   positions/   one JSON document per position
//!   samples/     one JSON document per sample
//!   devices/     one JSON document per device
//!   locks/       create_new lock files (named sections, per-document locks)
//!   events/      events.ndjson audit log
//! ```
//!
//! Document keys may contain `/` (position paths), so file names are the
//! percent-encoded key plus `.json`.

use crate::error::{LabError, Result};
use crate::store::Collection;
use std::fs;
use std::path::{Path, PathBuf};

/// Extension of every document file.
pub const DOCUMENT_EXTENSION: &str = "json";

/// Extension of every lock file.
pub const LOCK_EXTENSION: &str = "lock";

/// Resolved paths for one ledger. All paths are rooted at `root`.
#[derive(Debug, Clone)]
pub struct LedgerContext {
    /// Root directory of the ledger.
    pub root: PathBuf,

    /// Directory holding the lock files.
    pub locks_dir: PathBuf,

    /// Directory holding the audit log.
    pub events_dir: PathBuf,
}

impl LedgerContext {
    /// Resolve the ledger layout below `root`. Nothing is created on disk.
    pub fn resolve_from<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            locks_dir: root.join("locks"),
            events_dir: root.join("events"),
            root,
        }
    }

    /// Create every directory of the layout that does not exist yet.
    pub fn ensure_layout(&self) -> Result<()> {
        let dirs = [
            self.collection_dir(Collection::Positions),
            self.collection_dir(Collection::Samples),
            self.collection_dir(Collection::Devices),
            self.locks_dir.clone(),
            self.events_dir.clone(),
        ];
        for dir in dirs {
            fs::create_dir_all(&dir).map_err(|e| {
                LabError::Store(format!(
                    "failed to create ledger directory '{}': {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Directory of one collection.
    pub fn collection_dir(&self, collection: Collection) -> PathBuf {
        self.root.join(collection.as_str())
    }

    /// Path of the document stored under `key`.
    pub fn document_path(&self, collection: Collection, key: &str) -> PathBuf {
        self.collection_dir(collection)
            .join(format!("{}.{}", encode_key(key), DOCUMENT_EXTENSION))
    }

    /// Path of the named lock file.
    pub fn lock_path(&self, name: &str) -> PathBuf {
        self.locks_dir
            .join(format!("{}.{}", encode_key(name), LOCK_EXTENSION))
    }

    /// Path of the NDJSON audit log.
    pub fn events_file(&self) -> PathBuf {
        self.events_dir.join("events.ndjson")
    }
}

/// Encode a document key as a single file-name component.
pub fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '\\' => out.push_str("%5C"),
            ':' => out.push_str("%3A"),
            _ => out.push(c),
        }
    }
    out
}

/// Invert [`encode_key`]. Returns `None` for names this crate never writes.
pub fn decode_key(encoded: &str) -> Option<String> {
    let mut out = String::with_capacity(encoded.len());
    let mut rest = encoded;
    while let Some(idx) = rest.find('%') {
        out.push_str(&rest[..idx]);
        let code = rest.get(idx + 1..idx + 3)?;
        let decoded = match code {
            "25" => '%',
            "2F" => '/',
            "5C" => '\\',
            "3A" => ':',
            _ => return None,
        };
        out.push(decoded);
        rest = &rest[idx + 3..];
    }
    out.push_str(rest);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_layout() {
        let ctx = LedgerContext::resolve_from("/srv/ledger");

        assert_eq!(ctx.root, PathBuf::from("/srv/ledger"));
        assert_eq!(ctx.locks_dir, PathBuf::from("/srv/ledger/locks"));
        assert_eq!(
            ctx.collection_dir(Collection::Positions),
            PathBuf::from("/srv/ledger/positions")
        );
        assert_eq!(
            ctx.events_file(),
            PathBuf::from("/srv/ledger/events/events.ndjson")
        );
    }

    #[test]
    fn test_ensure_layout_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = LedgerContext::resolve_from(temp_dir.path().join("ledger"));

        ctx.ensure_layout().unwrap();
        // Second call is a no-op.
        ctx.ensure_layout().unwrap();

        assert!(ctx.collection_dir(Collection::Samples).is_dir());
        assert!(ctx.collection_dir(Collection::Devices).is_dir());
        assert!(ctx.locks_dir.is_dir());
        assert!(ctx.events_dir.is_dir());
    }

    #[test]
    fn test_document_path_encodes_separators() {
        let ctx = LedgerContext::resolve_from("/l");
        let path = ctx.document_path(Collection::Positions, "furnace_1/tray/2");

        assert_eq!(
            path,
            PathBuf::from("/l/positions/furnace_1%2Ftray%2F2.json")
        );
    }

    #[test]
    fn test_key_encoding_roundtrip() {
        for key in ["A1", "oven/tray/1", "50%/mix", "a:b\\c", ""] {
            let encoded = encode_key(key);
            assert!(!encoded.contains('/'));
            assert_eq!(decode_key(&encoded).as_deref(), Some(key));
        }
    }

    #[test]
    fn test_decode_rejects_foreign_escapes() {
        assert_eq!(decode_key("bad%zz"), None);
        assert_eq!(decode_key("trailing%2"), None);
    }
}
