//! Write-only registry backend that buffers every change in memory and
//! serializes it to a registry-export text document when the service is
//! released.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use log::error;

use crate::error::RegistryError;
use crate::service::{RegistrationType, RegistryKey, RegistryService};

pub const REG_FILE_HEADER: &str = "Windows Registry Editor Version 5.00";

const HKEY_CLASSES_ROOT: &str = "HKEY_CLASSES_ROOT";
const HKEY_CURRENT_USER: &str = "HKEY_CURRENT_USER";
const HKEY_LOCAL_MACHINE: &str = "HKEY_LOCAL_MACHINE";

const BACKEND_NAME: &str = ".reg file";

/// One buffered key: the path as first written, plus its values keyed
/// case-insensitively. A `None` datum is a recorded value deletion and
/// serializes as the removal marker.
#[derive(Default)]
struct KeyRecord {
    path: String,
    values: BTreeMap<String, ValueRecord>,
}

struct ValueRecord {
    name: String,
    data: Option<String>,
}

/// Buffered tree keyed by lowercased key path. `BTreeMap` keeps both levels
/// sorted so serialization is deterministic regardless of insertion order.
type Tree = BTreeMap<String, KeyRecord>;

/// Registry service that emits a `.reg` document instead of touching the
/// live registry. Exists for the duration of one CLI invocation; the
/// buffered tree is flushed to `path` on drop, so the flush runs on every
/// exit path including unwinds.
pub struct RegFileRegistry {
    as_user: bool,
    path: PathBuf,
    tree: Rc<RefCell<Tree>>,
}

impl RegFileRegistry {
    pub fn new(as_user: bool, path: impl Into<PathBuf>) -> Self {
        Self {
            as_user,
            path: path.into(),
            tree: Rc::new(RefCell::new(Tree::new())),
        }
    }

    /// Serializes the buffered tree, or `None` when nothing was recorded.
    pub fn render(&self) -> Option<String> {
        let tree = self.tree.borrow();
        if tree.is_empty() {
            return None;
        }

        let mut out = String::new();
        out.push_str(REG_FILE_HEADER);
        out.push('\n');
        out.push('\n');
        for record in tree.values() {
            out.push('[');
            out.push_str(&record.path);
            out.push_str("]\n");
            for value in record.values.values() {
                if value.name.is_empty() {
                    out.push('@');
                } else {
                    out.push('"');
                    out.push_str(&value.name);
                    out.push('"');
                }
                out.push('=');
                match &value.data {
                    Some(data) => {
                        out.push('"');
                        out.push_str(&escape(data));
                        out.push('"');
                    }
                    None => out.push('-'),
                }
                out.push('\n');
            }
            out.push('\n');
        }
        Some(out)
    }

    fn key(&self, path: &str) -> RegFileKey {
        RegFileKey {
            tree: Rc::clone(&self.tree),
            path: path.trim_end_matches('\\').to_owned(),
        }
    }
}

impl Drop for RegFileRegistry {
    fn drop(&mut self) {
        // An entirely empty session produces no output file.
        if let Some(document) = self.render() {
            if let Err(err) = fs::write(&self.path, document) {
                error!(
                    target: "RegFileRegistry",
                    "Failed to write {}: {}",
                    self.path.display(),
                    err
                );
            }
        }
    }
}

impl fmt::Display for RegFileRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", BACKEND_NAME)
    }
}

impl RegistryService for RegFileRegistry {
    fn open_classes_root(
        &self,
        _fallback: bool,
    ) -> Result<Option<Box<dyn RegistryKey>>, RegistryError> {
        // Per-user classes are a child of the symbolic current-user root
        // rather than a separate system call.
        let root = if self.as_user {
            self.key(&format!("{}\\SOFTWARE\\Classes", HKEY_CURRENT_USER))
        } else {
            self.key(HKEY_CLASSES_ROOT)
        };
        Ok(Some(Box::new(root)))
    }

    fn open_local_machine_key(&self) -> Result<Option<Box<dyn RegistryKey>>, RegistryError> {
        if self.as_user {
            return Ok(None);
        }
        Ok(Some(Box::new(self.key(HKEY_LOCAL_MACHINE))))
    }

    fn open_root_key(&self) -> Result<Box<dyn RegistryKey>, RegistryError> {
        let root = if self.as_user {
            HKEY_CURRENT_USER
        } else {
            HKEY_LOCAL_MACHINE
        };
        Ok(Box::new(self.key(root)))
    }

    fn can_read(&self) -> bool {
        false
    }

    fn registration_type(&self) -> RegistrationType {
        RegistrationType::Os64Bit
    }
}

struct RegFileKey {
    tree: Rc<RefCell<Tree>>,
    path: String,
}

impl RegFileKey {
    fn child(&self, name: &str) -> RegFileKey {
        RegFileKey {
            tree: Rc::clone(&self.tree),
            path: format!("{}\\{}", self.path, name.trim_end_matches('\\')),
        }
    }

    /// Ensures the key has a record in the tree (so even valueless created
    /// keys serialize as a block).
    fn touch(&self) {
        let mut tree = self.tree.borrow_mut();
        let record = tree.entry(self.path.to_lowercase()).or_default();
        if record.path.is_empty() {
            record.path = self.path.clone();
        }
    }

    fn unsupported(operation: &'static str) -> RegistryError {
        RegistryError::Unsupported {
            operation,
            backend: BACKEND_NAME.to_owned(),
        }
    }
}

impl RegistryKey for RegFileKey {
    fn open_sub_key(&self, name: &str) -> Result<Option<Box<dyn RegistryKey>>, RegistryError> {
        // Nothing to probe in a write-only buffer; hand out the handle.
        Ok(Some(Box::new(self.child(name))))
    }

    fn create_sub_key(&self, name: &str) -> Result<Box<dyn RegistryKey>, RegistryError> {
        let child = self.child(name);
        child.touch();
        Ok(Box::new(child))
    }

    fn set_value(&self, name: &str, value: &str) -> Result<(), RegistryError> {
        self.record(name, Some(value.to_owned()));
        Ok(())
    }

    fn get_value(&self, _name: &str) -> Result<Option<String>, RegistryError> {
        Err(Self::unsupported("reading a value"))
    }

    fn get_sub_key_names(&self) -> Result<Vec<String>, RegistryError> {
        Ok(Vec::new())
    }

    fn get_value_names(&self) -> Result<Vec<String>, RegistryError> {
        Ok(Vec::new())
    }

    fn delete_value(&self, name: &str, _must_exist: bool) -> Result<(), RegistryError> {
        // Deletion still occupies the slot and serializes as `name=-`.
        self.record(name, None);
        Ok(())
    }

    fn delete_sub_key_tree(&self, _subpath: &str) -> Result<(), RegistryError> {
        Err(Self::unsupported("deleting a subtree"))
    }
}

impl RegFileKey {
    fn record(&self, name: &str, data: Option<String>) {
        let mut tree = self.tree.borrow_mut();
        let record = tree.entry(self.path.to_lowercase()).or_default();
        if record.path.is_empty() {
            record.path = self.path.clone();
        }
        record.values.insert(
            name.to_lowercase(),
            ValueRecord {
                name: name.to_owned(),
                data,
            },
        );
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod test {
    use super::*;

    fn scratch_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("shellreg-{}-{}.reg", tag, std::process::id()))
    }

    fn classes(registry: &RegFileRegistry) -> Box<dyn RegistryKey> {
        registry.open_classes_root(false).unwrap().unwrap()
    }

    /// Captures the serialized session and skips the drop flush, so render
    /// assertions never touch the filesystem.
    fn finish(registry: RegFileRegistry) -> String {
        let document = registry.render().unwrap();
        std::mem::forget(registry);
        document
    }

    #[test]
    fn serialization_is_deterministic_across_insertion_orders() {
        let first = RegFileRegistry::new(false, scratch_path("unused"));
        let root = classes(&first);
        let key = root
            .create_sub_key("CLSID\\{11111111-2222-3333-4444-555555555555}")
            .unwrap();
        key.set_value("Zeta", "z").unwrap();
        key.set_value("Alpha", "a").unwrap();
        key.set_value("", "default").unwrap();

        let second = RegFileRegistry::new(false, scratch_path("unused"));
        let root = classes(&second);
        let key = root
            .create_sub_key("CLSID\\{11111111-2222-3333-4444-555555555555}")
            .unwrap();
        key.set_value("", "default").unwrap();
        key.set_value("Alpha", "a").unwrap();
        key.set_value("Zeta", "z").unwrap();

        assert_eq!(finish(first), finish(second));
    }

    #[test]
    fn header_and_block_shape() {
        let registry = RegFileRegistry::new(false, scratch_path("unused"));
        let root = classes(&registry);
        let key = root.create_sub_key("txtfile\\ShellEx").unwrap();
        key.set_value("", "{11111111-2222-3333-4444-555555555555}")
            .unwrap();

        let document = finish(registry);
        let mut lines = document.lines();
        assert_eq!(lines.next(), Some(REG_FILE_HEADER));
        assert_eq!(lines.next(), Some(""));
        assert_eq!(lines.next(), Some("[HKEY_CLASSES_ROOT\\txtfile\\ShellEx]"));
        assert_eq!(
            lines.next(),
            Some("@=\"{11111111-2222-3333-4444-555555555555}\"")
        );
        assert_eq!(lines.next(), Some(""));
    }

    #[test]
    fn last_write_wins_for_a_value_name() {
        let registry = RegFileRegistry::new(false, scratch_path("unused"));
        let root = classes(&registry);
        let key = root.create_sub_key("Example").unwrap();
        key.set_value("Name", "v").unwrap();
        key.set_value("Name", "v2").unwrap();

        let document = finish(registry);
        assert_eq!(document.matches("\"Name\"").count(), 1);
        assert!(document.contains("\"Name\"=\"v2\""));
    }

    #[test]
    fn deleting_a_value_records_a_removal_marker() {
        let registry = RegFileRegistry::new(false, scratch_path("unused"));
        let root = classes(&registry);
        let key = root.create_sub_key("Example").unwrap();
        key.delete_value("Stale", false).unwrap();

        assert!(finish(registry).contains("\"Stale\"=-"));
    }

    #[test]
    fn key_paths_and_value_names_merge_case_insensitively() {
        let registry = RegFileRegistry::new(false, scratch_path("unused"));
        let root = classes(&registry);
        root.create_sub_key("Example")
            .unwrap()
            .set_value("Name", "v")
            .unwrap();
        root.create_sub_key("EXAMPLE")
            .unwrap()
            .set_value("NAME", "v2")
            .unwrap();

        let document = finish(registry);
        assert_eq!(document.matches("[HKEY_CLASSES_ROOT\\Example]").count(), 1);
        assert!(document.contains("\"Name\"=\"v2\""));
    }

    #[test]
    fn values_are_quoted_and_escaped() {
        let registry = RegFileRegistry::new(false, scratch_path("unused"));
        let root = classes(&registry);
        let key = root.create_sub_key("Example").unwrap();
        key.set_value("Path", "C:\\bin\\a \"quoted\" name").unwrap();

        assert!(finish(registry)
            .contains("\"Path\"=\"C:\\\\bin\\\\a \\\"quoted\\\" name\""));
    }

    #[test]
    fn reads_fail_or_return_empty() {
        let registry = RegFileRegistry::new(false, scratch_path("unused"));
        let root = classes(&registry);
        let key = root.create_sub_key("Example").unwrap();
        key.set_value("Name", "v").unwrap();

        assert!(matches!(
            key.get_value("Name"),
            Err(RegistryError::Unsupported { .. })
        ));
        assert!(key.get_sub_key_names().unwrap().is_empty());
        assert!(key.get_value_names().unwrap().is_empty());
        let _ = finish(registry);
    }

    #[test]
    fn subtree_deletion_is_unsupported() {
        let registry = RegFileRegistry::new(false, scratch_path("empty-tree"));
        let root = classes(&registry);
        assert!(matches!(
            root.delete_sub_key_tree("Example"),
            Err(RegistryError::Unsupported { .. })
        ));
        // Nothing was recorded; the drop flush writes no file.
    }

    #[test]
    fn user_scope_synthesizes_the_classes_overlay() {
        let registry = RegFileRegistry::new(true, scratch_path("unused"));
        let root = classes(&registry);
        root.create_sub_key("Example").unwrap();

        assert!(registry.open_local_machine_key().unwrap().is_none());
        assert!(finish(registry).contains("[HKEY_CURRENT_USER\\SOFTWARE\\Classes\\Example]"));
    }

    #[test]
    fn empty_session_produces_no_output_file() {
        let path = scratch_path("empty");
        let registry = RegFileRegistry::new(false, &path);
        assert!(registry.render().is_none());
        drop(registry);
        assert!(!path.exists());
    }

    #[test]
    fn drop_flushes_a_non_empty_session() {
        let path = scratch_path("flush");
        let registry = RegFileRegistry::new(false, &path);
        classes(&registry)
            .create_sub_key("Example")
            .unwrap()
            .set_value("", "value")
            .unwrap();
        drop(registry);

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.starts_with(REG_FILE_HEADER));
        fs::remove_file(&path).unwrap();
    }
}
