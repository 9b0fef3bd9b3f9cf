//! Server descriptors and the manifest loader that produces them.
//!
//! A manifest is a JSON document describing the registrable servers a module
//! exposes. Hook names are resolved against the built-in table while
//! loading, so a descriptor carries ready-to-call hooks.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::hooks::{self, CustomHook};

/// `IThumbnailProvider`, the interface thumbnail handlers register under.
pub const THUMBNAIL_PROVIDER_IID: &str = "{e357fccd-a995-4576-b01f-234630154e96}";

/// Which shell-extension association shape a server registers under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerKind {
    Thumbnail,
    Icon,
    ContextMenu,
    PropertySheet,
}

impl ServerKind {
    /// Subkey under a file class where the handler's CLSID is recorded.
    pub fn shellex_sub_key(&self, display_name: &str) -> String {
        match self {
            ServerKind::Thumbnail => format!("ShellEx\\{}", THUMBNAIL_PROVIDER_IID),
            ServerKind::Icon => "ShellEx\\IconHandler".to_owned(),
            ServerKind::ContextMenu => {
                format!("ShellEx\\ContextMenuHandlers\\{}", display_name)
            }
            ServerKind::PropertySheet => {
                format!("ShellEx\\PropertySheetHandlers\\{}", display_name)
            }
        }
    }
}

/// One registrable server: what to call it, which COM class it is, which
/// module hosts it, and the custom registration steps it asked for.
#[derive(Debug, Clone)]
pub struct ServerDescriptor {
    pub display_name: String,
    pub clsid: String,
    pub module: String,
    pub kind: ServerKind,
    pub associations: Vec<String>,
    pub register_hook: CustomHook,
    pub unregister_hook: CustomHook,
}

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("manifest '{}' does not exist", .0.display())]
    ManifestNotFound(PathBuf),

    #[error("failed to read manifest {}: {reason}", .path.display())]
    ManifestRead { path: PathBuf, reason: String },

    #[error("failed to parse manifest {}: {reason}", .path.display())]
    ManifestParse { path: PathBuf, reason: String },

    #[error("server '{server}' has an invalid class id '{clsid}'")]
    InvalidClassId { server: String, clsid: String },

    #[error("server '{server}' names an unknown {direction} hook '{hook}'")]
    UnknownHook {
        server: String,
        direction: &'static str,
        hook: String,
    },
}

#[derive(Deserialize)]
struct Manifest {
    servers: Vec<ManifestServer>,
}

#[derive(Deserialize)]
struct ManifestServer {
    display_name: String,
    clsid: String,
    module: String,
    kind: ServerKind,
    #[serde(default)]
    associations: Vec<String>,
    #[serde(default)]
    register_hook: Option<String>,
    #[serde(default)]
    unregister_hook: Option<String>,
}

/// Loads every server descriptor from a manifest file.
pub fn load_descriptors(path: &Path) -> Result<Vec<ServerDescriptor>, DescriptorError> {
    if !path.exists() {
        return Err(DescriptorError::ManifestNotFound(path.to_owned()));
    }
    let text = fs::read_to_string(path).map_err(|err| DescriptorError::ManifestRead {
        path: path.to_owned(),
        reason: err.to_string(),
    })?;
    let manifest: Manifest =
        serde_json::from_str(&text).map_err(|err| DescriptorError::ManifestParse {
            path: path.to_owned(),
            reason: err.to_string(),
        })?;

    manifest.servers.into_iter().map(resolve).collect()
}

fn resolve(server: ManifestServer) -> Result<ServerDescriptor, DescriptorError> {
    if !is_class_id(&server.clsid) {
        return Err(DescriptorError::InvalidClassId {
            server: server.display_name,
            clsid: server.clsid,
        });
    }

    let register_hook = match &server.register_hook {
        Some(name) => {
            hooks::resolve_register(name).ok_or_else(|| DescriptorError::UnknownHook {
                server: server.display_name.clone(),
                direction: "register",
                hook: name.clone(),
            })?
        }
        None => CustomHook::None,
    };
    let unregister_hook = match &server.unregister_hook {
        Some(name) => {
            hooks::resolve_unregister(name).ok_or_else(|| DescriptorError::UnknownHook {
                server: server.display_name.clone(),
                direction: "unregister",
                hook: name.clone(),
            })?
        }
        None => CustomHook::None,
    };

    Ok(ServerDescriptor {
        display_name: server.display_name,
        clsid: server.clsid,
        module: server.module,
        kind: server.kind,
        associations: server.associations,
        register_hook,
        unregister_hook,
    })
}

/// A brace-wrapped GUID: `{xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx}`.
fn is_class_id(value: &str) -> bool {
    let inner = match value.strip_prefix('{').and_then(|v| v.strip_suffix('}')) {
        Some(inner) => inner,
        None => return false,
    };
    inner.len() == 36
        && inner.char_indices().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        })
}
