//! Custom registration hooks. A server descriptor carries at most one hook
//! per direction, resolved by name from the built-in table when the
//! descriptor is loaded, so dispatch is a plain match instead of runtime
//! introspection.

use std::collections::HashMap;

use crate::descriptor::ServerDescriptor;
use crate::error::RegistryError;
use crate::service::{RegistrationType, RegistryService};

pub type RegistrationTypeHook =
    fn(&ServerDescriptor, RegistrationType) -> Result<(), RegistryError>;
pub type RegistryServiceHook =
    fn(&ServerDescriptor, &dyn RegistryService) -> Result<(), RegistryError>;

/// A custom register or unregister step, tagged by the call shape it needs.
///
/// Hooks that only write are safe against either backend and take the
/// registry service. Hooks that must read existing registry state before
/// deciding what to write take a [`RegistrationType`] and open the live
/// registry themselves, which is only possible when the active backend can
/// read.
#[derive(Debug, Clone, Copy, Default)]
pub enum CustomHook {
    #[default]
    None,
    ByRegistrationType(RegistrationTypeHook),
    ByRegistryService(RegistryServiceHook),
}

impl CustomHook {
    /// Invokes the hook against the active service.
    ///
    /// A by-registration-type hook needs the read path: against a write-only
    /// backend it fails when `strict`, and is skipped otherwise. A by-service
    /// hook runs against either backend; the hook itself decides what it
    /// needs.
    pub fn dispatch(
        &self,
        server: &ServerDescriptor,
        registry: &dyn RegistryService,
        strict: bool,
    ) -> Result<(), RegistryError> {
        match self {
            CustomHook::None => Ok(()),
            CustomHook::ByRegistrationType(hook) => {
                if registry.can_read() {
                    hook(server, registry.registration_type())
                } else if strict {
                    Err(RegistryError::Unsupported {
                        operation: "custom registration",
                        backend: registry.to_string(),
                    })
                } else {
                    Ok(())
                }
            }
            CustomHook::ByRegistryService(hook) => hook(server, registry),
        }
    }
}

lazy_static! {
    static ref REGISTER_HOOKS: HashMap<&'static str, CustomHook> = {
        let mut hooks = HashMap::new();
        hooks.insert(
            "disable-process-isolation",
            CustomHook::ByRegistryService(disable_process_isolation as RegistryServiceHook),
        );
        hooks
    };
    static ref UNREGISTER_HOOKS: HashMap<&'static str, CustomHook> = {
        let mut hooks = HashMap::new();
        hooks.insert(
            "prune-stale-associations",
            CustomHook::ByRegistrationType(prune_stale_associations as RegistrationTypeHook),
        );
        hooks
    };
}

pub fn resolve_register(name: &str) -> Option<CustomHook> {
    REGISTER_HOOKS.get(name).copied()
}

pub fn resolve_unregister(name: &str) -> Option<CustomHook> {
    UNREGISTER_HOOKS.get(name).copied()
}

/// Marks the server's CLSID so the shell hosts it outside the surrogate
/// process. Write-only, so it runs against either backend.
fn disable_process_isolation(
    server: &ServerDescriptor,
    registry: &dyn RegistryService,
) -> Result<(), RegistryError> {
    let classes = registry
        .open_classes_root(false)?
        .ok_or(RegistryError::MissingRoot("classes"))?;
    let clsid_key = classes.create_sub_key(&format!("CLSID\\{}", server.clsid))?;
    clsid_key.set_value("DisableProcessIsolation", "1")
}

/// Sweeps `ShellEx` entries across the live classes root and removes any
/// still pointing at this server's CLSID. Needs to read, so it opens a live
/// service for the given view rather than taking the active backend.
#[cfg(windows)]
fn prune_stale_associations(
    server: &ServerDescriptor,
    registration_type: RegistrationType,
) -> Result<(), RegistryError> {
    let registry = crate::live::LiveRegistry::new(false, registration_type);
    let classes = registry
        .open_classes_root(true)?
        .ok_or(RegistryError::MissingRoot("classes"))?;
    for class in classes.get_sub_key_names()? {
        let shellex = match classes.open_sub_key(&format!("{}\\ShellEx", class))? {
            Some(key) => key,
            None => continue,
        };
        for handler in shellex.get_sub_key_names()? {
            if let Some(entry) = shellex.open_sub_key(&handler)? {
                if entry.get_value("")?.as_deref() == Some(server.clsid.as_str()) {
                    shellex.delete_sub_key_tree(&handler)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(not(windows))]
fn prune_stale_associations(
    _server: &ServerDescriptor,
    _registration_type: RegistrationType,
) -> Result<(), RegistryError> {
    // Only reachable through a readable backend, which does not exist off
    // Windows.
    Ok(())
}
