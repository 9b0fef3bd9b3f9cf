//! The registration writes for one server, expressed against the registry
//! service abstraction so they land in the live registry or the deferred
//! file identically.

use log::info;

use crate::descriptor::ServerDescriptor;
use crate::error::RegistryError;
use crate::service::{RegistryKey, RegistryService};

/// The shell's approved-extensions list, maintained per machine only.
pub const APPROVED_KEY_PATH: &str =
    "SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Shell Extensions\\Approved";

/// Creates the server's COM class entries: the CLSID key named after the
/// server, and its `InProcServer32` module binding. With `codebase` the
/// module is recorded by its full path, otherwise by bare file name.
pub fn install_server(
    server: &ServerDescriptor,
    registry: &dyn RegistryService,
    codebase: bool,
) -> Result<(), RegistryError> {
    let classes = classes_root(registry)?;
    let clsid_key = classes.create_sub_key(&format!("CLSID\\{}", server.clsid))?;
    clsid_key.set_value("", &server.display_name)?;

    let inproc = clsid_key.create_sub_key("InProcServer32")?;
    inproc.set_value("", &module_value(&server.module, codebase))?;
    inproc.set_value("ThreadingModel", "Both")?;

    info!(target: "ServerRegistration", "Installed class entries for {}", server.display_name);
    Ok(())
}

/// Associates the server with its file classes, records it in the approved
/// list where a machine root exists, then runs the custom register hook.
pub fn register_server(
    server: &ServerDescriptor,
    registry: &dyn RegistryService,
) -> Result<(), RegistryError> {
    let classes = classes_root(registry)?;
    for class in &server.associations {
        let key = classes.create_sub_key(&format!(
            "{}\\{}",
            class,
            server.kind.shellex_sub_key(&server.display_name)
        ))?;
        key.set_value("", &server.clsid)?;
    }

    if let Some(machine) = registry.open_local_machine_key()? {
        let approved = machine.create_sub_key(APPROVED_KEY_PATH)?;
        approved.set_value(&server.clsid, &server.display_name)?;
    }

    server.register_hook.dispatch(server, registry, true)?;

    info!(target: "ServerRegistration", "Registered {}", server.display_name);
    Ok(())
}

/// Runs the custom unregister hook, removes the approved-list entry
/// (missing entries tolerated), and deletes the association keys.
pub fn unregister_server(
    server: &ServerDescriptor,
    registry: &dyn RegistryService,
) -> Result<(), RegistryError> {
    server.unregister_hook.dispatch(server, registry, true)?;

    if let Some(machine) = registry.open_local_machine_key()? {
        if let Some(approved) = machine.open_sub_key(APPROVED_KEY_PATH)? {
            approved.delete_value(&server.clsid, false)?;
        }
    }

    let classes = classes_root(registry)?;
    for class in &server.associations {
        classes.delete_sub_key_tree(&format!(
            "{}\\{}",
            class,
            server.kind.shellex_sub_key(&server.display_name)
        ))?;
    }

    info!(target: "ServerRegistration", "Unregistered {}", server.display_name);
    Ok(())
}

/// Removes the server's COM class entries wholesale.
pub fn uninstall_server(
    server: &ServerDescriptor,
    registry: &dyn RegistryService,
) -> Result<(), RegistryError> {
    let classes = classes_root(registry)?;
    classes.delete_sub_key_tree(&format!("CLSID\\{}", server.clsid))?;

    info!(target: "ServerRegistration", "Uninstalled class entries for {}", server.display_name);
    Ok(())
}

fn classes_root(
    registry: &dyn RegistryService,
) -> Result<Box<dyn RegistryKey>, RegistryError> {
    registry
        .open_classes_root(false)?
        .ok_or(RegistryError::MissingRoot("classes"))
}

fn module_value(module: &str, codebase: bool) -> String {
    if codebase {
        return module.to_owned();
    }
    module
        .rsplit(|c| c == '\\' || c == '/')
        .next()
        .unwrap_or(module)
        .to_owned()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::descriptor::{ServerKind, THUMBNAIL_PROVIDER_IID};
    use crate::hooks::CustomHook;
    use crate::regfile::RegFileRegistry;

    const CLSID: &str = "{11111111-2222-3333-4444-555555555555}";

    fn server() -> ServerDescriptor {
        ServerDescriptor {
            display_name: "Example".to_owned(),
            clsid: CLSID.to_owned(),
            module: "C:\\extensions\\example.dll".to_owned(),
            kind: ServerKind::Thumbnail,
            associations: vec![".abc".to_owned()],
            register_hook: CustomHook::None,
            unregister_hook: CustomHook::None,
        }
    }

    fn write_only(as_user: bool) -> RegFileRegistry {
        RegFileRegistry::new(
            as_user,
            std::env::temp_dir().join(format!("shellreg-manager-{}.reg", std::process::id())),
        )
    }

    /// Captures the serialized session and skips the drop flush.
    fn finish(registry: RegFileRegistry) -> String {
        let document = registry.render().unwrap();
        std::mem::forget(registry);
        document
    }

    #[test]
    fn install_writes_class_entries() {
        let registry = write_only(false);
        install_server(&server(), &registry, false).unwrap();

        let document = finish(registry);
        assert!(document.contains(&format!("[HKEY_CLASSES_ROOT\\CLSID\\{}]", CLSID)));
        assert!(document.contains("@=\"Example\""));
        assert!(document.contains(&format!(
            "[HKEY_CLASSES_ROOT\\CLSID\\{}\\InProcServer32]",
            CLSID
        )));
        assert!(document.contains("@=\"example.dll\""));
        assert!(document.contains("\"ThreadingModel\"=\"Both\""));
    }

    #[test]
    fn codebase_install_records_the_full_module_path() {
        let registry = write_only(false);
        install_server(&server(), &registry, true).unwrap();

        assert!(finish(registry).contains("@=\"C:\\\\extensions\\\\example.dll\""));
    }

    #[test]
    fn register_writes_association_and_approved_entries() {
        let registry = write_only(false);
        register_server(&server(), &registry).unwrap();

        let document = finish(registry);
        assert!(document.contains(&format!(
            "[HKEY_CLASSES_ROOT\\.abc\\ShellEx\\{}]",
            THUMBNAIL_PROVIDER_IID
        )));
        assert!(document.contains(&format!("@=\"{}\"", CLSID)));
        assert!(document.contains(&format!(
            "[HKEY_LOCAL_MACHINE\\{}]",
            APPROVED_KEY_PATH
        )));
        assert!(document.contains(&format!("\"{}\"=\"Example\"", CLSID)));
    }

    #[test]
    fn per_user_register_skips_the_approved_list() {
        let registry = write_only(true);
        register_server(&server(), &registry).unwrap();

        let document = finish(registry);
        assert!(document.contains("[HKEY_CURRENT_USER\\SOFTWARE\\Classes\\.abc\\ShellEx"));
        assert!(!document.contains("HKEY_LOCAL_MACHINE"));
    }

    #[test]
    fn unregister_records_approved_removal_then_fails_on_the_subtree() {
        let registry = write_only(false);
        let result = unregister_server(&server(), &registry);
        assert!(matches!(result, Err(RegistryError::Unsupported { .. })));

        // The tolerated removal happened before the unsupported delete.
        assert!(finish(registry).contains(&format!("\"{}\"=-", CLSID)));
    }

    #[test]
    fn uninstall_needs_the_subtree_delete() {
        let registry = write_only(false);
        assert!(matches!(
            uninstall_server(&server(), &registry),
            Err(RegistryError::Unsupported { .. })
        ));
    }

    #[test]
    fn module_value_strips_directories_unless_codebase() {
        assert_eq!(module_value("C:\\x\\example.dll", false), "example.dll");
        assert_eq!(
            module_value("C:\\x\\example.dll", true),
            "C:\\x\\example.dll"
        );
    }
}
