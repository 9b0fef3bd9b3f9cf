use std::fmt;

use crate::error::RegistryError;

/// Selects which registry view (32- or 64-bit) a live backend targets.
/// Chosen once per process run from the host operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationType {
    Os32Bit,
    Os64Bit,
}

impl RegistrationType {
    /// The view matching the operating system this process runs on.
    ///
    /// A 32-bit process on a 64-bit OS runs under WOW64, which publishes the
    /// real architecture in `PROCESSOR_ARCHITEW6432`.
    pub fn host() -> Self {
        if cfg!(target_pointer_width = "64")
            || std::env::var_os("PROCESSOR_ARCHITEW6432").is_some()
        {
            RegistrationType::Os64Bit
        } else {
            RegistrationType::Os32Bit
        }
    }
}

impl fmt::Display for RegistrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationType::Os32Bit => write!(f, "32-bit"),
            RegistrationType::Os64Bit => write!(f, "64-bit"),
        }
    }
}

/// A scoped handle over one path segment of a key/value tree.
///
/// A handle's path is fixed at creation; `open_sub_key` and `create_sub_key`
/// always return a new handle for the child path and never mutate the parent.
pub trait RegistryKey {
    /// Opens an existing subkey. Returns `Ok(None)` when the path does not
    /// exist.
    fn open_sub_key(&self, name: &str) -> Result<Option<Box<dyn RegistryKey>>, RegistryError>;

    /// Opens or creates a subkey. Creating an already-existing key returns a
    /// handle to it without error.
    fn create_sub_key(&self, name: &str) -> Result<Box<dyn RegistryKey>, RegistryError>;

    /// Sets a string value. The empty name addresses the key's default value.
    fn set_value(&self, name: &str, value: &str) -> Result<(), RegistryError>;

    /// Reads a string value. Returns `Ok(None)` when the value is missing.
    fn get_value(&self, name: &str) -> Result<Option<String>, RegistryError>;

    fn get_sub_key_names(&self) -> Result<Vec<String>, RegistryError>;

    fn get_value_names(&self) -> Result<Vec<String>, RegistryError>;

    /// Deletes a value. With `must_exist` false a missing value is silently
    /// ignored.
    fn delete_value(&self, name: &str, must_exist: bool) -> Result<(), RegistryError>;

    /// Deletes a subkey and all of its descendants.
    fn delete_sub_key_tree(&self, subpath: &str) -> Result<(), RegistryError>;
}

/// Factory for the three conventional registration roots, polymorphic over
/// the write target (live registry or deferred file emission).
pub trait RegistryService: fmt::Display {
    /// Opens the classes registration root. When the service is user-scoped
    /// and `fallback` is false this resolves to the user's
    /// `SOFTWARE\Classes` overlay rather than the machine-wide classes root.
    fn open_classes_root(
        &self,
        fallback: bool,
    ) -> Result<Option<Box<dyn RegistryKey>>, RegistryError>;

    /// Opens the local-machine root. Returns `Ok(None)` when the service is
    /// user-scoped and no local-machine root applies.
    fn open_local_machine_key(&self) -> Result<Option<Box<dyn RegistryKey>>, RegistryError>;

    /// Opens whichever of current-user or local-machine matches the
    /// service's scope.
    fn open_root_key(&self) -> Result<Box<dyn RegistryKey>, RegistryError>;

    /// Whether the backend supports the read path at all.
    fn can_read(&self) -> bool;

    fn registration_type(&self) -> RegistrationType;
}
