//! Live registry backend over the OS registry APIs. Every operation may fail
//! with an OS-level error, which propagates to the caller untouched.

use std::fmt;
use std::io;

use winreg::enums::{
    HKEY_CLASSES_ROOT, HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE, KEY_READ, KEY_WOW64_32KEY,
    KEY_WOW64_64KEY, KEY_WRITE,
};
use winreg::RegKey;

use crate::error::RegistryError;
use crate::service::{RegistrationType, RegistryKey, RegistryService};

const USER_CLASSES_SUBKEY: &str = "SOFTWARE\\Classes";

/// Registry service over the live OS registry, bound to one registry view
/// and either per-user or per-machine scope.
pub struct LiveRegistry {
    as_user: bool,
    registration_type: RegistrationType,
}

impl LiveRegistry {
    pub fn new(as_user: bool, registration_type: RegistrationType) -> Self {
        Self {
            as_user,
            registration_type,
        }
    }

    fn view_flag(&self) -> u32 {
        match self.registration_type {
            RegistrationType::Os64Bit => KEY_WOW64_64KEY,
            RegistrationType::Os32Bit => KEY_WOW64_32KEY,
        }
    }

    fn root(&self, hkey: winreg::HKEY) -> LiveKey {
        LiveKey {
            key: RegKey::predef(hkey),
            sam: KEY_READ | KEY_WRITE | self.view_flag(),
        }
    }
}

impl fmt::Display for LiveRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = if self.as_user {
            "per-user"
        } else {
            "per-machine"
        };
        write!(f, "{} {} registry", scope, self.registration_type)
    }
}

impl RegistryService for LiveRegistry {
    fn open_classes_root(
        &self,
        fallback: bool,
    ) -> Result<Option<Box<dyn RegistryKey>>, RegistryError> {
        if self.as_user && !fallback {
            // The user's classes overlay, not the machine-wide merged view.
            self.root(HKEY_CURRENT_USER).open_sub_key(USER_CLASSES_SUBKEY)
        } else {
            Ok(Some(Box::new(self.root(HKEY_CLASSES_ROOT))))
        }
    }

    fn open_local_machine_key(&self) -> Result<Option<Box<dyn RegistryKey>>, RegistryError> {
        if self.as_user {
            return Ok(None);
        }
        Ok(Some(Box::new(self.root(HKEY_LOCAL_MACHINE))))
    }

    fn open_root_key(&self) -> Result<Box<dyn RegistryKey>, RegistryError> {
        let hkey = if self.as_user {
            HKEY_CURRENT_USER
        } else {
            HKEY_LOCAL_MACHINE
        };
        Ok(Box::new(self.root(hkey)))
    }

    fn can_read(&self) -> bool {
        true
    }

    fn registration_type(&self) -> RegistrationType {
        self.registration_type
    }
}

struct LiveKey {
    key: RegKey,
    sam: u32,
}

impl RegistryKey for LiveKey {
    fn open_sub_key(&self, name: &str) -> Result<Option<Box<dyn RegistryKey>>, RegistryError> {
        match self.key.open_subkey_with_flags(name, self.sam) {
            Ok(key) => Ok(Some(Box::new(LiveKey { key, sam: self.sam }))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn create_sub_key(&self, name: &str) -> Result<Box<dyn RegistryKey>, RegistryError> {
        let (key, _disposition) = self.key.create_subkey_with_flags(name, self.sam)?;
        Ok(Box::new(LiveKey { key, sam: self.sam }))
    }

    fn set_value(&self, name: &str, value: &str) -> Result<(), RegistryError> {
        self.key.set_value(name, &value)?;
        Ok(())
    }

    fn get_value(&self, name: &str) -> Result<Option<String>, RegistryError> {
        match self.key.get_value::<String, _>(name) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn get_sub_key_names(&self) -> Result<Vec<String>, RegistryError> {
        let names = self.key.enum_keys().collect::<io::Result<Vec<_>>>()?;
        Ok(names)
    }

    fn get_value_names(&self) -> Result<Vec<String>, RegistryError> {
        let mut names = Vec::new();
        for value in self.key.enum_values() {
            let (name, _data) = value?;
            names.push(name);
        }
        Ok(names)
    }

    fn delete_value(&self, name: &str, must_exist: bool) -> Result<(), RegistryError> {
        match self.key.delete_value(name) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound && !must_exist => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn delete_sub_key_tree(&self, subpath: &str) -> Result<(), RegistryError> {
        self.key.delete_subkey_all(subpath)?;
        Ok(())
    }
}
