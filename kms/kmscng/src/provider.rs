// Copyright (c) Microsoft. All rights reserved.

use std::collections::BTreeMap;
use std::sync::RwLock;

use kmstoken::Error;
use ncrypt_sys::{
    NCRYPT_IMPL_HARDWARE_FLAG, NCRYPT_IMPL_TYPE_PROPERTY, NCRYPT_VERSION_PROPERTY,
    NTE_INVALID_PARAMETER, NTE_NOT_SUPPORTED,
};

use crate::ErrorExt;

/// The name the key storage provider is opened with unless the config overrides it.
pub const DEFAULT_PROVIDER_NAME: &str = "Google Cloud KMS Provider";

pub const ENDPOINT_ADDRESS_PROPERTY: &str = "KMS Endpoint Address";
pub const CHANNEL_CREDENTIALS_PROPERTY: &str = "KMS Channel Credentials";
pub const USER_PROJECT_PROPERTY: &str = "KMS User Project";

const PROVIDER_VERSION: u32 = 1;

#[derive(Clone, Debug, Eq, PartialEq)]
struct Property {
    value: Vec<u8>,
    mutable: bool,
}

/// The properties every newly opened provider starts with.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PropertyTable {
    properties: BTreeMap<String, Property>,
}

impl PropertyTable {
    pub fn empty() -> Self {
        PropertyTable {
            properties: BTreeMap::new(),
        }
    }

    /// Adds a property that callers can read but not change.
    #[must_use]
    pub fn with_fixed(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.properties.insert(
            name.into(),
            Property {
                value: value.into(),
                mutable: false,
            },
        );
        self
    }

    /// Adds a property that callers can overwrite on their own provider handle.
    #[must_use]
    pub fn with_mutable(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.properties.insert(
            name.into(),
            Property {
                value: value.into(),
                mutable: true,
            },
        );
        self
    }
}

/// The endpoint, channel credentials and user project properties are only stored and read back.
/// Every provider shares the client the bridge was loaded with, so changing them does not
/// redirect any remote call.
impl Default for PropertyTable {
    fn default() -> Self {
        PropertyTable::empty()
            .with_fixed(
                NCRYPT_IMPL_TYPE_PROPERTY,
                NCRYPT_IMPL_HARDWARE_FLAG.to_le_bytes(),
            )
            .with_fixed(NCRYPT_VERSION_PROPERTY, PROVIDER_VERSION.to_le_bytes())
            .with_mutable(ENDPOINT_ADDRESS_PROPERTY, "cloudkms.googleapis.com:443")
            .with_mutable(CHANNEL_CREDENTIALS_PROPERTY, "default")
            .with_mutable(USER_PROJECT_PROPERTY, "")
    }
}

/// An open provider handle. Each one owns a private copy of the property table.
#[derive(Debug)]
pub struct Provider {
    properties: RwLock<BTreeMap<String, Property>>,
}

impl Provider {
    pub fn new(table: &PropertyTable) -> Self {
        Provider {
            properties: RwLock::new(table.properties.clone()),
        }
    }

    pub fn get_property(&self, name: &str) -> Result<Vec<u8>, Error> {
        let properties = self
            .properties
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let property = properties.get(name).ok_or_else(|| unsupported_property(name))?;
        Ok(property.value.clone())
    }

    pub fn set_property(&self, name: &str, value: &[u8]) -> Result<(), Error> {
        let mut properties = self
            .properties
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let property = properties
            .get_mut(name)
            .ok_or_else(|| unsupported_property(name))?;
        if !property.mutable {
            return Err(
                Error::invalid_argument(format!("property {name:?} is immutable"))
                    .with_status(NTE_INVALID_PARAMETER),
            );
        }

        property.value = value.to_owned();
        Ok(())
    }
}

fn unsupported_property(name: &str) -> Error {
    Error::not_supported(format!("unsupported property {name:?}")).with_status(NTE_NOT_SUPPORTED)
}
