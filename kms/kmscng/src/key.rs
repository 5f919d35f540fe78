// Copyright (c) Microsoft. All rights reserved.

use std::sync::Arc;

use kms_common::CryptoKeyVersionAlgorithm;
use kmstoken::{Error, Object};
use ncrypt_sys::{
    BCRYPT_ECDSA_P256_ALGORITHM, BCRYPT_ECDSA_P384_ALGORITHM, NCRYPT_ALGORITHM_GROUP_PROPERTY,
    NCRYPT_ALGORITHM_PROPERTY, NCRYPT_ALLOW_SIGNING_FLAG, NCRYPT_CERTIFICATE_PROPERTY,
    NCRYPT_ECDSA_ALGORITHM_GROUP, NCRYPT_EXPORT_POLICY_PROPERTY, NCRYPT_KEY_TYPE_PROPERTY,
    NCRYPT_KEY_USAGE_PROPERTY, NCRYPT_LENGTH_PROPERTY, NCRYPT_NAME_PROPERTY,
    NCRYPT_PROVIDER_HANDLE_PROPERTY, NCRYPT_PROV_HANDLE, NCRYPT_RSA_ALGORITHM_GROUP,
    NCRYPT_UNIQUE_NAME_PROPERTY, NTE_INTERNAL_ERROR, NTE_NOT_FOUND, NTE_NOT_SUPPORTED,
};
use pkcs11_sys::{CKK_EC, CKK_RSA};

use crate::ErrorExt;

/// Keys cannot be exported in any form.
const EXPORT_POLICY: u32 = 0;

/// Per-user key, as opposed to `NCRYPT_MACHINE_KEY_TYPE_FLAG`.
const KEY_TYPE: u32 = 0;

/// A key opened through a provider handle.
///
/// Every open creates a new `Key`, even for the same remote key version.
#[derive(Debug)]
pub struct Key {
    provider: NCRYPT_PROV_HANDLE,
    object: Arc<Object>,
    certificate: Option<Arc<Object>>,
}

impl Key {
    pub fn new(
        provider: NCRYPT_PROV_HANDLE,
        object: Arc<Object>,
        certificate: Option<Arc<Object>>,
    ) -> Self {
        Key {
            provider,
            object,
            certificate,
        }
    }

    /// The provider handle this key was opened under.
    pub fn provider(&self) -> NCRYPT_PROV_HANDLE {
        self.provider
    }

    /// The token's private key object backing this key.
    pub fn object(&self) -> &Object {
        &self.object
    }

    pub fn get_property(&self, name: &str) -> Result<Vec<u8>, Error> {
        let algorithm = self.object.algorithm();

        let value = match name {
            NCRYPT_ALGORITHM_GROUP_PROPERTY => crate::wide::encode(algorithm_group(&self.object)?),
            NCRYPT_ALGORITHM_PROPERTY => crate::wide::encode(algorithm_name(&self.object)?),
            NCRYPT_LENGTH_PROPERTY => {
                let length = u32::try_from(algorithm.key_bit_length).map_err(|err| {
                    Error::internal("key length does not fit in a DWORD")
                        .with_status(NTE_INTERNAL_ERROR)
                        .with_source(err)
                })?;
                length.to_le_bytes().to_vec()
            }
            NCRYPT_KEY_USAGE_PROPERTY => NCRYPT_ALLOW_SIGNING_FLAG.to_le_bytes().to_vec(),
            NCRYPT_EXPORT_POLICY_PROPERTY => EXPORT_POLICY.to_le_bytes().to_vec(),
            NCRYPT_KEY_TYPE_PROPERTY => KEY_TYPE.to_le_bytes().to_vec(),
            NCRYPT_PROVIDER_HANDLE_PROPERTY => self.provider.to_le_bytes().to_vec(),
            NCRYPT_NAME_PROPERTY | NCRYPT_UNIQUE_NAME_PROPERTY => {
                crate::wide::encode(self.object.kms_key_name())
            }
            NCRYPT_CERTIFICATE_PROPERTY => self
                .certificate
                .as_ref()
                .and_then(|certificate| certificate.certificate_der())
                .ok_or_else(|| {
                    Error::not_found(format!(
                        "no certificate is available for {}",
                        self.object.kms_key_name()
                    ))
                    .with_status(NTE_NOT_FOUND)
                })?
                .to_owned(),
            name => {
                return Err(Error::not_supported(format!("unsupported property {name:?}"))
                    .with_status(NTE_NOT_SUPPORTED))
            }
        };

        Ok(value)
    }
}

fn algorithm_group(object: &Object) -> Result<&'static str, Error> {
    match object.algorithm().key_type {
        CKK_EC => Ok(NCRYPT_ECDSA_ALGORITHM_GROUP),
        CKK_RSA => Ok(NCRYPT_RSA_ALGORITHM_GROUP),
        key_type => Err(Error::not_supported(format!("unsupported key type {key_type}"))
            .with_status(NTE_NOT_SUPPORTED)),
    }
}

fn algorithm_name(object: &Object) -> Result<&'static str, Error> {
    match object.algorithm().algorithm {
        CryptoKeyVersionAlgorithm::EcSignP256Sha256 => Ok(BCRYPT_ECDSA_P256_ALGORITHM),
        CryptoKeyVersionAlgorithm::EcSignP384Sha384 => Ok(BCRYPT_ECDSA_P384_ALGORITHM),
        algorithm => Err(
            Error::not_supported(format!("unsupported algorithm {algorithm:?}"))
                .with_status(NTE_NOT_SUPPORTED),
        ),
    }
}
