// Copyright (c) Microsoft. All rights reserved.

//! Building the token's objects from the remote key ring.
//!
//! Loading happens in two steps. [`load_state`] talks to the remote service and produces an
//! [`ObjectStoreState`], a serializable snapshot that fixes the handle of every object.
//! [`load_objects`] turns a snapshot into a registry without any remote calls, so a saved
//! snapshot always reproduces the same handles.

use std::sync::Arc;

use kms_common::{
    ByteString, CryptoKeyPurpose, CryptoKeyVersion, CryptoKeyVersionState, KmsClient,
    ProtectionLevel,
};
use openssl::pkey::PKey;
use openssl::x509::X509;
use pkcs11_sys::{CK_ULONG, CKR_OBJECT_HANDLE_INVALID};

use crate::algorithm::get_details;
use crate::cert_authority::CertAuthority;
use crate::handle_registry::{HandleRegistry, HandleSet};
use crate::object::{KeyPair, Object};
use crate::Error;

#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ObjectStoreState {
    pub asymmetric_keys: Vec<AsymmetricKey>,
}

/// One remote key version and the handles of the objects derived from it.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AsymmetricKey {
    pub crypto_key_version: CryptoKeyVersion,
    pub public_key_handle: CK_ULONG,
    pub private_key_handle: CK_ULONG,

    /// DER-encoded SubjectPublicKeyInfo.
    pub public_key_der: ByteString,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<Certificate>,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Certificate {
    pub handle: CK_ULONG,
    pub x509_der: ByteString,
}

impl ObjectStoreState {
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self)
            .map_err(|err| Error::internal("could not serialize object store state").with_source(err))
    }

    pub fn from_json(s: &str) -> Result<Self, Error> {
        serde_json::from_str(s).map_err(|err| {
            Error::invalid_argument("could not parse object store state").with_source(err)
        })
    }
}

/// Enumerates the key ring and builds a snapshot of every key version the token can expose.
///
/// Keys and versions the token cannot use are skipped with a log line. Any failure to reach the
/// remote service or to parse what it returns aborts the whole load.
pub fn load_state(
    client: &dyn KmsClient,
    key_ring_name: &str,
    generate_certificates: bool,
) -> Result<ObjectStoreState, Error> {
    let cert_authority = if generate_certificates {
        Some(CertAuthority::new()?)
    } else {
        None
    };

    let mut handles = HandleSet::new();
    let mut state = ObjectStoreState::default();

    let crypto_keys = client.list_crypto_keys(key_ring_name).map_err(|err| {
        Error::internal(format!("could not list keys in {key_ring_name}")).with_source(err)
    })?;

    for crypto_key in crypto_keys {
        if crypto_key.version_template.protection_level != ProtectionLevel::Hsm {
            log::info!(
                "skipping key {} with protection level {:?}",
                crypto_key.name,
                crypto_key.version_template.protection_level,
            );
            continue;
        }

        match crypto_key.purpose {
            CryptoKeyPurpose::AsymmetricSign | CryptoKeyPurpose::AsymmetricDecrypt => (),
            purpose => {
                log::info!("skipping key {} with purpose {:?}", crypto_key.name, purpose);
                continue;
            }
        }

        let versions = client
            .list_crypto_key_versions(&crypto_key.name)
            .map_err(|err| {
                Error::internal(format!("could not list versions of {}", crypto_key.name))
                    .with_source(err)
            })?;

        for ckv in versions {
            if ckv.state != CryptoKeyVersionState::Enabled {
                log::info!("skipping key version {} in state {:?}", ckv.name, ckv.state);
                continue;
            }

            if get_details(ckv.algorithm).is_err() {
                log::info!(
                    "skipping key version {} with unsupported algorithm {:?}",
                    ckv.name,
                    ckv.algorithm,
                );
                continue;
            }

            let key = load_asymmetric_key(
                client,
                ckv,
                &mut handles,
                cert_authority.as_ref(),
            )?;
            state.asymmetric_keys.push(key);
        }
    }

    log::info!(
        "loaded {} key versions from {}",
        state.asymmetric_keys.len(),
        key_ring_name
    );

    Ok(state)
}

fn load_asymmetric_key(
    client: &dyn KmsClient,
    ckv: CryptoKeyVersion,
    handles: &mut HandleSet<CK_ULONG>,
    cert_authority: Option<&CertAuthority>,
) -> Result<AsymmetricKey, Error> {
    let public_key = client.get_public_key(&ckv.name).map_err(|err| {
        Error::internal(format!("could not get public key of {}", ckv.name)).with_source(err)
    })?;
    let public_key = PKey::public_key_from_pem(public_key.pem.as_bytes()).map_err(|err| {
        Error::internal(format!("could not parse public key of {}", ckv.name)).with_source(err)
    })?;

    let public_key_handle = handles.allocate()?;
    let private_key_handle = handles.allocate()?;

    let certificate = match cert_authority {
        Some(cert_authority) => {
            let x509 = cert_authority.generate_certificate(&ckv, &public_key)?;
            Some(Certificate {
                handle: handles.allocate()?,
                x509_der: ByteString(x509.to_der()?),
            })
        }
        None => None,
    };

    Ok(AsymmetricKey {
        public_key_der: ByteString(public_key.public_key_to_der()?),
        crypto_key_version: ckv,
        public_key_handle,
        private_key_handle,
        certificate,
    })
}

/// Creates the token's objects from a snapshot, at the handles the snapshot assigns.
pub fn load_objects(state: &ObjectStoreState) -> Result<HandleRegistry<Object>, Error> {
    let objects = HandleRegistry::new(CKR_OBJECT_HANDLE_INVALID.0);

    for key in &state.asymmetric_keys {
        let ckv = &key.crypto_key_version;

        let public_key = PKey::public_key_from_der(&key.public_key_der.0).map_err(|err| {
            Error::internal(format!("could not parse public key of {}", ckv.name)).with_source(err)
        })?;

        let KeyPair {
            public_key,
            private_key,
        } = Object::new_key_pair(ckv, &public_key)?;
        objects.add_direct(key.public_key_handle, Arc::new(public_key))?;
        objects.add_direct(key.private_key_handle, Arc::new(private_key))?;

        if let Some(certificate) = &key.certificate {
            let x509 = X509::from_der(&certificate.x509_der.0).map_err(|err| {
                Error::internal(format!("could not parse certificate of {}", ckv.name))
                    .with_source(err)
            })?;
            objects.add_direct(
                certificate.handle,
                Arc::new(Object::new_certificate(ckv, &x509)?),
            )?;
        }
    }

    Ok(objects)
}
