// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

//! An in-memory key management service for tests.
//!
//! Keys are real `openssl` keys, so public keys parse and signatures verify.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use kms_common::{
    CryptoKey, CryptoKeyPurpose, CryptoKeyVersion, CryptoKeyVersionAlgorithm as Algorithm,
    CryptoKeyVersionState, CryptoKeyVersionTemplate, KmsClient, ProtectionLevel, PublicKey,
};
use openssl::ec::{EcGroup, EcKey};
use openssl::ecdsa::EcdsaSig;
use openssl::md::Md;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::pkey_ctx::PkeyCtx;
use openssl::rsa::{Padding, Rsa};
use openssl::sign::RsaPssSaltlen;

#[derive(Default)]
pub struct FakeKms {
    inner: Mutex<Inner>,
    requests: AtomicUsize,
    unavailable: AtomicBool,
}

#[derive(Default)]
struct Inner {
    key_rings: Vec<String>,
    crypto_keys: BTreeMap<String, CryptoKey>,
    versions: BTreeMap<String, Version>,
}

struct Version {
    ckv: CryptoKeyVersion,
    key: Option<PKey<Private>>,
}

impl FakeKms {
    pub fn new() -> Self {
        FakeKms::default()
    }

    /// Creates an empty key ring named `key_ring_name`.
    pub fn create_key_ring(&self, key_ring_name: &str) {
        self.inner().key_rings.push(key_ring_name.to_owned());
    }

    pub fn create_crypto_key(
        &self,
        key_ring_name: &str,
        crypto_key_id: &str,
        purpose: CryptoKeyPurpose,
        algorithm: Algorithm,
        protection_level: ProtectionLevel,
    ) -> std::io::Result<CryptoKey> {
        let mut inner = self.inner();

        if !inner.key_rings.iter().any(|name| name == key_ring_name) {
            return Err(not_found(key_ring_name));
        }

        let crypto_key = CryptoKey {
            name: format!("{key_ring_name}/cryptoKeys/{crypto_key_id}"),
            purpose,
            version_template: CryptoKeyVersionTemplate {
                protection_level,
                algorithm,
            },
        };
        inner
            .crypto_keys
            .insert(crypto_key.name.clone(), crypto_key.clone());

        Ok(crypto_key)
    }

    /// Creates an enabled version of `crypto_key_name` with freshly generated key material.
    pub fn create_crypto_key_version(
        &self,
        crypto_key_name: &str,
    ) -> std::io::Result<CryptoKeyVersion> {
        let mut inner = self.inner();

        let template = inner
            .crypto_keys
            .get(crypto_key_name)
            .ok_or_else(|| not_found(crypto_key_name))?
            .version_template;

        let prefix = format!("{crypto_key_name}/cryptoKeyVersions/");
        let id = inner
            .versions
            .keys()
            .filter(|name| name.starts_with(&prefix))
            .count()
            + 1;

        let ckv = CryptoKeyVersion {
            name: format!("{prefix}{id}"),
            state: CryptoKeyVersionState::Enabled,
            protection_level: template.protection_level,
            algorithm: template.algorithm,
        };
        let key = generate_key(template.algorithm)?;

        inner.versions.insert(
            ckv.name.clone(),
            Version {
                ckv: ckv.clone(),
                key,
            },
        );

        Ok(ckv)
    }

    /// Creates a key with a single enabled version. The purpose is derived from the algorithm.
    pub fn create_key(
        &self,
        key_ring_name: &str,
        crypto_key_id: &str,
        algorithm: Algorithm,
        protection_level: ProtectionLevel,
    ) -> std::io::Result<CryptoKeyVersion> {
        let crypto_key = self.create_crypto_key(
            key_ring_name,
            crypto_key_id,
            purpose_of(algorithm),
            algorithm,
            protection_level,
        )?;
        self.create_crypto_key_version(&crypto_key.name)
    }

    pub fn set_crypto_key_version_state(
        &self,
        crypto_key_version_name: &str,
        state: CryptoKeyVersionState,
    ) -> std::io::Result<()> {
        let mut inner = self.inner();
        let version = inner
            .versions
            .get_mut(crypto_key_version_name)
            .ok_or_else(|| not_found(crypto_key_version_name))?;
        version.ckv.state = state;
        Ok(())
    }

    /// Makes every subsequent request fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `KmsClient` requests served so far, including failed ones.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn begin_request(&self) -> std::io::Result<std::sync::MutexGuard<'_, Inner>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "service unavailable",
            ));
        }
        Ok(self.inner())
    }
}

impl KmsClient for FakeKms {
    fn list_crypto_keys(&self, key_ring_name: &str) -> std::io::Result<Vec<CryptoKey>> {
        let inner = self.begin_request()?;

        if !inner.key_rings.iter().any(|name| name == key_ring_name) {
            return Err(not_found(key_ring_name));
        }

        let prefix = format!("{key_ring_name}/cryptoKeys/");
        Ok(inner
            .crypto_keys
            .values()
            .filter(|crypto_key| crypto_key.name.starts_with(&prefix))
            .cloned()
            .collect())
    }

    fn list_crypto_key_versions(
        &self,
        crypto_key_name: &str,
    ) -> std::io::Result<Vec<CryptoKeyVersion>> {
        let inner = self.begin_request()?;

        if !inner.crypto_keys.contains_key(crypto_key_name) {
            return Err(not_found(crypto_key_name));
        }

        let prefix = format!("{crypto_key_name}/cryptoKeyVersions/");
        Ok(inner
            .versions
            .values()
            .filter(|version| version.ckv.name.starts_with(&prefix))
            .map(|version| version.ckv.clone())
            .collect())
    }

    fn get_public_key(&self, crypto_key_version_name: &str) -> std::io::Result<PublicKey> {
        let inner = self.begin_request()?;

        let version = enabled_version(&inner, crypto_key_version_name)?;
        let key = version
            .key
            .as_ref()
            .ok_or_else(|| failed_precondition("key version is not asymmetric"))?;

        let pem = key.public_key_to_pem().map_err(internal)?;
        let pem = String::from_utf8(pem).map_err(internal)?;

        Ok(PublicKey {
            pem,
            algorithm: version.ckv.algorithm,
        })
    }

    fn asymmetric_sign(
        &self,
        crypto_key_version_name: &str,
        digest: &[u8],
    ) -> std::io::Result<Vec<u8>> {
        let inner = self.begin_request()?;

        let version = enabled_version(&inner, crypto_key_version_name)?;
        let key = version
            .key
            .as_ref()
            .ok_or_else(|| failed_precondition("key version is not asymmetric"))?;

        sign(version.ckv.algorithm, key, digest)
    }
}

fn enabled_version<'a>(inner: &'a Inner, name: &str) -> std::io::Result<&'a Version> {
    let version = inner.versions.get(name).ok_or_else(|| not_found(name))?;
    if version.ckv.state != CryptoKeyVersionState::Enabled {
        return Err(failed_precondition("key version is not enabled"));
    }
    Ok(version)
}

fn purpose_of(algorithm: Algorithm) -> CryptoKeyPurpose {
    match algorithm {
        Algorithm::GoogleSymmetricEncryption => CryptoKeyPurpose::EncryptDecrypt,
        Algorithm::HmacSha256 => CryptoKeyPurpose::Mac,
        Algorithm::RsaDecryptOaep2048Sha256
        | Algorithm::RsaDecryptOaep3072Sha256
        | Algorithm::RsaDecryptOaep4096Sha256
        | Algorithm::RsaDecryptOaep4096Sha512 => CryptoKeyPurpose::AsymmetricDecrypt,
        Algorithm::CryptoKeyVersionAlgorithmUnspecified => {
            CryptoKeyPurpose::CryptoKeyPurposeUnspecified
        }
        _ => CryptoKeyPurpose::AsymmetricSign,
    }
}

fn generate_key(algorithm: Algorithm) -> std::io::Result<Option<PKey<Private>>> {
    let ec = |nid| -> Result<PKey<Private>, openssl::error::ErrorStack> {
        let group = EcGroup::from_curve_name(nid)?;
        PKey::from_ec_key(EcKey::generate(&group)?)
    };
    let rsa = |bits| -> Result<PKey<Private>, openssl::error::ErrorStack> {
        PKey::from_rsa(Rsa::generate(bits)?)
    };

    let key = match algorithm {
        Algorithm::EcSignP256Sha256 => ec(Nid::X9_62_PRIME256V1),
        Algorithm::EcSignP384Sha384 => ec(Nid::SECP384R1),
        Algorithm::EcSignSecp256K1Sha256 => ec(Nid::SECP256K1),

        Algorithm::RsaSignPss2048Sha256
        | Algorithm::RsaSignPkcs12048Sha256
        | Algorithm::RsaSignRawPkcs12048
        | Algorithm::RsaDecryptOaep2048Sha256 => rsa(2048),

        Algorithm::RsaSignPss3072Sha256
        | Algorithm::RsaSignPkcs13072Sha256
        | Algorithm::RsaSignRawPkcs13072
        | Algorithm::RsaDecryptOaep3072Sha256 => rsa(3072),

        Algorithm::RsaSignPss4096Sha256
        | Algorithm::RsaSignPss4096Sha512
        | Algorithm::RsaSignPkcs14096Sha256
        | Algorithm::RsaSignPkcs14096Sha512
        | Algorithm::RsaSignRawPkcs14096
        | Algorithm::RsaDecryptOaep4096Sha256
        | Algorithm::RsaDecryptOaep4096Sha512 => rsa(4096),

        Algorithm::GoogleSymmetricEncryption
        | Algorithm::HmacSha256
        | Algorithm::CryptoKeyVersionAlgorithmUnspecified => return Ok(None),
    };

    key.map(Some).map_err(internal)
}

fn sign(algorithm: Algorithm, key: &PKey<Private>, digest: &[u8]) -> std::io::Result<Vec<u8>> {
    match algorithm {
        Algorithm::EcSignP256Sha256
        | Algorithm::EcSignP384Sha384
        | Algorithm::EcSignSecp256K1Sha256 => {
            let ec_key = key.ec_key().map_err(internal)?;
            let signature = EcdsaSig::sign(digest, &ec_key).map_err(internal)?;
            signature.to_der().map_err(internal)
        }

        Algorithm::RsaSignPkcs12048Sha256
        | Algorithm::RsaSignPkcs13072Sha256
        | Algorithm::RsaSignPkcs14096Sha256 => {
            rsa_sign(key, Padding::PKCS1, Some(Md::sha256()), digest)
        }
        Algorithm::RsaSignPkcs14096Sha512 => {
            rsa_sign(key, Padding::PKCS1, Some(Md::sha512()), digest)
        }
        Algorithm::RsaSignPss2048Sha256
        | Algorithm::RsaSignPss3072Sha256
        | Algorithm::RsaSignPss4096Sha256 => {
            rsa_sign(key, Padding::PKCS1_PSS, Some(Md::sha256()), digest)
        }
        Algorithm::RsaSignPss4096Sha512 => {
            rsa_sign(key, Padding::PKCS1_PSS, Some(Md::sha512()), digest)
        }
        Algorithm::RsaSignRawPkcs12048
        | Algorithm::RsaSignRawPkcs13072
        | Algorithm::RsaSignRawPkcs14096 => rsa_sign(key, Padding::PKCS1, None, digest),

        _ => Err(failed_precondition("key version cannot sign")),
    }
}

fn rsa_sign(
    key: &PKey<Private>,
    padding: Padding,
    md: Option<&openssl::md::MdRef>,
    digest: &[u8],
) -> std::io::Result<Vec<u8>> {
    let mut ctx = PkeyCtx::new(key).map_err(internal)?;
    ctx.sign_init().map_err(internal)?;
    ctx.set_rsa_padding(padding).map_err(internal)?;
    if let Some(md) = md {
        ctx.set_signature_md(md).map_err(internal)?;
    }
    if padding == Padding::PKCS1_PSS {
        ctx.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)
            .map_err(internal)?;
    }

    let mut signature = vec![];
    ctx.sign_to_vec(digest, &mut signature).map_err(internal)?;
    Ok(signature)
}

fn not_found(name: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotFound, format!("{name} not found"))
}

fn failed_precondition(message: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, message.to_owned())
}

fn internal<E>(err: E) -> std::io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    std::io::Error::new(std::io::ErrorKind::Other, err)
}
