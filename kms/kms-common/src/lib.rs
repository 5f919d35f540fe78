// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! Resources of the remote key management service and the client interface used to reach it.
//!
//! Only the parts of the resources that the token reads are modeled. Enum values use the
//! service's JSON spelling so that snapshots can be persisted and reloaded.

use base64::Engine;

/// A key in a key ring. Keys own one or more versions.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CryptoKey {
    /// `projects/*/locations/*/keyRings/*/cryptoKeys/*`
    pub name: String,

    pub purpose: CryptoKeyPurpose,

    /// Settings new versions of this key are created with.
    pub version_template: CryptoKeyVersionTemplate,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CryptoKeyVersionTemplate {
    pub protection_level: ProtectionLevel,
    pub algorithm: CryptoKeyVersionAlgorithm,
}

/// A single version of a key, holding the actual key material.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CryptoKeyVersion {
    /// `projects/*/locations/*/keyRings/*/cryptoKeys/*/cryptoKeyVersions/*`
    pub name: String,

    pub state: CryptoKeyVersionState,
    pub protection_level: ProtectionLevel,
    pub algorithm: CryptoKeyVersionAlgorithm,
}

impl CryptoKeyVersion {
    /// The trailing `<key id>/cryptoKeyVersions/<version id>` segment pair, as `<key id>-<version id>`.
    pub fn short_name(&self) -> String {
        let mut segments = self.name.rsplit('/');
        let version = segments.next().unwrap_or_default();
        let _ = segments.next();
        let key = segments.next().unwrap_or_default();
        format!("{key}-{version}")
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CryptoKeyPurpose {
    EncryptDecrypt,
    AsymmetricSign,
    AsymmetricDecrypt,
    Mac,

    #[serde(other)]
    CryptoKeyPurposeUnspecified,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CryptoKeyVersionState {
    PendingGeneration,
    Enabled,
    Disabled,
    Destroyed,
    DestroyScheduled,
    PendingImport,
    ImportFailed,

    #[serde(other)]
    CryptoKeyVersionStateUnspecified,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtectionLevel {
    Software,
    Hsm,
    External,
    ExternalVpc,

    #[serde(other)]
    ProtectionLevelUnspecified,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CryptoKeyVersionAlgorithm {
    GoogleSymmetricEncryption,

    #[serde(rename = "RSA_SIGN_PSS_2048_SHA256")]
    RsaSignPss2048Sha256,
    #[serde(rename = "RSA_SIGN_PSS_3072_SHA256")]
    RsaSignPss3072Sha256,
    #[serde(rename = "RSA_SIGN_PSS_4096_SHA256")]
    RsaSignPss4096Sha256,
    #[serde(rename = "RSA_SIGN_PSS_4096_SHA512")]
    RsaSignPss4096Sha512,

    #[serde(rename = "RSA_SIGN_PKCS1_2048_SHA256")]
    RsaSignPkcs12048Sha256,
    #[serde(rename = "RSA_SIGN_PKCS1_3072_SHA256")]
    RsaSignPkcs13072Sha256,
    #[serde(rename = "RSA_SIGN_PKCS1_4096_SHA256")]
    RsaSignPkcs14096Sha256,
    #[serde(rename = "RSA_SIGN_PKCS1_4096_SHA512")]
    RsaSignPkcs14096Sha512,

    #[serde(rename = "RSA_SIGN_RAW_PKCS1_2048")]
    RsaSignRawPkcs12048,
    #[serde(rename = "RSA_SIGN_RAW_PKCS1_3072")]
    RsaSignRawPkcs13072,
    #[serde(rename = "RSA_SIGN_RAW_PKCS1_4096")]
    RsaSignRawPkcs14096,

    #[serde(rename = "RSA_DECRYPT_OAEP_2048_SHA256")]
    RsaDecryptOaep2048Sha256,
    #[serde(rename = "RSA_DECRYPT_OAEP_3072_SHA256")]
    RsaDecryptOaep3072Sha256,
    #[serde(rename = "RSA_DECRYPT_OAEP_4096_SHA256")]
    RsaDecryptOaep4096Sha256,
    #[serde(rename = "RSA_DECRYPT_OAEP_4096_SHA512")]
    RsaDecryptOaep4096Sha512,

    EcSignP256Sha256,
    EcSignP384Sha384,
    #[serde(rename = "EC_SIGN_SECP256K1_SHA256")]
    EcSignSecp256K1Sha256,

    HmacSha256,

    #[serde(other)]
    CryptoKeyVersionAlgorithmUnspecified,
}

/// The public half of an asymmetric key version.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PublicKey {
    pub pem: String,
    pub algorithm: CryptoKeyVersionAlgorithm,
}

/// A client of the remote key management service.
///
/// List operations return every item, following pagination internally.
/// Errors are opaque to callers.
pub trait KmsClient: Send + Sync {
    fn list_crypto_keys(&self, key_ring_name: &str) -> std::io::Result<Vec<CryptoKey>>;

    fn list_crypto_key_versions(
        &self,
        crypto_key_name: &str,
    ) -> std::io::Result<Vec<CryptoKeyVersion>>;

    fn get_public_key(&self, crypto_key_version_name: &str) -> std::io::Result<PublicKey>;

    /// Signs a precomputed digest. ECDSA signatures are returned DER-encoded.
    fn asymmetric_sign(
        &self,
        crypto_key_version_name: &str,
        digest: &[u8],
    ) -> std::io::Result<Vec<u8>>;
}

/// Bytes that serialize as a base64-encoded string.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ByteString(pub Vec<u8>);

impl<'de> serde::Deserialize<'de> for ByteString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct Visitor;

        impl<'de> serde::de::Visitor<'de> for Visitor {
            type Value = ByteString;

            fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(formatter, "a base64-encoded string")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(ByteString(
                    base64::engine::general_purpose::STANDARD
                        .decode(v)
                        .map_err(serde::de::Error::custom)?,
                ))
            }
        }

        deserializer.deserialize_str(Visitor)
    }
}

impl serde::Serialize for ByteString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(&self.0))
    }
}
