// Copyright (c) Microsoft. All rights reserved.

use kms_common::{CryptoKeyPurpose, CryptoKeyVersionAlgorithm};
use pkcs11_sys::{
    CK_KEY_TYPE, CK_MECHANISM_TYPE, CKK_EC, CKK_RSA, CKM_ECDSA, CKM_ECDSA_SHA256,
    CKM_ECDSA_SHA384, CKM_RSA_PKCS, CKM_RSA_PKCS_OAEP, CKM_RSA_PKCS_PSS, CKM_SHA256_RSA_PKCS,
    CKM_SHA256_RSA_PKCS_PSS, CKM_SHA512_RSA_PKCS, CKM_SHA512_RSA_PKCS_PSS,
};

use crate::Error;

/// What the token knows about a remote key algorithm.
#[derive(Debug, Eq, PartialEq)]
pub struct AlgorithmDetails {
    pub algorithm: CryptoKeyVersionAlgorithm,
    pub purpose: CryptoKeyPurpose,
    pub key_type: CK_KEY_TYPE,
    pub key_bit_length: usize,
    pub allowed_mechanisms: &'static [CK_MECHANISM_TYPE],

    /// Length of the digest the remote service expects to sign, if the algorithm signs digests.
    pub digest_length: Option<usize>,
}

impl AlgorithmDetails {
    /// Length of a signature produced with this algorithm.
    ///
    /// ECDSA signatures are measured in their fixed-length `r || s` form.
    pub fn signature_length(&self) -> Option<usize> {
        if self.purpose != CryptoKeyPurpose::AsymmetricSign {
            return None;
        }

        if self.key_type == CKK_EC {
            Some(2 * ((self.key_bit_length + 7) / 8))
        } else {
            Some(self.key_bit_length / 8)
        }
    }
}

macro_rules! rsa {
    ($algorithm:ident, $purpose:ident, $bits:expr, $mechanisms:expr, $digest:expr) => {
        AlgorithmDetails {
            algorithm: CryptoKeyVersionAlgorithm::$algorithm,
            purpose: CryptoKeyPurpose::$purpose,
            key_type: CKK_RSA,
            key_bit_length: $bits,
            allowed_mechanisms: $mechanisms,
            digest_length: $digest,
        }
    };
}

const PKCS1_SHA256: &[CK_MECHANISM_TYPE] = &[CKM_RSA_PKCS, CKM_SHA256_RSA_PKCS];
const PKCS1_SHA512: &[CK_MECHANISM_TYPE] = &[CKM_RSA_PKCS, CKM_SHA512_RSA_PKCS];
const PSS_SHA256: &[CK_MECHANISM_TYPE] = &[CKM_RSA_PKCS_PSS, CKM_SHA256_RSA_PKCS_PSS];
const PSS_SHA512: &[CK_MECHANISM_TYPE] = &[CKM_RSA_PKCS_PSS, CKM_SHA512_RSA_PKCS_PSS];
const RAW_PKCS1: &[CK_MECHANISM_TYPE] = &[CKM_RSA_PKCS];
const OAEP: &[CK_MECHANISM_TYPE] = &[CKM_RSA_PKCS_OAEP];

static ALGORITHMS: &[AlgorithmDetails] = &[
    AlgorithmDetails {
        algorithm: CryptoKeyVersionAlgorithm::EcSignP256Sha256,
        purpose: CryptoKeyPurpose::AsymmetricSign,
        key_type: CKK_EC,
        key_bit_length: 256,
        allowed_mechanisms: &[CKM_ECDSA, CKM_ECDSA_SHA256],
        digest_length: Some(32),
    },
    AlgorithmDetails {
        algorithm: CryptoKeyVersionAlgorithm::EcSignP384Sha384,
        purpose: CryptoKeyPurpose::AsymmetricSign,
        key_type: CKK_EC,
        key_bit_length: 384,
        allowed_mechanisms: &[CKM_ECDSA, CKM_ECDSA_SHA384],
        digest_length: Some(48),
    },
    rsa!(RsaSignPkcs12048Sha256, AsymmetricSign, 2048, PKCS1_SHA256, Some(32)),
    rsa!(RsaSignPkcs13072Sha256, AsymmetricSign, 3072, PKCS1_SHA256, Some(32)),
    rsa!(RsaSignPkcs14096Sha256, AsymmetricSign, 4096, PKCS1_SHA256, Some(32)),
    rsa!(RsaSignPkcs14096Sha512, AsymmetricSign, 4096, PKCS1_SHA512, Some(64)),
    rsa!(RsaSignPss2048Sha256, AsymmetricSign, 2048, PSS_SHA256, Some(32)),
    rsa!(RsaSignPss3072Sha256, AsymmetricSign, 3072, PSS_SHA256, Some(32)),
    rsa!(RsaSignPss4096Sha256, AsymmetricSign, 4096, PSS_SHA256, Some(32)),
    rsa!(RsaSignPss4096Sha512, AsymmetricSign, 4096, PSS_SHA512, Some(64)),
    rsa!(RsaSignRawPkcs12048, AsymmetricSign, 2048, RAW_PKCS1, None),
    rsa!(RsaSignRawPkcs13072, AsymmetricSign, 3072, RAW_PKCS1, None),
    rsa!(RsaSignRawPkcs14096, AsymmetricSign, 4096, RAW_PKCS1, None),
    rsa!(RsaDecryptOaep2048Sha256, AsymmetricDecrypt, 2048, OAEP, None),
    rsa!(RsaDecryptOaep3072Sha256, AsymmetricDecrypt, 3072, OAEP, None),
    rsa!(RsaDecryptOaep4096Sha256, AsymmetricDecrypt, 4096, OAEP, None),
    rsa!(RsaDecryptOaep4096Sha512, AsymmetricDecrypt, 4096, OAEP, None),
];

/// Looks up the details of a remote algorithm. Algorithms the token cannot expose fail `NotSupported`.
pub fn get_details(algorithm: CryptoKeyVersionAlgorithm) -> Result<&'static AlgorithmDetails, Error> {
    ALGORITHMS
        .iter()
        .find(|details| details.algorithm == algorithm)
        .ok_or_else(|| Error::not_supported(format!("algorithm {algorithm:?} is not supported")))
}
