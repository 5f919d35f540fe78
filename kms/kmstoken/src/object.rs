// Copyright (c) Microsoft. All rights reserved.

use kms_common::{CryptoKeyVersion, ProtectionLevel};
use openssl::pkey::{Id, PKey, PKeyRef, Public};
use openssl::x509::{X509Ref, X509};
use pkcs11_sys::{CK_OBJECT_CLASS, CKK_EC, CKK_RSA, CKO_CERTIFICATE, CKO_PRIVATE_KEY, CKO_PUBLIC_KEY};

use crate::algorithm::{get_details, AlgorithmDetails};
use crate::Error;

/// A public key, private key or certificate derived from one remote key version.
#[derive(Debug)]
pub struct Object {
    kms_key_name: String,
    object_class: CK_OBJECT_CLASS,
    algorithm: &'static AlgorithmDetails,
    protection_level: ProtectionLevel,
    public_key_der: Vec<u8>,
    certificate_der: Option<Vec<u8>>,
}

/// The public and private objects of one key version.
#[derive(Debug)]
pub struct KeyPair {
    pub public_key: Object,
    pub private_key: Object,
}

impl Object {
    pub fn new_key_pair(
        ckv: &CryptoKeyVersion,
        public_key: &PKeyRef<Public>,
    ) -> Result<KeyPair, Error> {
        let algorithm = get_details(ckv.algorithm)?;
        check_public_key(algorithm, public_key)?;

        let public_key_der = public_key.public_key_to_der()?;

        let object = |object_class| Object {
            kms_key_name: ckv.name.clone(),
            object_class,
            algorithm,
            protection_level: ckv.protection_level,
            public_key_der: public_key_der.clone(),
            certificate_der: None,
        };

        Ok(KeyPair {
            public_key: object(CKO_PUBLIC_KEY),
            private_key: object(CKO_PRIVATE_KEY),
        })
    }

    pub fn new_certificate(ckv: &CryptoKeyVersion, certificate: &X509Ref) -> Result<Object, Error> {
        let algorithm = get_details(ckv.algorithm)?;

        let public_key = certificate.public_key()?;
        check_public_key(algorithm, &public_key)?;

        Ok(Object {
            kms_key_name: ckv.name.clone(),
            object_class: CKO_CERTIFICATE,
            algorithm,
            protection_level: ckv.protection_level,
            public_key_der: public_key.public_key_to_der()?,
            certificate_der: Some(certificate.to_der()?),
        })
    }

    /// The resource name of the remote key version.
    pub fn kms_key_name(&self) -> &str {
        &self.kms_key_name
    }

    pub fn object_class(&self) -> CK_OBJECT_CLASS {
        self.object_class
    }

    pub fn algorithm(&self) -> &'static AlgorithmDetails {
        self.algorithm
    }

    pub fn protection_level(&self) -> ProtectionLevel {
        self.protection_level
    }

    /// DER-encoded SubjectPublicKeyInfo.
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    pub fn public_key(&self) -> Result<PKey<Public>, Error> {
        Ok(PKey::public_key_from_der(&self.public_key_der)?)
    }

    /// DER-encoded certificate. Only certificate objects have one.
    pub fn certificate_der(&self) -> Option<&[u8]> {
        self.certificate_der.as_deref()
    }

    pub fn certificate(&self) -> Result<Option<X509>, Error> {
        match &self.certificate_der {
            Some(der) => Ok(Some(X509::from_der(der)?)),
            None => Ok(None),
        }
    }
}

fn check_public_key(algorithm: &AlgorithmDetails, public_key: &PKeyRef<Public>) -> Result<(), Error> {
    let expected_id = if algorithm.key_type == CKK_EC {
        Id::EC
    } else if algorithm.key_type == CKK_RSA {
        Id::RSA
    } else {
        return Err(Error::internal(format!(
            "unexpected key type {}",
            algorithm.key_type
        )));
    };
    let bits = public_key.bits();

    if public_key.id() != expected_id {
        return Err(Error::invalid_argument(format!(
            "public key type {:?} does not match algorithm {:?}",
            public_key.id(),
            algorithm.algorithm,
        )));
    }

    if usize::try_from(bits).ok() != Some(algorithm.key_bit_length) {
        return Err(Error::invalid_argument(format!(
            "public key size {bits} does not match algorithm {:?}",
            algorithm.algorithm,
        )));
    }

    Ok(())
}
