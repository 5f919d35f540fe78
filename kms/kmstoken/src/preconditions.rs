// Copyright (c) Microsoft. All rights reserved.

use pkcs11_sys::{
    CK_KEY_TYPE, CK_MECHANISM_TYPE, CK_OBJECT_CLASS, CKR_KEY_FUNCTION_NOT_PERMITTED,
    CKR_KEY_TYPE_INCONSISTENT,
};

use crate::{Error, Object};

/// Checks that `object` may be used for an operation that needs a key of `key_type` and
/// `object_class` with `mechanism`.
///
/// A key type mismatch is reported before any other problem.
pub fn check_key_preconditions(
    key_type: CK_KEY_TYPE,
    object_class: CK_OBJECT_CLASS,
    mechanism: CK_MECHANISM_TYPE,
    object: &Object,
) -> Result<(), Error> {
    let algorithm = object.algorithm();

    if algorithm.key_type != key_type {
        return Err(Error::invalid_argument(format!(
            "key type {} does not match required type {}",
            algorithm.key_type, key_type,
        ))
        .with_rv(CKR_KEY_TYPE_INCONSISTENT));
    }

    if object.object_class() != object_class {
        return Err(Error::invalid_argument(format!(
            "object class {} does not match required class {}",
            object.object_class(),
            object_class,
        ))
        .with_rv(CKR_KEY_FUNCTION_NOT_PERMITTED));
    }

    if !algorithm.allowed_mechanisms.contains(&mechanism) {
        return Err(Error::invalid_argument(format!(
            "mechanism {} is not permitted for algorithm {:?}",
            mechanism, algorithm.algorithm,
        ))
        .with_rv(CKR_KEY_FUNCTION_NOT_PERMITTED));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use kms_common::{
        CryptoKeyVersion, CryptoKeyVersionAlgorithm, CryptoKeyVersionState, ProtectionLevel,
    };
    use openssl::ec::{EcGroup, EcKey};
    use openssl::nid::Nid;
    use openssl::pkey::PKey;
    use pkcs11_sys::{
        CKK_EC, CKK_RSA, CKM_ECDSA, CKM_RSA_PKCS, CKO_PRIVATE_KEY, CKO_PUBLIC_KEY,
        CKR_KEY_FUNCTION_NOT_PERMITTED, CKR_KEY_TYPE_INCONSISTENT,
    };

    use crate::object::{KeyPair, Object};

    fn ec_key_pair() -> KeyPair {
        let ckv = CryptoKeyVersion {
            name: "projects/p/locations/l/keyRings/kr/cryptoKeys/ck/cryptoKeyVersions/1"
                .to_owned(),
            state: CryptoKeyVersionState::Enabled,
            protection_level: ProtectionLevel::Hsm,
            algorithm: CryptoKeyVersionAlgorithm::EcSignP256Sha256,
        };

        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
        let public_key = PKey::public_key_from_der(&key.public_key_to_der().unwrap()).unwrap();

        Object::new_key_pair(&ckv, &public_key).unwrap()
    }

    #[test]
    fn matching_key() {
        let pair = ec_key_pair();
        super::check_key_preconditions(CKK_EC, CKO_PRIVATE_KEY, CKM_ECDSA, &pair.private_key)
            .unwrap();
    }

    #[test]
    fn key_type_mismatch() {
        let pair = ec_key_pair();
        let err = super::check_key_preconditions(
            CKK_RSA,
            CKO_PRIVATE_KEY,
            CKM_ECDSA,
            &pair.private_key,
        )
        .unwrap_err();
        assert_eq!(err.rv(), CKR_KEY_TYPE_INCONSISTENT);
    }

    #[test]
    fn key_type_mismatch_takes_priority() {
        let pair = ec_key_pair();
        let err = super::check_key_preconditions(
            CKK_RSA,
            CKO_PRIVATE_KEY,
            CKM_RSA_PKCS,
            &pair.public_key,
        )
        .unwrap_err();
        assert_eq!(err.rv(), CKR_KEY_TYPE_INCONSISTENT);
    }

    #[test]
    fn object_class_mismatch() {
        let pair = ec_key_pair();
        let err = super::check_key_preconditions(
            CKK_EC,
            CKO_PUBLIC_KEY,
            CKM_ECDSA,
            &pair.private_key,
        )
        .unwrap_err();
        assert_eq!(err.rv(), CKR_KEY_FUNCTION_NOT_PERMITTED);
    }

    #[test]
    fn mechanism_not_permitted() {
        let pair = ec_key_pair();
        let err = super::check_key_preconditions(
            CKK_EC,
            CKO_PRIVATE_KEY,
            CKM_RSA_PKCS,
            &pair.private_key,
        )
        .unwrap_err();
        assert_eq!(err.rv(), CKR_KEY_FUNCTION_NOT_PERMITTED);
    }
}
