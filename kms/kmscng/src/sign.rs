// Copyright (c) Microsoft. All rights reserved.

use kms_common::{CryptoKeyVersionAlgorithm, KmsClient, ProtectionLevel};
use kmstoken::{check_key_preconditions, Error, Object};
use ncrypt_sys::{NTE_INTERNAL_ERROR, NTE_INVALID_PARAMETER, NTE_NOT_SUPPORTED};
use openssl::ecdsa::EcdsaSig;
use pkcs11_sys::{CKK_EC, CKM_ECDSA, CKO_PRIVATE_KEY};

use crate::ErrorExt;

/// Checks that `object` is a private key this provider can sign with.
pub(crate) fn check_signing_preconditions(object: &Object) -> Result<(), Error> {
    check_key_preconditions(CKK_EC, CKO_PRIVATE_KEY, CKM_ECDSA, object).map_err(|err| {
        Error::not_supported(format!(
            "{} cannot be used for signing",
            object.kms_key_name()
        ))
        .with_status(NTE_NOT_SUPPORTED)
        .with_source(err)
    })?;

    match object.algorithm().algorithm {
        CryptoKeyVersionAlgorithm::EcSignP256Sha256
        | CryptoKeyVersionAlgorithm::EcSignP384Sha384 => (),
        algorithm => {
            return Err(
                Error::not_supported(format!("unsupported algorithm {algorithm:?}"))
                    .with_status(NTE_NOT_SUPPORTED),
            )
        }
    }

    if object.protection_level() != ProtectionLevel::Hsm {
        return Err(Error::not_supported(format!(
            "unsupported protection level {:?}",
            object.protection_level()
        ))
        .with_status(NTE_NOT_SUPPORTED));
    }

    Ok(())
}

pub(crate) fn check_digest_length(object: &Object, digest: &[u8]) -> Result<(), Error> {
    let expected = object.algorithm().digest_length;
    if expected != Some(digest.len()) {
        return Err(Error::invalid_argument(format!(
            "digest length {} does not match expected length {expected:?}",
            digest.len()
        ))
        .with_status(NTE_INVALID_PARAMETER));
    }

    Ok(())
}

/// Length of a signature made with `object`, in its fixed-length `r || s` form.
pub(crate) fn signature_length(object: &Object) -> Result<usize, Error> {
    object.algorithm().signature_length().ok_or_else(|| {
        Error::not_supported(format!("{} cannot sign", object.kms_key_name()))
            .with_status(NTE_NOT_SUPPORTED)
    })
}

/// Signs `digest` remotely and writes the signature to `signature`, which must be exactly
/// [`signature_length`] bytes long.
pub(crate) fn sign_digest(
    client: &dyn KmsClient,
    object: &Object,
    digest: &[u8],
    signature: &mut [u8],
) -> Result<(), Error> {
    let der = client
        .asymmetric_sign(object.kms_key_name(), digest)
        .map_err(|err| {
            Error::internal(format!("could not sign with {}", object.kms_key_name()))
                .with_status(NTE_INTERNAL_ERROR)
                .with_source(err)
        })?;

    let p1363 = der_to_p1363(&der, signature.len())?;
    signature.copy_from_slice(&p1363);

    log::debug!(
        "signed {}-byte digest with {}",
        digest.len(),
        object.kms_key_name()
    );

    Ok(())
}

/// Converts a DER-encoded ECDSA signature to the `r || s` form with each half `len / 2` bytes.
fn der_to_p1363(der: &[u8], len: usize) -> Result<Vec<u8>, Error> {
    let parse_error = |err| {
        Error::internal("could not parse ECDSA signature")
            .with_status(NTE_INTERNAL_ERROR)
            .with_source(err)
    };

    let sig = EcdsaSig::from_der(der).map_err(parse_error)?;

    let half = i32::try_from(len / 2).map_err(|err| {
        Error::internal("signature length is out of range")
            .with_status(NTE_INTERNAL_ERROR)
            .with_source(err)
    })?;

    let mut result = sig.r().to_vec_padded(half).map_err(parse_error)?;
    result.extend(sig.s().to_vec_padded(half).map_err(parse_error)?);
    Ok(result)
}
