// Copyright (c) Microsoft. All rights reserved.

use kms_common::{CryptoKeyPurpose, CryptoKeyVersion};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, PKeyRef, Private, Public};
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Name, X509};

use crate::algorithm::get_details;
use crate::Error;

const CA_COMMON_NAME: &str = "Cloud KMS Token Issuer";

const CA_VALIDITY_DAYS: u32 = 10 * 365;
const CERTIFICATE_VALIDITY_DAYS: u32 = 10 * 365;

/// Issues certificates for remote keys, for applications that can only use a key through its certificate.
///
/// The authority's own key is generated in memory and lives only as long as the authority.
pub struct CertAuthority {
    key: PKey<Private>,
    certificate: X509,
}

impl CertAuthority {
    pub fn new() -> Result<Self, Error> {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
        let key = PKey::from_ec_key(EcKey::generate(&group)?)?;

        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        builder.set_serial_number(&*random_serial()?)?;

        let subject_name = common_name(CA_COMMON_NAME)?;
        builder.set_subject_name(&subject_name)?;
        builder.set_issuer_name(&subject_name)?;
        builder.set_pubkey(&key)?;

        let not_before = Asn1Time::days_from_now(0)?;
        builder.set_not_before(&not_before)?;
        let not_after = Asn1Time::days_from_now(CA_VALIDITY_DAYS)?;
        builder.set_not_after(&not_after)?;

        builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .key_cert_sign()
                .crl_sign()
                .build()?,
        )?;

        builder.sign(&key, MessageDigest::sha256())?;

        Ok(CertAuthority {
            key,
            certificate: builder.build(),
        })
    }

    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    /// Issues a certificate binding `public_key` to the key version `ckv`.
    pub fn generate_certificate(
        &self,
        ckv: &CryptoKeyVersion,
        public_key: &PKeyRef<Public>,
    ) -> Result<X509, Error> {
        let algorithm = get_details(ckv.algorithm)?;

        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        builder.set_serial_number(&*random_serial()?)?;

        let subject_name = common_name(&ckv.short_name())?;
        builder.set_subject_name(&subject_name)?;
        builder.set_issuer_name(self.certificate.subject_name())?;
        builder.set_pubkey(public_key)?;

        let not_before = Asn1Time::days_from_now(0)?;
        builder.set_not_before(&not_before)?;
        let not_after = Asn1Time::days_from_now(CERTIFICATE_VALIDITY_DAYS)?;
        builder.set_not_after(&not_after)?;

        let mut key_usage = KeyUsage::new();
        key_usage.critical();
        match algorithm.purpose {
            CryptoKeyPurpose::AsymmetricSign => key_usage.digital_signature(),
            CryptoKeyPurpose::AsymmetricDecrypt => key_usage.key_encipherment(),
            purpose => {
                return Err(Error::invalid_argument(format!(
                    "cannot issue a certificate for purpose {purpose:?}"
                )))
            }
        };
        builder.append_extension(key_usage.build()?)?;
        builder.append_extension(BasicConstraints::new().critical().build()?)?;

        builder.sign(&self.key, MessageDigest::sha256())?;

        Ok(builder.build())
    }
}

impl std::fmt::Debug for CertAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertAuthority").finish_non_exhaustive()
    }
}

fn common_name(common_name: &str) -> Result<X509Name, Error> {
    let mut name = X509Name::builder()?;
    name.append_entry_by_text("CN", common_name)?;
    Ok(name.build())
}

fn random_serial() -> Result<openssl::asn1::Asn1Integer, Error> {
    let mut serial = BigNum::new()?;
    serial.rand(159, MsbOption::MAYBE_ZERO, false)?;
    Ok(serial.to_asn1_integer()?)
}
