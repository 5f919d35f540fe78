// Copyright (c) Microsoft. All rights reserved.

//! Key storage provider operations over the tokens' object stores.
//!
//! Every operation validates its arguments in a fixed order before doing any work:
//! the top-level handle, then handle resolution (including that a key belongs to the given provider),
//! then required pointers, then flags.
//!
//! Variable-length outputs follow the buffer-query convention. The required size is always written
//! to `result`. A missing output buffer is a size query. An output buffer that is too short fails with
//! `NTE_BUFFER_TOO_SMALL` and is left untouched.

use std::sync::Arc;

use kms_common::KmsClient;
use kmstoken::{Config, Error, HandleRegistry, Object, Token};
use ncrypt_sys::{
    AT_KEYEXCHANGE, AT_SIGNATURE, BCRYPT_ECDSA_P256_ALGORITHM, BCRYPT_ECDSA_P384_ALGORITHM, DWORD,
    NCRYPT_KEY_HANDLE, NCRYPT_MACHINE_KEY_FLAG, NCRYPT_PROV_HANDLE, NCRYPT_SILENT_FLAG,
    NTE_BAD_FLAGS, NTE_BAD_KEYSET, NTE_BUFFER_TOO_SMALL, NTE_INTERNAL_ERROR, NTE_INVALID_HANDLE,
    NTE_INVALID_PARAMETER, NTE_NOT_SUPPORTED, WCHAR,
};
use pkcs11_sys::{CK_SLOT_ID, CK_ULONG, CKO_CERTIFICATE, CKO_PRIVATE_KEY};

use crate::{ErrorExt, Key, PropertyTable, Provider, DEFAULT_PROVIDER_NAME};

pub struct Bridge {
    provider_name: String,
    properties: PropertyTable,
    tokens: Vec<Token>,
    client: Arc<dyn KmsClient>,
    providers: HandleRegistry<Provider, NCRYPT_PROV_HANDLE>,
    keys: HandleRegistry<Key, NCRYPT_KEY_HANDLE>,
}

impl Bridge {
    /// Loads one token per configured key ring, in slot order.
    pub fn new(config: &Config, client: Arc<dyn KmsClient>) -> Result<Self, Error> {
        let mut tokens = Vec::with_capacity(config.tokens.len());
        for (slot_id, token_config) in config.tokens.iter().enumerate() {
            let slot_id = CK_ULONG::try_from(slot_id).map_err(|err| {
                Error::internal("too many tokens")
                    .with_status(NTE_INTERNAL_ERROR)
                    .with_source(err)
            })?;
            let token = Token::new(
                CK_SLOT_ID(slot_id),
                token_config,
                &*client,
                config.generate_certs,
            )
            .map_err(|err| {
                // Drop the token's CK_RV code so the kind picks the status.
                Error::new(
                    err.kind(),
                    format!("could not load token for {}", token_config.key_ring),
                )
                .with_source(err)
            })?;
            tokens.push(token);
        }

        let provider_name = config
            .provider_name
            .clone()
            .unwrap_or_else(|| DEFAULT_PROVIDER_NAME.to_owned());

        Ok(Bridge::from_tokens(
            provider_name,
            PropertyTable::default(),
            tokens,
            client,
        ))
    }

    pub fn from_tokens(
        provider_name: impl Into<String>,
        properties: PropertyTable,
        tokens: Vec<Token>,
        client: Arc<dyn KmsClient>,
    ) -> Self {
        let not_found_code = crate::status_code(NTE_INVALID_HANDLE);

        Bridge {
            provider_name: provider_name.into(),
            properties,
            tokens,
            client,
            providers: HandleRegistry::new(not_found_code),
            keys: HandleRegistry::new(not_found_code),
        }
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn open_provider(
        &self,
        provider_out: Option<&mut NCRYPT_PROV_HANDLE>,
        provider_name: Option<&[WCHAR]>,
        flags: DWORD,
    ) -> Result<(), Error> {
        let provider_out = provider_out.ok_or_else(|| null_parameter("provider handle"))?;
        let provider_name = provider_name.ok_or_else(|| null_parameter("provider name"))?;
        let provider_name = crate::wide::decode(provider_name, "provider name")?;
        if provider_name != self.provider_name {
            return Err(Error::invalid_argument(format!(
                "unexpected provider name {provider_name:?}"
            ))
            .with_status(NTE_INVALID_PARAMETER));
        }
        validate_flags(flags)?;

        let provider = Provider::new(&self.properties);
        let handle = self.providers.add(Arc::new(provider))?;
        *provider_out = handle;

        log::debug!("opened provider {handle:#x}");
        Ok(())
    }

    /// Frees `provider` and every key opened under it.
    pub fn free_provider(&self, provider: NCRYPT_PROV_HANDLE) -> Result<(), Error> {
        self.provider(provider)?;
        self.providers.remove(provider)?;

        let keys = self.keys.find(
            |key| key.provider() == provider,
            None::<fn(&Key, &Key) -> std::cmp::Ordering>,
        );
        for key in keys {
            // A concurrent free_key may have removed it already.
            if let Err(err) = self.keys.remove(key) {
                log::debug!("key {key:#x} of provider {provider:#x} was already freed: {err}");
            }
        }

        log::debug!("freed provider {provider:#x}");
        Ok(())
    }

    pub fn get_provider_property(
        &self,
        provider: NCRYPT_PROV_HANDLE,
        property: Option<&[WCHAR]>,
        output: Option<&mut [u8]>,
        result: Option<&mut DWORD>,
        flags: DWORD,
    ) -> Result<(), Error> {
        let provider = self.provider(provider)?;
        let property = property.ok_or_else(|| null_parameter("property name"))?;
        let result = result.ok_or_else(|| null_parameter("result size"))?;
        validate_flags(flags)?;

        let property = crate::wide::decode(property, "property name")?;
        let value = provider.get_property(&property)?;
        write_output(&value, output, result)
    }

    pub fn set_provider_property(
        &self,
        provider: NCRYPT_PROV_HANDLE,
        property: Option<&[WCHAR]>,
        input: Option<&[u8]>,
        flags: DWORD,
    ) -> Result<(), Error> {
        let provider = self.provider(provider)?;
        let property = property.ok_or_else(|| null_parameter("property name"))?;
        let input = input.ok_or_else(|| null_parameter("input buffer"))?;
        validate_flags(flags)?;

        let property = crate::wide::decode(property, "property name")?;
        provider.set_property(&property, input)
    }

    /// Opens the private key of the remote key version named `key_name`.
    pub fn open_key(
        &self,
        provider: NCRYPT_PROV_HANDLE,
        key_out: Option<&mut NCRYPT_KEY_HANDLE>,
        key_name: Option<&[WCHAR]>,
        legacy_key_spec: DWORD,
        flags: DWORD,
    ) -> Result<(), Error> {
        self.provider(provider)?;
        let key_out = key_out.ok_or_else(|| null_parameter("key handle"))?;
        let key_name = key_name.ok_or_else(|| null_parameter("key name"))?;
        if legacy_key_spec != AT_KEYEXCHANGE && legacy_key_spec != AT_SIGNATURE {
            return Err(Error::invalid_argument(format!(
                "unsupported legacy key spec {legacy_key_spec}"
            ))
            .with_status(NTE_INVALID_PARAMETER));
        }
        let flags = flags & !NCRYPT_SILENT_FLAG & !NCRYPT_MACHINE_KEY_FLAG;
        if flags != 0 {
            return Err(bad_flags(flags));
        }

        let key_name = crate::wide::decode(key_name, "key name")?;
        let (object, certificate) = self.find_private_key(&key_name)?.ok_or_else(|| {
            Error::not_found(format!("no private key named {key_name}"))
                .with_status(NTE_BAD_KEYSET)
        })?;
        crate::sign::check_signing_preconditions(&object)?;

        let handle = self
            .keys
            .add(Arc::new(Key::new(provider, object, certificate)))?;
        *key_out = handle;

        log::debug!("opened key {handle:#x} for {key_name} under provider {provider:#x}");
        Ok(())
    }

    pub fn free_key(
        &self,
        provider: NCRYPT_PROV_HANDLE,
        key: NCRYPT_KEY_HANDLE,
    ) -> Result<(), Error> {
        self.key(provider, key)?;
        self.keys.remove(key)?;

        log::debug!("freed key {key:#x}");
        Ok(())
    }

    pub fn get_key_property(
        &self,
        provider: NCRYPT_PROV_HANDLE,
        key: NCRYPT_KEY_HANDLE,
        property: Option<&[WCHAR]>,
        output: Option<&mut [u8]>,
        result: Option<&mut DWORD>,
        flags: DWORD,
    ) -> Result<(), Error> {
        let key = self.key(provider, key)?;
        let property = property.ok_or_else(|| null_parameter("property name"))?;
        let result = result.ok_or_else(|| null_parameter("result size"))?;
        validate_flags(flags)?;

        let property = crate::wide::decode(property, "property name")?;
        let value = key.get_property(&property)?;
        write_output(&value, output, result)
    }

    /// Signs the precomputed digest `hash`, writing a fixed-length `r || s` signature.
    ///
    /// `padding_info` is only checked for null, since no supported algorithm takes padding.
    pub fn sign_hash(
        &self,
        provider: NCRYPT_PROV_HANDLE,
        key: NCRYPT_KEY_HANDLE,
        padding_info: *const std::ffi::c_void,
        hash: Option<&[u8]>,
        signature: Option<&mut [u8]>,
        result: Option<&mut DWORD>,
        flags: DWORD,
    ) -> Result<(), Error> {
        let key = self.key(provider, key)?;
        if !padding_info.is_null() {
            return Err(Error::invalid_argument("padding info is not supported")
                .with_status(NTE_INVALID_PARAMETER));
        }
        let hash = hash.ok_or_else(|| null_parameter("hash"))?;
        let result = result.ok_or_else(|| null_parameter("result size"))?;
        validate_flags(flags)?;

        crate::sign::check_signing_preconditions(key.object())?;

        let signature_length = crate::sign::signature_length(key.object())?;
        *result = to_dword(signature_length)?;

        let signature = match signature {
            Some(signature) => signature,
            None => return Ok(()),
        };
        if signature.len() < signature_length {
            return Err(buffer_too_small(signature.len(), signature_length));
        }
        crate::sign::check_digest_length(key.object(), hash)?;

        crate::sign::sign_digest(
            &*self.client,
            key.object(),
            hash,
            &mut signature[..signature_length],
        )
    }

    pub fn is_alg_supported(
        &self,
        provider: NCRYPT_PROV_HANDLE,
        alg_id: Option<&[WCHAR]>,
        flags: DWORD,
    ) -> Result<(), Error> {
        self.provider(provider)?;
        let alg_id = alg_id.ok_or_else(|| null_parameter("algorithm id"))?;
        validate_flags(flags)?;

        match &*crate::wide::decode(alg_id, "algorithm id")? {
            BCRYPT_ECDSA_P256_ALGORITHM | BCRYPT_ECDSA_P384_ALGORITHM => Ok(()),
            alg_id => Err(
                Error::not_supported(format!("unsupported algorithm {alg_id:?}"))
                    .with_status(NTE_NOT_SUPPORTED),
            ),
        }
    }

    fn provider(&self, provider: NCRYPT_PROV_HANDLE) -> Result<Arc<Provider>, Error> {
        if provider == 0 {
            return Err(Error::invalid_handle("provider handle cannot be null")
                .with_status(NTE_INVALID_HANDLE));
        }

        self.providers.get(provider)
    }

    fn key(&self, provider: NCRYPT_PROV_HANDLE, key: NCRYPT_KEY_HANDLE) -> Result<Arc<Key>, Error> {
        self.provider(provider)?;
        if key == 0 {
            return Err(
                Error::invalid_handle("key handle cannot be null").with_status(NTE_INVALID_HANDLE)
            );
        }

        let key_ref = self.keys.get(key)?;
        if key_ref.provider() != provider {
            return Err(Error::invalid_handle(format!(
                "key {key:#x} was not opened by provider {provider:#x}"
            ))
            .with_status(NTE_INVALID_HANDLE));
        }

        Ok(key_ref)
    }

    /// Finds the private key object named `name` in the first token that has one,
    /// along with that token's certificate for it.
    fn find_private_key(
        &self,
        name: &str,
    ) -> Result<Option<(Arc<Object>, Option<Arc<Object>>)>, Error> {
        for token in &self.tokens {
            let private_keys = token.find_objects(|object| {
                object.object_class() == CKO_PRIVATE_KEY && object.kms_key_name() == name
            });
            let private_key = match private_keys.first() {
                Some(&handle) => token.get_object(handle).map_err(token_error)?,
                None => continue,
            };

            let certificates = token.find_objects(|object| {
                object.object_class() == CKO_CERTIFICATE && object.kms_key_name() == name
            });
            let certificate = certificates
                .first()
                .map(|&handle| token.get_object(handle))
                .transpose()
                .map_err(token_error)?;

            return Ok(Some((private_key, certificate)));
        }

        Ok(None)
    }
}

fn validate_flags(flags: DWORD) -> Result<(), Error> {
    if flags != 0 && flags != NCRYPT_SILENT_FLAG {
        return Err(bad_flags(flags));
    }

    Ok(())
}

fn write_output(value: &[u8], output: Option<&mut [u8]>, result: &mut DWORD) -> Result<(), Error> {
    *result = to_dword(value.len())?;

    if let Some(output) = output {
        if output.len() < value.len() {
            return Err(buffer_too_small(output.len(), value.len()));
        }
        output[..value.len()].copy_from_slice(value);
    }

    Ok(())
}

fn to_dword(len: usize) -> Result<DWORD, Error> {
    DWORD::try_from(len).map_err(|err| {
        Error::internal(format!("length {len} does not fit in a DWORD"))
            .with_status(NTE_INTERNAL_ERROR)
            .with_source(err)
    })
}

fn null_parameter(name: &str) -> Error {
    Error::invalid_argument(format!("{name} cannot be null")).with_status(NTE_INVALID_PARAMETER)
}

fn bad_flags(flags: DWORD) -> Error {
    Error::bad_flags(format!("unsupported flags {flags:#x}")).with_status(NTE_BAD_FLAGS)
}

fn buffer_too_small(actual: usize, required: usize) -> Error {
    Error::out_of_range(format!(
        "output buffer of {actual} bytes cannot hold {required} bytes"
    ))
    .with_status(NTE_BUFFER_TOO_SMALL)
}

fn token_error(err: Error) -> Error {
    Error::internal("token lookup failed")
        .with_status(NTE_INTERNAL_ERROR)
        .with_source(err)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kms_common::{CryptoKeyVersionAlgorithm as Algorithm, KmsClient, ProtectionLevel};
    use kms_fake::FakeKms;
    use kmstoken::{Config, Error, TokenConfig};
    use ncrypt_sys::{
        AT_KEYEXCHANGE, AT_SIGNATURE, DWORD, ERROR_SUCCESS, NCRYPT_ALGORITHM_PROPERTY,
        NCRYPT_ALLOW_SIGNING_FLAG, NCRYPT_CERTIFICATE_PROPERTY, NCRYPT_IMPL_HARDWARE_FLAG,
        NCRYPT_IMPL_TYPE_PROPERTY, NCRYPT_KEY_HANDLE, NCRYPT_KEY_USAGE_PROPERTY,
        NCRYPT_MACHINE_KEY_FLAG, NCRYPT_PERSIST_ONLY_FLAG, NCRYPT_PROV_HANDLE,
        NCRYPT_PROVIDER_HANDLE_PROPERTY, NCRYPT_SILENT_FLAG, NCRYPT_UI_POLICY_PROPERTY,
        NTE_BAD_FLAGS, NTE_BAD_KEYSET, NTE_BUFFER_TOO_SMALL, NTE_INVALID_HANDLE,
        NTE_INVALID_PARAMETER, NTE_NOT_FOUND, NTE_NOT_SUPPORTED, SECURITY_STATUS,
    };
    use openssl::bn::BigNum;
    use openssl::ecdsa::EcdsaSig;
    use openssl::pkey::{PKey, Public};

    use super::Bridge;
    use crate::provider::CHANNEL_CREDENTIALS_PROPERTY;
    use crate::wide::to_wide;

    const KEY_RING: &str = "projects/p/locations/global/keyRings/kr";
    const PROVIDER_NAME: &str = "Google Cloud KMS Provider";

    struct Fixture {
        kms: Arc<FakeKms>,
        bridge: Bridge,
        key_name: Vec<u16>,
    }

    fn fixture_with(
        algorithm: Algorithm,
        protection_level: ProtectionLevel,
        generate_certs: bool,
    ) -> Fixture {
        let kms = Arc::new(FakeKms::new());
        kms.create_key_ring(KEY_RING);
        let ckv = kms
            .create_key(KEY_RING, "ck", algorithm, protection_level)
            .unwrap();

        let config = Config {
            tokens: vec![TokenConfig {
                key_ring: KEY_RING.to_owned(),
                label: "foo".to_owned(),
            }],
            generate_certs,
            ..Default::default()
        };
        let bridge = Bridge::new(&config, kms.clone()).unwrap();

        Fixture {
            kms,
            bridge,
            key_name: to_wide(&ckv.name),
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Algorithm::EcSignP256Sha256, ProtectionLevel::Hsm, false)
    }

    fn status(result: Result<(), Error>) -> SECURITY_STATUS {
        match result {
            Ok(()) => ERROR_SUCCESS,
            Err(err) => crate::security_status(&err),
        }
    }

    fn open_provider(bridge: &Bridge) -> NCRYPT_PROV_HANDLE {
        let mut provider = 0;
        bridge
            .open_provider(Some(&mut provider), Some(&to_wide(PROVIDER_NAME)), 0)
            .unwrap();
        assert_ne!(provider, 0);
        provider
    }

    fn open_key(fixture: &Fixture, provider: NCRYPT_PROV_HANDLE) -> NCRYPT_KEY_HANDLE {
        let mut key = 0;
        fixture
            .bridge
            .open_key(provider, Some(&mut key), Some(&fixture.key_name), AT_SIGNATURE, 0)
            .unwrap();
        assert_ne!(key, 0);
        key
    }

    fn public_key(fixture: &Fixture) -> PKey<Public> {
        let name = String::from_utf16(&fixture.key_name).unwrap();
        let public_key = fixture.kms.get_public_key(&name).unwrap();
        PKey::public_key_from_pem(public_key.pem.as_bytes()).unwrap()
    }

    #[test]
    fn open_and_free_provider() {
        let fixture = fixture();
        let provider = open_provider(&fixture.bridge);
        assert_eq!(status(fixture.bridge.free_provider(provider)), ERROR_SUCCESS);
    }

    #[test]
    fn open_provider_null_handle() {
        let fixture = fixture();
        assert_eq!(
            status(
                fixture
                    .bridge
                    .open_provider(None, Some(&to_wide(PROVIDER_NAME)), 0)
            ),
            NTE_INVALID_PARAMETER
        );
    }

    #[test]
    fn open_provider_unexpected_name() {
        let fixture = fixture();
        let mut provider = 0;
        assert_eq!(
            status(fixture.bridge.open_provider(
                Some(&mut provider),
                Some(&to_wide("Microsoft Software Key Storage Provider")),
                0
            )),
            NTE_INVALID_PARAMETER
        );
        assert_eq!(
            status(fixture.bridge.open_provider(Some(&mut provider), None, 0)),
            NTE_INVALID_PARAMETER
        );
        assert_eq!(provider, 0);
    }

    #[test]
    fn open_provider_flags() {
        let fixture = fixture();
        let mut provider = 0;
        assert_eq!(
            status(fixture.bridge.open_provider(
                Some(&mut provider),
                Some(&to_wide(PROVIDER_NAME)),
                NCRYPT_PERSIST_ONLY_FLAG
            )),
            NTE_BAD_FLAGS
        );

        assert_eq!(
            status(fixture.bridge.open_provider(
                Some(&mut provider),
                Some(&to_wide(PROVIDER_NAME)),
                NCRYPT_SILENT_FLAG
            )),
            ERROR_SUCCESS
        );
        fixture.bridge.free_provider(provider).unwrap();
    }

    #[test]
    fn configured_provider_name() {
        let kms = Arc::new(FakeKms::new());
        let config = Config {
            provider_name: Some("Custom Provider".to_owned()),
            ..Default::default()
        };
        let bridge = Bridge::new(&config, kms).unwrap();
        assert_eq!(bridge.provider_name(), "Custom Provider");
        assert!(bridge.tokens().is_empty());

        let mut provider = 0;
        assert_eq!(
            status(bridge.open_provider(Some(&mut provider), Some(&to_wide(PROVIDER_NAME)), 0)),
            NTE_INVALID_PARAMETER
        );
        assert_eq!(
            status(bridge.open_provider(
                Some(&mut provider),
                Some(&to_wide("Custom Provider")),
                0
            )),
            ERROR_SUCCESS
        );
    }

    #[test]
    fn free_provider_invalid_handle() {
        let fixture = fixture();
        assert_eq!(status(fixture.bridge.free_provider(0)), NTE_INVALID_HANDLE);

        let provider = open_provider(&fixture.bridge);
        fixture.bridge.free_provider(provider).unwrap();
        assert_eq!(
            status(fixture.bridge.free_provider(provider)),
            NTE_INVALID_HANDLE
        );
    }

    #[test]
    fn get_provider_property() {
        let fixture = fixture();
        let provider = open_provider(&fixture.bridge);
        let property = to_wide(NCRYPT_IMPL_TYPE_PROPERTY);

        let mut result = 0;
        fixture
            .bridge
            .get_provider_property(provider, Some(&property), None, Some(&mut result), 0)
            .unwrap();
        assert_eq!(result as usize, std::mem::size_of::<DWORD>());

        let mut output = [0_u8; 4];
        let mut result = 0;
        fixture
            .bridge
            .get_provider_property(
                provider,
                Some(&property),
                Some(&mut output),
                Some(&mut result),
                0,
            )
            .unwrap();
        assert_eq!(result, 4);
        assert_eq!(DWORD::from_le_bytes(output), NCRYPT_IMPL_HARDWARE_FLAG);
    }

    #[test]
    fn get_provider_property_errors() {
        let fixture = fixture();
        let provider = open_provider(&fixture.bridge);
        let property = to_wide(NCRYPT_IMPL_TYPE_PROPERTY);
        let mut result = 0;

        assert_eq!(
            status(fixture.bridge.get_provider_property(
                0,
                Some(&property),
                None,
                Some(&mut result),
                0
            )),
            NTE_INVALID_HANDLE
        );
        assert_eq!(
            status(
                fixture
                    .bridge
                    .get_provider_property(provider, None, None, Some(&mut result), 0)
            ),
            NTE_INVALID_PARAMETER
        );
        assert_eq!(
            status(
                fixture
                    .bridge
                    .get_provider_property(provider, Some(&property), None, None, 0)
            ),
            NTE_INVALID_PARAMETER
        );
        assert_eq!(
            status(fixture.bridge.get_provider_property(
                provider,
                Some(&to_wide(NCRYPT_UI_POLICY_PROPERTY)),
                None,
                Some(&mut result),
                0
            )),
            NTE_NOT_SUPPORTED
        );
        assert_eq!(
            status(fixture.bridge.get_provider_property(
                provider,
                Some(&property),
                None,
                Some(&mut result),
                NCRYPT_PERSIST_ONLY_FLAG
            )),
            NTE_BAD_FLAGS
        );
    }

    #[test]
    fn get_provider_property_buffer_too_small() {
        let fixture = fixture();
        let provider = open_provider(&fixture.bridge);

        let mut output = [0xff_u8; 3];
        let mut result = 0;
        assert_eq!(
            status(fixture.bridge.get_provider_property(
                provider,
                Some(&to_wide(NCRYPT_IMPL_TYPE_PROPERTY)),
                Some(&mut output),
                Some(&mut result),
                0
            )),
            NTE_BUFFER_TOO_SMALL
        );
        assert_eq!(result, 4);
        assert_eq!(output, [0xff; 3]);
    }

    #[test]
    fn set_provider_property() {
        let fixture = fixture();
        let provider = open_provider(&fixture.bridge);
        let property = to_wide(CHANNEL_CREDENTIALS_PROPERTY);

        fixture
            .bridge
            .set_provider_property(provider, Some(&property), Some(b"insecure"), 0)
            .unwrap();

        let mut output = [0_u8; 8];
        let mut result = 0;
        fixture
            .bridge
            .get_provider_property(
                provider,
                Some(&property),
                Some(&mut output),
                Some(&mut result),
                0,
            )
            .unwrap();
        assert_eq!(result, 8);
        assert_eq!(&output, b"insecure");

        // A second provider keeps the default.
        let other = open_provider(&fixture.bridge);
        let mut result = 0;
        fixture
            .bridge
            .get_provider_property(other, Some(&property), None, Some(&mut result), 0)
            .unwrap();
        assert_eq!(result as usize, "default".len());
    }

    #[test]
    fn set_provider_property_errors() {
        let fixture = fixture();
        let provider = open_provider(&fixture.bridge);
        let impl_type = to_wide(NCRYPT_IMPL_TYPE_PROPERTY);
        let value = NCRYPT_IMPL_HARDWARE_FLAG.to_le_bytes();

        assert_eq!(
            status(
                fixture
                    .bridge
                    .set_provider_property(0, Some(&impl_type), Some(&value), 0)
            ),
            NTE_INVALID_HANDLE
        );
        assert_eq!(
            status(
                fixture
                    .bridge
                    .set_provider_property(provider, None, Some(&value), 0)
            ),
            NTE_INVALID_PARAMETER
        );
        assert_eq!(
            status(
                fixture
                    .bridge
                    .set_provider_property(provider, Some(&impl_type), None, 0)
            ),
            NTE_INVALID_PARAMETER
        );
        assert_eq!(
            status(fixture.bridge.set_provider_property(
                provider,
                Some(&to_wide(NCRYPT_UI_POLICY_PROPERTY)),
                Some(&value),
                0
            )),
            NTE_NOT_SUPPORTED
        );
        assert_eq!(
            status(
                fixture
                    .bridge
                    .set_provider_property(provider, Some(&impl_type), Some(&value), 0)
            ),
            NTE_INVALID_PARAMETER
        );
        assert_eq!(
            status(fixture.bridge.set_provider_property(
                provider,
                Some(&to_wide(CHANNEL_CREDENTIALS_PROPERTY)),
                Some(b"insecure"),
                NCRYPT_PERSIST_ONLY_FLAG
            )),
            NTE_BAD_FLAGS
        );
    }

    #[test]
    fn open_key_twice() {
        let fixture = fixture();
        let provider = open_provider(&fixture.bridge);

        let first = open_key(&fixture, provider);
        let second = open_key(&fixture, provider);
        assert_ne!(first, second);

        fixture.bridge.free_key(provider, first).unwrap();
        fixture.bridge.free_key(provider, second).unwrap();
    }

    #[test]
    fn open_key_argument_errors() {
        let fixture = fixture();
        let provider = open_provider(&fixture.bridge);
        let name = &fixture.key_name;
        let mut key = 0;

        assert_eq!(
            status(fixture.bridge.open_key(0, None, Some(name), 0, 0)),
            NTE_INVALID_HANDLE
        );
        assert_eq!(
            status(fixture.bridge.open_key(provider, None, Some(name), AT_SIGNATURE, 0)),
            NTE_INVALID_PARAMETER
        );
        assert_eq!(
            status(
                fixture
                    .bridge
                    .open_key(provider, Some(&mut key), None, AT_SIGNATURE, 0)
            ),
            NTE_INVALID_PARAMETER
        );
        assert_eq!(
            status(fixture.bridge.open_key(provider, Some(&mut key), Some(name), 0, 0)),
            NTE_INVALID_PARAMETER
        );
        assert_eq!(
            status(fixture.bridge.open_key(
                provider,
                Some(&mut key),
                Some(name),
                AT_SIGNATURE,
                NCRYPT_PERSIST_ONLY_FLAG
            )),
            NTE_BAD_FLAGS
        );
        assert_eq!(key, 0);
    }

    #[test]
    fn open_key_masks_silent_and_machine_flags() {
        let fixture = fixture();
        let provider = open_provider(&fixture.bridge);
        let mut key = 0;
        fixture
            .bridge
            .open_key(
                provider,
                Some(&mut key),
                Some(&fixture.key_name),
                AT_KEYEXCHANGE,
                NCRYPT_SILENT_FLAG | NCRYPT_MACHINE_KEY_FLAG,
            )
            .unwrap();
        assert_ne!(key, 0);
    }

    #[test]
    fn open_key_not_found() {
        let fixture = fixture();
        let provider = open_provider(&fixture.bridge);

        let mut name = String::from_utf16(&fixture.key_name).unwrap();
        name.pop();
        name.push('2');

        let mut key = 0;
        assert_eq!(
            status(fixture.bridge.open_key(
                provider,
                Some(&mut key),
                Some(&to_wide(&name)),
                AT_SIGNATURE,
                0
            )),
            NTE_BAD_KEYSET
        );
    }

    #[test]
    fn open_key_unsupported_algorithm() {
        let fixture = fixture_with(Algorithm::RsaSignPkcs12048Sha256, ProtectionLevel::Hsm, false);
        let provider = open_provider(&fixture.bridge);

        let mut key = 0;
        assert_eq!(
            status(fixture.bridge.open_key(
                provider,
                Some(&mut key),
                Some(&fixture.key_name),
                AT_SIGNATURE,
                0
            )),
            NTE_NOT_SUPPORTED
        );
    }

    #[test]
    fn open_key_software_key() {
        // Software keys are never loaded into the token.
        let fixture = fixture_with(Algorithm::EcSignP256Sha256, ProtectionLevel::Software, false);
        let provider = open_provider(&fixture.bridge);

        let mut key = 0;
        assert_eq!(
            status(fixture.bridge.open_key(
                provider,
                Some(&mut key),
                Some(&fixture.key_name),
                AT_SIGNATURE,
                0
            )),
            NTE_BAD_KEYSET
        );
    }

    #[test]
    fn free_key_handle_checks() {
        let fixture = fixture();
        let provider = open_provider(&fixture.bridge);
        let other_provider = open_provider(&fixture.bridge);
        let key = open_key(&fixture, provider);

        assert_eq!(status(fixture.bridge.free_key(0, 0)), NTE_INVALID_HANDLE);
        assert_eq!(
            status(fixture.bridge.free_key(provider, 0)),
            NTE_INVALID_HANDLE
        );
        assert_eq!(
            status(fixture.bridge.free_key(other_provider, key)),
            NTE_INVALID_HANDLE
        );

        assert_eq!(status(fixture.bridge.free_key(provider, key)), ERROR_SUCCESS);
        assert_eq!(
            status(fixture.bridge.free_key(provider, key)),
            NTE_INVALID_HANDLE
        );
    }

    #[test]
    fn free_provider_frees_keys() {
        let fixture = fixture();
        let provider = open_provider(&fixture.bridge);
        let other_provider = open_provider(&fixture.bridge);
        let key = open_key(&fixture, provider);
        let other_key = open_key(&fixture, other_provider);

        fixture.bridge.free_provider(provider).unwrap();

        let mut result = 0;
        assert_eq!(
            status(fixture.bridge.get_key_property(
                provider,
                key,
                Some(&to_wide(NCRYPT_KEY_USAGE_PROPERTY)),
                None,
                Some(&mut result),
                0
            )),
            NTE_INVALID_HANDLE
        );
        assert_eq!(
            status(fixture.bridge.free_key(other_provider, key)),
            NTE_INVALID_HANDLE
        );

        // Keys of other providers survive.
        assert_eq!(
            status(fixture.bridge.free_key(other_provider, other_key)),
            ERROR_SUCCESS
        );
    }

    #[test]
    fn get_key_property() {
        let fixture = fixture();
        let provider = open_provider(&fixture.bridge);
        let key = open_key(&fixture, provider);

        let usage = to_wide(NCRYPT_KEY_USAGE_PROPERTY);
        let mut result = 0;
        fixture
            .bridge
            .get_key_property(provider, key, Some(&usage), None, Some(&mut result), 0)
            .unwrap();
        assert_eq!(result as usize, std::mem::size_of::<DWORD>());

        let mut output = [0_u8; 4];
        fixture
            .bridge
            .get_key_property(
                provider,
                key,
                Some(&usage),
                Some(&mut output),
                Some(&mut result),
                0,
            )
            .unwrap();
        assert_eq!(DWORD::from_le_bytes(output), NCRYPT_ALLOW_SIGNING_FLAG);

        let algorithm = to_wide(NCRYPT_ALGORITHM_PROPERTY);
        fixture
            .bridge
            .get_key_property(provider, key, Some(&algorithm), None, Some(&mut result), 0)
            .unwrap();
        let mut output = vec![0_u8; result as usize];
        fixture
            .bridge
            .get_key_property(
                provider,
                key,
                Some(&algorithm),
                Some(&mut output),
                Some(&mut result),
                0,
            )
            .unwrap();
        assert_eq!(result as usize, output.len());
        assert_eq!(output, crate::wide::encode("ECDSA_P256"));

        let mut output = [0_u8; std::mem::size_of::<usize>()];
        fixture
            .bridge
            .get_key_property(
                provider,
                key,
                Some(&to_wide(NCRYPT_PROVIDER_HANDLE_PROPERTY)),
                Some(&mut output),
                Some(&mut result),
                0,
            )
            .unwrap();
        assert_eq!(usize::from_le_bytes(output), provider);
    }

    #[test]
    fn get_key_property_errors() {
        let fixture = fixture();
        let provider = open_provider(&fixture.bridge);
        let key = open_key(&fixture, provider);
        let usage = to_wide(NCRYPT_KEY_USAGE_PROPERTY);
        let mut result = 0;

        assert_eq!(
            status(fixture.bridge.get_key_property(0, 0, None, None, None, 0)),
            NTE_INVALID_HANDLE
        );
        assert_eq!(
            status(fixture.bridge.get_key_property(provider, 0, None, None, None, 0)),
            NTE_INVALID_HANDLE
        );
        assert_eq!(
            status(fixture.bridge.get_key_property(
                provider,
                key,
                None,
                None,
                Some(&mut result),
                0
            )),
            NTE_INVALID_PARAMETER
        );
        assert_eq!(
            status(
                fixture
                    .bridge
                    .get_key_property(provider, key, Some(&usage), None, None, 0)
            ),
            NTE_INVALID_PARAMETER
        );
        assert_eq!(
            status(fixture.bridge.get_key_property(
                provider,
                key,
                Some(&usage),
                None,
                Some(&mut result),
                NCRYPT_PERSIST_ONLY_FLAG
            )),
            NTE_BAD_FLAGS
        );
        assert_eq!(
            status(fixture.bridge.get_key_property(
                provider,
                key,
                Some(&to_wide(NCRYPT_UI_POLICY_PROPERTY)),
                None,
                Some(&mut result),
                0
            )),
            NTE_NOT_SUPPORTED
        );
        assert_eq!(
            status(fixture.bridge.get_key_property(
                provider,
                key,
                Some(&to_wide(NCRYPT_CERTIFICATE_PROPERTY)),
                None,
                Some(&mut result),
                0
            )),
            NTE_NOT_FOUND
        );

        let mut output = [0xff_u8; 3];
        assert_eq!(
            status(fixture.bridge.get_key_property(
                provider,
                key,
                Some(&usage),
                Some(&mut output),
                Some(&mut result),
                0
            )),
            NTE_BUFFER_TOO_SMALL
        );
        assert_eq!(result, 4);
        assert_eq!(output, [0xff; 3]);
    }

    #[test]
    fn get_key_certificate() {
        let fixture = fixture_with(Algorithm::EcSignP256Sha256, ProtectionLevel::Hsm, true);
        let provider = open_provider(&fixture.bridge);
        let key = open_key(&fixture, provider);
        let property = to_wide(NCRYPT_CERTIFICATE_PROPERTY);

        let mut result = 0;
        fixture
            .bridge
            .get_key_property(provider, key, Some(&property), None, Some(&mut result), 0)
            .unwrap();
        let mut output = vec![0_u8; result as usize];
        fixture
            .bridge
            .get_key_property(
                provider,
                key,
                Some(&property),
                Some(&mut output),
                Some(&mut result),
                0,
            )
            .unwrap();

        let x509 = openssl::x509::X509::from_der(&output).unwrap();
        assert!(x509.public_key().unwrap().public_eq(&public_key(&fixture)));
    }

    #[test]
    fn sign_hash() {
        let fixture = fixture();
        let provider = open_provider(&fixture.bridge);
        let key = open_key(&fixture, provider);
        let digest = [1_u8; 32];

        let mut result = 0;
        fixture
            .bridge
            .sign_hash(
                provider,
                key,
                std::ptr::null(),
                Some(&digest),
                None,
                Some(&mut result),
                0,
            )
            .unwrap();
        assert_eq!(result, 64);

        let mut signature = vec![0_u8; result as usize];
        let mut filled = 0;
        fixture
            .bridge
            .sign_hash(
                provider,
                key,
                std::ptr::null(),
                Some(&digest),
                Some(&mut signature),
                Some(&mut filled),
                0,
            )
            .unwrap();
        assert_eq!(filled, result);

        let sig = EcdsaSig::from_private_components(
            BigNum::from_slice(&signature[..32]).unwrap(),
            BigNum::from_slice(&signature[32..]).unwrap(),
        )
        .unwrap();
        let public_key = public_key(&fixture);
        assert!(sig.verify(&digest, &public_key.ec_key().unwrap()).unwrap());
    }

    #[test]
    fn sign_hash_p384() {
        let fixture = fixture_with(Algorithm::EcSignP384Sha384, ProtectionLevel::Hsm, false);
        let provider = open_provider(&fixture.bridge);
        let key = open_key(&fixture, provider);
        let digest = [7_u8; 48];

        let mut signature = [0_u8; 100];
        let mut result = 0;
        fixture
            .bridge
            .sign_hash(
                provider,
                key,
                std::ptr::null(),
                Some(&digest),
                Some(&mut signature),
                Some(&mut result),
                NCRYPT_SILENT_FLAG,
            )
            .unwrap();
        assert_eq!(result, 96);
        assert_eq!(signature[96..], [0; 4]);

        let sig = EcdsaSig::from_private_components(
            BigNum::from_slice(&signature[..48]).unwrap(),
            BigNum::from_slice(&signature[48..96]).unwrap(),
        )
        .unwrap();
        let public_key = public_key(&fixture);
        assert!(sig.verify(&digest, &public_key.ec_key().unwrap()).unwrap());
    }

    #[test]
    fn sign_hash_buffer_too_small() {
        let fixture = fixture();
        let provider = open_provider(&fixture.bridge);
        let key = open_key(&fixture, provider);
        let requests = fixture.kms.request_count();

        let mut signature = [0xff_u8; 63];
        let mut result = 0;
        assert_eq!(
            status(fixture.bridge.sign_hash(
                provider,
                key,
                std::ptr::null(),
                Some(&[1; 32]),
                Some(&mut signature),
                Some(&mut result),
                0
            )),
            NTE_BUFFER_TOO_SMALL
        );
        assert_eq!(result, 64);
        assert_eq!(signature, [0xff; 63]);
        assert_eq!(fixture.kms.request_count(), requests);
    }

    #[test]
    fn sign_hash_errors() {
        let fixture = fixture();
        let provider = open_provider(&fixture.bridge);
        let other_provider = open_provider(&fixture.bridge);
        let key = open_key(&fixture, provider);
        let digest = [1_u8; 32];
        let padding_info = 0_u32;
        let mut result = 0;

        assert_eq!(
            status(fixture.bridge.sign_hash(0, 0, std::ptr::null(), None, None, None, 0)),
            NTE_INVALID_HANDLE
        );
        assert_eq!(
            status(fixture.bridge.sign_hash(provider, 0, std::ptr::null(), None, None, None, 0)),
            NTE_INVALID_HANDLE
        );
        assert_eq!(
            status(fixture.bridge.sign_hash(
                other_provider,
                key,
                std::ptr::null(),
                Some(&digest),
                None,
                Some(&mut result),
                0
            )),
            NTE_INVALID_HANDLE
        );
        assert_eq!(
            status(fixture.bridge.sign_hash(
                provider,
                key,
                std::ptr::addr_of!(padding_info).cast(),
                Some(&digest),
                None,
                Some(&mut result),
                0
            )),
            NTE_INVALID_PARAMETER
        );
        assert_eq!(
            status(fixture.bridge.sign_hash(
                provider,
                key,
                std::ptr::null(),
                None,
                None,
                Some(&mut result),
                0
            )),
            NTE_INVALID_PARAMETER
        );
        assert_eq!(
            status(fixture.bridge.sign_hash(
                provider,
                key,
                std::ptr::null(),
                Some(&digest),
                None,
                None,
                0
            )),
            NTE_INVALID_PARAMETER
        );
        assert_eq!(
            status(fixture.bridge.sign_hash(
                provider,
                key,
                std::ptr::null(),
                Some(&digest),
                None,
                Some(&mut result),
                NCRYPT_PERSIST_ONLY_FLAG
            )),
            NTE_BAD_FLAGS
        );
        assert_eq!(
            status(fixture.bridge.sign_hash(
                provider,
                key,
                std::ptr::null(),
                Some(&digest[..20]),
                Some(&mut [0; 64]),
                Some(&mut result),
                0
            )),
            NTE_INVALID_PARAMETER
        );
    }

    #[test]
    fn sign_hash_size_query_ignores_digest_length() {
        let fixture = fixture();
        let provider = open_provider(&fixture.bridge);
        let key = open_key(&fixture, provider);
        let requests = fixture.kms.request_count();

        let mut result = 0;
        assert_eq!(
            status(fixture.bridge.sign_hash(
                provider,
                key,
                std::ptr::null(),
                Some(&[1; 20]),
                None,
                Some(&mut result),
                0
            )),
            ERROR_SUCCESS
        );
        assert_eq!(result, 64);

        let mut signature = [0xff_u8; 63];
        assert_eq!(
            status(fixture.bridge.sign_hash(
                provider,
                key,
                std::ptr::null(),
                Some(&[1; 20]),
                Some(&mut signature),
                Some(&mut result),
                0
            )),
            NTE_BUFFER_TOO_SMALL
        );
        assert_eq!(result, 64);
        assert_eq!(fixture.kms.request_count(), requests);
    }

    #[test]
    fn is_alg_supported() {
        let fixture = fixture();
        let provider = open_provider(&fixture.bridge);

        for alg_id in ["ECDSA_P256", "ECDSA_P384"] {
            assert_eq!(
                status(
                    fixture
                        .bridge
                        .is_alg_supported(provider, Some(&to_wide(alg_id)), 0)
                ),
                ERROR_SUCCESS
            );
        }
        for alg_id in ["RSA", "ECDSA_P521", "ECDSA"] {
            assert_eq!(
                status(
                    fixture
                        .bridge
                        .is_alg_supported(provider, Some(&to_wide(alg_id)), 0)
                ),
                NTE_NOT_SUPPORTED
            );
        }

        assert_eq!(
            status(
                fixture
                    .bridge
                    .is_alg_supported(0, Some(&to_wide("ECDSA_P256")), 0)
            ),
            NTE_INVALID_HANDLE
        );
        assert_eq!(
            status(fixture.bridge.is_alg_supported(provider, None, 0)),
            NTE_INVALID_PARAMETER
        );
        assert_eq!(
            status(fixture.bridge.is_alg_supported(
                provider,
                Some(&to_wide("ECDSA_P256")),
                NCRYPT_PERSIST_ONLY_FLAG
            )),
            NTE_BAD_FLAGS
        );
    }

    #[test]
    fn concurrent_open_key() {
        let fixture = Arc::new(fixture());
        let provider = open_provider(&fixture.bridge);

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let fixture = fixture.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| open_key(&fixture, provider))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut keys: Vec<_> = threads
            .into_iter()
            .flat_map(|thread| thread.join().unwrap())
            .collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), 200);
    }

    #[test]
    fn free_provider_races_free_key() {
        let fixture = Arc::new(fixture());
        let provider = open_provider(&fixture.bridge);
        let keys: Vec<_> = (0..50).map(|_| open_key(&fixture, provider)).collect();

        let freeing_keys = {
            let fixture = fixture.clone();
            std::thread::spawn(move || {
                for key in keys {
                    let _ = fixture.bridge.free_key(provider, key);
                }
            })
        };
        assert_eq!(status(fixture.bridge.free_provider(provider)), ERROR_SUCCESS);
        freeing_keys.join().unwrap();

        assert_eq!(
            status(fixture.bridge.free_provider(provider)),
            NTE_INVALID_HANDLE
        );
    }

    #[test]
    fn load_failure() {
        let kms = Arc::new(FakeKms::new());
        kms.create_key_ring(KEY_RING);
        kms.set_unavailable(true);

        let config = Config {
            tokens: vec![TokenConfig {
                key_ring: KEY_RING.to_owned(),
                label: String::new(),
            }],
            ..Default::default()
        };
        assert!(Bridge::new(&config, kms).is_err());
    }
}
