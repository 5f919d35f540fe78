// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::missing_safety_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::too_many_arguments
)]

//! A CNG key storage provider whose keys live in Cloud KMS.
//!
//! The library exports a single function, [`GetKeyStorageInterface`], which hands the CNG router a table of
//! function pointers. Those functions serve the [`Bridge`] installed by [`load`]. Every call is synchronous
//! and signing makes one remote call per digest.
//!
//! Errors are [`kmstoken::Error`]s. The status code they carry is an NCrypt `SECURITY_STATUS`;
//! see [`security_status`] for the fallback used when an error has none.

use std::sync::{Arc, RwLock};

use kms_common::KmsClient;
use kmstoken::{Config, Error, ErrorKind};
use ncrypt_sys::{
    DWORD, ERROR_SUCCESS, LPCWSTR, NCRYPT_KEY_STORAGE_FUNCTION_TABLE, NTE_BAD_FLAGS,
    NTE_BAD_KEY_STATE, NTE_BUFFER_TOO_SMALL, NTE_INTERNAL_ERROR, NTE_INVALID_HANDLE,
    NTE_INVALID_PARAMETER, NTE_NOT_FOUND, NTE_NOT_SUPPORTED, NTE_PERM, SECURITY_STATUS,
};

mod bridge;
pub use bridge::Bridge;

mod implementation;

mod key;
pub use key::Key;

mod provider;
pub use provider::{
    PropertyTable, Provider, CHANNEL_CREDENTIALS_PROPERTY, DEFAULT_PROVIDER_NAME,
    ENDPOINT_ADDRESS_PROPERTY, USER_PROJECT_PROPERTY,
};

mod sign;

mod wide;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "KMS_CNG_CONFIG";

/// Environment variable naming the directory of config patches.
pub const CONFIG_DIRECTORY_ENV_VAR: &str = "KMS_CNG_CONFIG_DIR";

lazy_static::lazy_static! {
    static ref BRIDGE: RwLock<Option<Arc<Bridge>>> = Default::default();
}

/// Loads the tokens described by `config` and installs them as the provider served by the exported functions.
///
/// Replaces any previously loaded provider. Handles issued by the previous provider become invalid.
pub fn load(config: &Config, client: Arc<dyn KmsClient>) -> Result<(), Error> {
    match logger::try_init(
        config.log_directory.as_deref(),
        config.log_filename_suffix.as_deref(),
    ) {
        // A logger installed by an earlier load, or by the host process, stays in place.
        Ok(()) | Err(logger::Error::SetLogger(_)) => (),
        Err(err @ logger::Error::OpenLogFile(..)) => {
            return Err(Error::failed_precondition("could not initialize logging").with_source(err));
        }
    }

    let bridge = Bridge::new(config, client)?;
    log::info!(
        "loaded provider {:?} with {} token(s)",
        bridge.provider_name(),
        bridge.tokens().len()
    );

    let mut guard = BRIDGE
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    *guard = Some(Arc::new(bridge));
    Ok(())
}

/// Reads the config from the files named by [`CONFIG_ENV_VAR`] and [`CONFIG_DIRECTORY_ENV_VAR`], then [`load`]s it.
pub fn load_from_env(client: Arc<dyn KmsClient>) -> Result<(), Error> {
    let config = Config::from_env(CONFIG_ENV_VAR, CONFIG_DIRECTORY_ENV_VAR)?;
    load(&config, client)
}

pub(crate) fn bridge() -> Result<Arc<Bridge>, Error> {
    let guard = BRIDGE
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    guard.clone().ok_or_else(|| {
        Error::internal("provider has not been loaded").with_status(NTE_INTERNAL_ERROR)
    })
}

/// The `SECURITY_STATUS` an error is reported as.
///
/// This is the error's code when it has one, and otherwise a status chosen by its kind.
pub fn security_status(err: &Error) -> SECURITY_STATUS {
    if let Some(code) = err.code() {
        return SECURITY_STATUS(code as u32 as i32);
    }

    match err.kind() {
        ErrorKind::InvalidArgument => NTE_INVALID_PARAMETER,
        ErrorKind::InvalidHandle => NTE_INVALID_HANDLE,
        ErrorKind::NotFound => NTE_NOT_FOUND,
        ErrorKind::NotSupported => NTE_NOT_SUPPORTED,
        ErrorKind::OutOfRange => NTE_BUFFER_TOO_SMALL,
        ErrorKind::BadFlags => NTE_BAD_FLAGS,
        ErrorKind::PermissionDenied => NTE_PERM,
        ErrorKind::FailedPrecondition => NTE_BAD_KEY_STATE,
        ErrorKind::Internal => NTE_INTERNAL_ERROR,
    }
}

pub(crate) fn status_code(status: SECURITY_STATUS) -> u32 {
    status.0 as u32
}

pub(crate) trait ErrorExt {
    /// Sets the error's code to `status`.
    fn with_status(self, status: SECURITY_STATUS) -> Self;
}

impl ErrorExt for Error {
    fn with_status(self, status: SECURITY_STATUS) -> Self {
        self.with_code(status_code(status))
    }
}

/// Runs `f` and converts its result to a `SECURITY_STATUS`, logging the error and its causes if it failed.
///
/// Intended to be used at FFI boundaries, where a Rust error cannot pass through.
fn r#catch(f: impl FnOnce() -> Result<(), Error>) -> SECURITY_STATUS {
    match f() {
        Ok(()) => ERROR_SUCCESS,
        Err(err) => {
            let status = security_status(&err);
            log::error!("{status}: {err}");

            let mut source = std::error::Error::source(&err);
            while let Some(err) = source {
                log::error!("caused by: {err}");
                source = err.source();
            }

            status
        }
    }
}

/// Returns the function table of this key storage provider.
///
/// `function_table_out` must not be null. `provider_name` and `flags` are not used.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "system" fn GetKeyStorageInterface(
    provider_name: LPCWSTR,
    function_table_out: *mut *const NCRYPT_KEY_STORAGE_FUNCTION_TABLE,
    flags: DWORD,
) -> SECURITY_STATUS {
    implementation::get_key_storage_interface(provider_name, function_table_out, flags)
}

#[cfg(test)]
mod tests {
    use kmstoken::{Error, ErrorKind};
    use ncrypt_sys::{
        ERROR_SUCCESS, NTE_BAD_FLAGS, NTE_BAD_KEYSET, NTE_BAD_KEY_STATE, NTE_BUFFER_TOO_SMALL,
        NTE_INTERNAL_ERROR, NTE_INVALID_HANDLE, NTE_INVALID_PARAMETER, NTE_NOT_FOUND,
        NTE_NOT_SUPPORTED, NTE_PERM,
    };

    use super::ErrorExt;

    #[test]
    fn load_missing_log_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = kmstoken::Config {
            log_directory: Some(dir.path().join("missing")),
            ..Default::default()
        };
        let kms = std::sync::Arc::new(kms_fake::FakeKms::new());

        let err = super::load(&config, kms).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn security_status_defaults() {
        for (kind, expected) in [
            (ErrorKind::InvalidArgument, NTE_INVALID_PARAMETER),
            (ErrorKind::InvalidHandle, NTE_INVALID_HANDLE),
            (ErrorKind::NotFound, NTE_NOT_FOUND),
            (ErrorKind::NotSupported, NTE_NOT_SUPPORTED),
            (ErrorKind::OutOfRange, NTE_BUFFER_TOO_SMALL),
            (ErrorKind::BadFlags, NTE_BAD_FLAGS),
            (ErrorKind::PermissionDenied, NTE_PERM),
            (ErrorKind::FailedPrecondition, NTE_BAD_KEY_STATE),
            (ErrorKind::Internal, NTE_INTERNAL_ERROR),
        ] {
            assert_eq!(super::security_status(&Error::new(kind, "")), expected);
        }
    }

    #[test]
    fn security_status_uses_code() {
        let err = Error::not_found("no such key").with_status(NTE_BAD_KEYSET);
        assert_eq!(err.code(), Some(0x8009_0016));
        assert_eq!(super::security_status(&err), NTE_BAD_KEYSET);
    }

    #[test]
    fn catch() {
        assert_eq!(super::r#catch(|| Ok(())), ERROR_SUCCESS);
        assert_eq!(
            super::r#catch(|| Err(Error::bad_flags("bad")
                .with_status(NTE_BAD_FLAGS)
                .with_source(Error::internal("inner")))),
            NTE_BAD_FLAGS
        );
    }
}
