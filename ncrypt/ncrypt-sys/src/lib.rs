// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    non_camel_case_types,
    non_snake_case,
    clippy::cast_possible_wrap,
    clippy::must_use_candidate,
    clippy::use_self
)]

//! Definitions for implementing a CNG key storage provider.
//!
//! Refs:
//!
//! - <https://learn.microsoft.com/en-us/windows/win32/seccng/key-storage-provider-interface>
//! - <https://learn.microsoft.com/en-us/windows/win32/seccng/key-storage-property-identifiers>
//!
//!
//! Headers:
//!
//! - `ncrypt.h`
//! - `ncrypt_provider.h`
//! - `bcrypt.h`
//! - `winerror.h`

macro_rules! define_enum {
	(@inner $type:ident $repr:ty, $f:ident ( $($consts:tt)* ) ( $($match_arms:tt)* ) ()) => {
		#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
		#[repr(transparent)]
		pub struct $type(pub $repr);

		$($consts)*

		impl std::fmt::Display for $type {
			fn fmt(&self, $f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
				match *self {
					$($match_arms)*
					$type(other) => write!($f, "0x{:08x}", other),
				}
			}
		}
	};

	(@inner $type:ident $repr:ty, $f:ident ( $($consts:tt)* ) ( $($match_arms:tt)* ) ( $ident:ident = $value:expr, $($rest:tt)* )) => {
		define_enum! {
			@inner
			$type $repr,
			$f
			( $($consts)* pub const $ident: $type = $type($value); )
			( $($match_arms)* $ident => $f.write_str(stringify!($ident)), )
			( $($rest)* )
		}
	};

	($type:ident : $repr:ty { $($tt:tt)* }) => {
		define_enum! {
			@inner
			$type $repr,
			f
			( )
			( )
			( $($tt)* )
		}
	};
}

// Basic types

pub type BYTE = u8;
pub type DWORD = u32;
pub type ULONG = u32;
pub type ULONG_PTR = usize;
pub type WCHAR = u16;

pub type HANDLE = *mut std::ffi::c_void;
pub type LPCWSTR = *const WCHAR;
pub type PBYTE = *mut BYTE;
pub type PDWORD = *mut DWORD;
pub type PVOID = *mut std::ffi::c_void;

// Handles

pub type NCRYPT_HANDLE = ULONG_PTR;
pub type NCRYPT_PROV_HANDLE = ULONG_PTR;
pub type NCRYPT_KEY_HANDLE = ULONG_PTR;
pub type NCRYPT_SECRET_HANDLE = ULONG_PTR;

// SECURITY_STATUS

define_enum!(SECURITY_STATUS: i32 {
    ERROR_SUCCESS = 0,

    NTE_BAD_FLAGS = 0x8009_0009_u32 as i32,
    NTE_BAD_KEY_STATE = 0x8009_000b_u32 as i32,
    NTE_BAD_KEYSET = 0x8009_0016_u32 as i32,
    NTE_BAD_TYPE = 0x8009_000a_u32 as i32,
    NTE_BUFFER_TOO_SMALL = 0x8009_0028_u32 as i32,
    NTE_EXISTS = 0x8009_000f_u32 as i32,
    NTE_FAIL = 0x8009_0020_u32 as i32,
    NTE_INTERNAL_ERROR = 0x8009_002d_u32 as i32,
    NTE_INVALID_HANDLE = 0x8009_0026_u32 as i32,
    NTE_INVALID_PARAMETER = 0x8009_0027_u32 as i32,
    NTE_NO_MEMORY = 0x8009_000e_u32 as i32,
    NTE_NOT_FOUND = 0x8009_0011_u32 as i32,
    NTE_NOT_SUPPORTED = 0x8009_0029_u32 as i32,
    NTE_PERM = 0x8009_0010_u32 as i32,
});

// Flags

pub const NCRYPT_MACHINE_KEY_FLAG: DWORD = 0x0000_0020;
pub const NCRYPT_SILENT_FLAG: DWORD = 0x0000_0040;
pub const NCRYPT_PERSIST_ONLY_FLAG: DWORD = 0x4000_0000;

pub const NCRYPT_IMPL_HARDWARE_FLAG: DWORD = 0x0000_0001;
pub const NCRYPT_ALLOW_SIGNING_FLAG: DWORD = 0x0000_0002;
pub const NCRYPT_MACHINE_KEY_TYPE_FLAG: DWORD = 0x0000_0020;

// Legacy key specs

pub const AT_KEYEXCHANGE: DWORD = 1;
pub const AT_SIGNATURE: DWORD = 2;

// Property names

pub const NCRYPT_ALGORITHM_GROUP_PROPERTY: &str = "Algorithm Group";
pub const NCRYPT_ALGORITHM_PROPERTY: &str = "Algorithm Name";
pub const NCRYPT_CERTIFICATE_PROPERTY: &str = "SmartCardKeyCertificate";
pub const NCRYPT_EXPORT_POLICY_PROPERTY: &str = "Export Policy";
pub const NCRYPT_IMPL_TYPE_PROPERTY: &str = "Impl Type";
pub const NCRYPT_KEY_TYPE_PROPERTY: &str = "Key Type";
pub const NCRYPT_KEY_USAGE_PROPERTY: &str = "Key Usage";
pub const NCRYPT_LENGTH_PROPERTY: &str = "Length";
pub const NCRYPT_NAME_PROPERTY: &str = "Name";
pub const NCRYPT_PROVIDER_HANDLE_PROPERTY: &str = "Provider Handle";
pub const NCRYPT_UI_POLICY_PROPERTY: &str = "UI Policy";
pub const NCRYPT_UNIQUE_NAME_PROPERTY: &str = "Unique Name";
pub const NCRYPT_VERSION_PROPERTY: &str = "Version";

// Algorithm identifiers

pub const NCRYPT_ECDSA_ALGORITHM_GROUP: &str = "ECDSA";
pub const NCRYPT_RSA_ALGORITHM_GROUP: &str = "RSA";
pub const BCRYPT_ECDSA_P256_ALGORITHM: &str = "ECDSA_P256";
pub const BCRYPT_ECDSA_P384_ALGORITHM: &str = "ECDSA_P384";

// BCRYPT_INTERFACE_VERSION

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(C)]
pub struct BCRYPT_INTERFACE_VERSION {
    pub MajorVersion: u16,
    pub MinorVersion: u16,
}

pub const NCRYPT_KEY_STORAGE_INTERFACE_VERSION: BCRYPT_INTERFACE_VERSION =
    BCRYPT_INTERFACE_VERSION {
        MajorVersion: 1,
        MinorVersion: 0,
    };

// NCRYPT_KEY_STORAGE_FUNCTION_TABLE

#[derive(Debug)]
#[repr(C)]
pub struct NCRYPT_KEY_STORAGE_FUNCTION_TABLE {
    pub Version: BCRYPT_INTERFACE_VERSION,
    pub OpenProvider: Option<NCryptOpenStorageProviderFn>,
    pub OpenKey: Option<NCryptOpenKeyFn>,
    pub CreatePersistedKey: Option<NCryptCreatePersistedKeyFn>,
    pub GetProviderProperty: Option<NCryptGetProviderPropertyFn>,
    pub GetKeyProperty: Option<NCryptGetKeyPropertyFn>,
    pub SetProviderProperty: Option<NCryptSetProviderPropertyFn>,
    pub SetKeyProperty: Option<NCryptSetKeyPropertyFn>,
    pub FinalizeKey: Option<NCryptFinalizeKeyFn>,
    pub DeleteKey: Option<NCryptDeleteKeyFn>,
    pub FreeProvider: Option<NCryptFreeProviderFn>,
    pub FreeKey: Option<NCryptFreeKeyFn>,
    pub FreeBuffer: Option<NCryptFreeBufferFn>,
    pub Encrypt: Option<NCryptEncryptFn>,
    pub Decrypt: Option<NCryptDecryptFn>,
    pub IsAlgSupported: Option<NCryptIsAlgSupportedFn>,
    pub EnumAlgorithms: Option<NCryptEnumAlgorithmsFn>,
    pub EnumKeys: Option<NCryptEnumKeysFn>,
    pub ImportKey: Option<NCryptImportKeyFn>,
    pub ExportKey: Option<NCryptExportKeyFn>,
    pub SignHash: Option<NCryptSignHashFn>,
    pub VerifySignature: Option<NCryptVerifySignatureFn>,
    pub PromptUser: Option<NCryptPromptUserFn>,
    pub NotifyChangeKey: Option<NCryptNotifyChangeKeyFn>,
    pub SecretAgreement: Option<NCryptSecretAgreementFn>,
    pub DeriveKey: Option<NCryptDeriveKeyFn>,
    pub FreeSecret: Option<NCryptFreeSecretFn>,
}

// Function typedefs

pub type NCryptOpenStorageProviderFn = unsafe extern "system" fn(
    phProvider: *mut NCRYPT_PROV_HANDLE,
    pszProviderName: LPCWSTR,
    dwFlags: DWORD,
) -> SECURITY_STATUS;
pub type NCryptOpenKeyFn = unsafe extern "system" fn(
    hProvider: NCRYPT_PROV_HANDLE,
    phKey: *mut NCRYPT_KEY_HANDLE,
    pszKeyName: LPCWSTR,
    dwLegacyKeySpec: DWORD,
    dwFlags: DWORD,
) -> SECURITY_STATUS;
pub type NCryptCreatePersistedKeyFn = unsafe extern "system" fn(
    hProvider: NCRYPT_PROV_HANDLE,
    phKey: *mut NCRYPT_KEY_HANDLE,
    pszAlgId: LPCWSTR,
    pszKeyName: LPCWSTR,
    dwLegacyKeySpec: DWORD,
    dwFlags: DWORD,
) -> SECURITY_STATUS;
pub type NCryptGetProviderPropertyFn = unsafe extern "system" fn(
    hProvider: NCRYPT_PROV_HANDLE,
    pszProperty: LPCWSTR,
    pbOutput: PBYTE,
    cbOutput: DWORD,
    pcbResult: PDWORD,
    dwFlags: DWORD,
) -> SECURITY_STATUS;
pub type NCryptGetKeyPropertyFn = unsafe extern "system" fn(
    hProvider: NCRYPT_PROV_HANDLE,
    hKey: NCRYPT_KEY_HANDLE,
    pszProperty: LPCWSTR,
    pbOutput: PBYTE,
    cbOutput: DWORD,
    pcbResult: PDWORD,
    dwFlags: DWORD,
) -> SECURITY_STATUS;
pub type NCryptSetProviderPropertyFn = unsafe extern "system" fn(
    hProvider: NCRYPT_PROV_HANDLE,
    pszProperty: LPCWSTR,
    pbInput: PBYTE,
    cbInput: DWORD,
    dwFlags: DWORD,
) -> SECURITY_STATUS;
pub type NCryptSetKeyPropertyFn = unsafe extern "system" fn(
    hProvider: NCRYPT_PROV_HANDLE,
    hKey: NCRYPT_KEY_HANDLE,
    pszProperty: LPCWSTR,
    pbInput: PBYTE,
    cbInput: DWORD,
    dwFlags: DWORD,
) -> SECURITY_STATUS;
pub type NCryptFinalizeKeyFn = unsafe extern "system" fn(
    hProvider: NCRYPT_PROV_HANDLE,
    hKey: NCRYPT_KEY_HANDLE,
    dwFlags: DWORD,
) -> SECURITY_STATUS;
pub type NCryptDeleteKeyFn = unsafe extern "system" fn(
    hProvider: NCRYPT_PROV_HANDLE,
    hKey: NCRYPT_KEY_HANDLE,
    dwFlags: DWORD,
) -> SECURITY_STATUS;
pub type NCryptFreeProviderFn =
    unsafe extern "system" fn(hProvider: NCRYPT_PROV_HANDLE) -> SECURITY_STATUS;
pub type NCryptFreeKeyFn = unsafe extern "system" fn(
    hProvider: NCRYPT_PROV_HANDLE,
    hKey: NCRYPT_KEY_HANDLE,
) -> SECURITY_STATUS;
pub type NCryptFreeBufferFn = unsafe extern "system" fn(pvInput: PVOID) -> SECURITY_STATUS;
pub type NCryptEncryptFn = unsafe extern "system" fn(
    hProvider: NCRYPT_PROV_HANDLE,
    hKey: NCRYPT_KEY_HANDLE,
    pbInput: PBYTE,
    cbInput: DWORD,
    pPaddingInfo: PVOID,
    pbOutput: PBYTE,
    cbOutput: DWORD,
    pcbResult: PDWORD,
    dwFlags: DWORD,
) -> SECURITY_STATUS;
pub type NCryptDecryptFn = NCryptEncryptFn;
pub type NCryptIsAlgSupportedFn = unsafe extern "system" fn(
    hProvider: NCRYPT_PROV_HANDLE,
    pszAlgId: LPCWSTR,
    dwFlags: DWORD,
) -> SECURITY_STATUS;
pub type NCryptEnumAlgorithmsFn = unsafe extern "system" fn(
    hProvider: NCRYPT_PROV_HANDLE,
    dwAlgOperations: DWORD,
    pdwAlgCount: PDWORD,
    ppAlgList: *mut PVOID,
    dwFlags: DWORD,
) -> SECURITY_STATUS;
pub type NCryptEnumKeysFn = unsafe extern "system" fn(
    hProvider: NCRYPT_PROV_HANDLE,
    pszScope: LPCWSTR,
    ppKeyName: *mut PVOID,
    ppEnumState: *mut PVOID,
    dwFlags: DWORD,
) -> SECURITY_STATUS;
pub type NCryptImportKeyFn = unsafe extern "system" fn(
    hProvider: NCRYPT_PROV_HANDLE,
    hImportKey: NCRYPT_KEY_HANDLE,
    pszBlobType: LPCWSTR,
    pParameterList: PVOID,
    phKey: *mut NCRYPT_KEY_HANDLE,
    pbData: PBYTE,
    cbData: DWORD,
    dwFlags: DWORD,
) -> SECURITY_STATUS;
pub type NCryptExportKeyFn = unsafe extern "system" fn(
    hProvider: NCRYPT_PROV_HANDLE,
    hKey: NCRYPT_KEY_HANDLE,
    hExportKey: NCRYPT_KEY_HANDLE,
    pszBlobType: LPCWSTR,
    pParameterList: PVOID,
    pbOutput: PBYTE,
    cbOutput: DWORD,
    pcbResult: PDWORD,
    dwFlags: DWORD,
) -> SECURITY_STATUS;
pub type NCryptSignHashFn = unsafe extern "system" fn(
    hProvider: NCRYPT_PROV_HANDLE,
    hKey: NCRYPT_KEY_HANDLE,
    pPaddingInfo: PVOID,
    pbHashValue: PBYTE,
    cbHashValue: DWORD,
    pbSignature: PBYTE,
    cbSignature: DWORD,
    pcbResult: PDWORD,
    dwFlags: DWORD,
) -> SECURITY_STATUS;
pub type NCryptVerifySignatureFn = unsafe extern "system" fn(
    hProvider: NCRYPT_PROV_HANDLE,
    hKey: NCRYPT_KEY_HANDLE,
    pPaddingInfo: PVOID,
    pbHashValue: PBYTE,
    cbHashValue: DWORD,
    pbSignature: PBYTE,
    cbSignature: DWORD,
    dwFlags: DWORD,
) -> SECURITY_STATUS;
pub type NCryptPromptUserFn = unsafe extern "system" fn(
    hProvider: NCRYPT_PROV_HANDLE,
    hKey: NCRYPT_KEY_HANDLE,
    pszOperation: LPCWSTR,
    dwFlags: DWORD,
) -> SECURITY_STATUS;
pub type NCryptNotifyChangeKeyFn = unsafe extern "system" fn(
    hProvider: NCRYPT_PROV_HANDLE,
    phEvent: *mut HANDLE,
    dwFlags: DWORD,
) -> SECURITY_STATUS;
pub type NCryptSecretAgreementFn = unsafe extern "system" fn(
    hProvider: NCRYPT_PROV_HANDLE,
    hPrivKey: NCRYPT_KEY_HANDLE,
    hPubKey: NCRYPT_KEY_HANDLE,
    phAgreedSecret: *mut NCRYPT_SECRET_HANDLE,
    dwFlags: DWORD,
) -> SECURITY_STATUS;
pub type NCryptDeriveKeyFn = unsafe extern "system" fn(
    hProvider: NCRYPT_PROV_HANDLE,
    hSharedSecret: NCRYPT_SECRET_HANDLE,
    pwszKDF: LPCWSTR,
    pParameterList: PVOID,
    pbDerivedKey: PBYTE,
    cbDerivedKey: DWORD,
    pcbResult: PDWORD,
    dwFlags: DWORD,
) -> SECURITY_STATUS;
pub type NCryptFreeSecretFn = unsafe extern "system" fn(
    hProvider: NCRYPT_PROV_HANDLE,
    hSharedSecret: NCRYPT_SECRET_HANDLE,
) -> SECURITY_STATUS;

pub type GetKeyStorageInterfaceFn = unsafe extern "system" fn(
    pszProviderName: LPCWSTR,
    ppFunctionTable: *mut *const NCRYPT_KEY_STORAGE_FUNCTION_TABLE,
    dwFlags: DWORD,
) -> SECURITY_STATUS;
