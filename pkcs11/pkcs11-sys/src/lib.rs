// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    non_camel_case_types,
    non_snake_case,
    clippy::must_use_candidate,
    clippy::use_self
)]

//! The subset of PKCS#11 types used to describe a token and its objects.
//!
//! Refs:
//!
//! - <https://docs.oasis-open.org/pkcs11/pkcs11-base/v2.40/pkcs11-base-v2.40.html>
//! - <https://docs.oasis-open.org/pkcs11/pkcs11-curr/v2.40/pkcs11-curr-v2.40.html>
//!
//!
//! Headers:
//!
//! - <https://www.cryptsoft.com/pkcs11doc/STANDARD/include/v240/pkcs11t.h>

// Note: Section 2.1 "Structure packing" of the base spec says that all structs must be packed to 1 byte.
// In reality, this is only true of PKCS#11 libraries on Windows. The token structs here are only ever
// filled in by this workspace, so they use the platform's natural alignment.

macro_rules! define_enum {
	(@inner $type:ident $f:ident ( $($consts:tt)* ) ( $($match_arms:tt)* ) ()) => {
		#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
		#[repr(transparent)]
		pub struct $type(pub CK_ULONG);

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

	(@inner $type:ident $f:ident ( $($consts:tt)* ) ( $($match_arms:tt)* ) ( $ident:ident = $value:expr, $($rest:tt)* )) => {
		define_enum! {
			@inner
			$type
			$f
			( $($consts)* pub const $ident: $type = $type($value); )
			( $($match_arms)* $ident => $f.write_str(stringify!($ident)), )
			( $($rest)* )
		}
	};

	($type:ident { $($tt:tt)* }) => {
		define_enum! {
			@inner
			$type
			f
			( )
			( )
			( $($tt)* )
		}
	};
}

// CK_BYTE

pub type CK_BYTE = u8;

// CK_CHAR

pub type CK_CHAR = CK_BYTE;

// CK_FLAGS

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(transparent)]
pub struct CK_SLOT_INFO_FLAGS(pub CK_ULONG);

impl CK_SLOT_INFO_FLAGS {
    pub fn has(self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }
}

impl std::ops::BitOr for CK_SLOT_INFO_FLAGS {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        CK_SLOT_INFO_FLAGS(self.0 | rhs.0)
    }
}

pub const CKF_TOKEN_PRESENT: CK_SLOT_INFO_FLAGS = CK_SLOT_INFO_FLAGS(0x0000_0001);

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(transparent)]
pub struct CK_TOKEN_INFO_FLAGS(pub CK_ULONG);

impl CK_TOKEN_INFO_FLAGS {
    pub fn has(self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }
}

impl std::ops::BitOr for CK_TOKEN_INFO_FLAGS {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        CK_TOKEN_INFO_FLAGS(self.0 | rhs.0)
    }
}

pub const CKF_USER_PIN_INITIALIZED: CK_TOKEN_INFO_FLAGS = CK_TOKEN_INFO_FLAGS(0x0000_0008);
pub const CKF_TOKEN_INITIALIZED: CK_TOKEN_INFO_FLAGS = CK_TOKEN_INFO_FLAGS(0x0000_0400);
pub const CKF_SO_PIN_LOCKED: CK_TOKEN_INFO_FLAGS = CK_TOKEN_INFO_FLAGS(0x0040_0000);

// CK_KEY_TYPE

define_enum!(CK_KEY_TYPE {
    CKK_EC = 0x0000_0003,
    CKK_RSA = 0x0000_0000,
});

// CK_MECHANISM_TYPE

define_enum!(CK_MECHANISM_TYPE {
    CKM_ECDSA = 0x0000_1041,
    CKM_ECDSA_SHA256 = 0x0000_1044,
    CKM_ECDSA_SHA384 = 0x0000_1045,
    CKM_RSA_PKCS = 0x0000_0001,
    CKM_RSA_PKCS_OAEP = 0x0000_0009,
    CKM_RSA_PKCS_PSS = 0x0000_000d,
    CKM_SHA256_RSA_PKCS = 0x0000_0040,
    CKM_SHA256_RSA_PKCS_PSS = 0x0000_0043,
    CKM_SHA512_RSA_PKCS = 0x0000_0042,
    CKM_SHA512_RSA_PKCS_PSS = 0x0000_0045,
});

// CK_OBJECT_CLASS

define_enum!(CK_OBJECT_CLASS {
    CKO_CERTIFICATE = 0x0000_0001,
    CKO_PUBLIC_KEY = 0x0000_0002,
    CKO_PRIVATE_KEY = 0x0000_0003,
});

// CK_RV

define_enum!(CK_RV {
    CKR_ARGUMENTS_BAD = 0x0000_0007,

    CKR_BUFFER_TOO_SMALL = 0x0000_0150,

    CKR_FUNCTION_FAILED = 0x0000_0006,
    CKR_FUNCTION_NOT_SUPPORTED = 0x0000_0054,

    CKR_GENERAL_ERROR = 0x0000_0005,

    CKR_KEY_FUNCTION_NOT_PERMITTED = 0x0000_0068,
    CKR_KEY_TYPE_INCONSISTENT = 0x0000_0063,

    CKR_OBJECT_HANDLE_INVALID = 0x0000_0082,
    CKR_OPERATION_NOT_INITIALIZED = 0x0000_0091,

    CKR_PIN_LOCKED = 0x0000_00a4,

    CKR_SESSION_HANDLE_INVALID = 0x0000_00b3,

    CKR_USER_ALREADY_LOGGED_IN = 0x0000_0100,
    CKR_USER_NOT_LOGGED_IN = 0x0000_0101,
    CKR_USER_TYPE_INVALID = 0x0000_0103,
});

// CK_SLOT_ID

#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct CK_SLOT_ID(pub CK_ULONG);

impl std::str::FromStr for CK_SLOT_ID {
    type Err = <CK_ULONG as std::str::FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(CK_SLOT_ID(std::str::FromStr::from_str(s)?))
    }
}

// CK_SLOT_INFO

#[derive(Clone, Debug)]
#[repr(C)]
pub struct CK_SLOT_INFO {
    pub slotDescription: [CK_UTF8CHAR; 64],
    pub manufacturerID: [CK_UTF8CHAR; 32],
    pub flags: CK_SLOT_INFO_FLAGS,
    pub hardwareVersion: CK_VERSION,
    pub firmwareVersion: CK_VERSION,
}

// CK_TOKEN_INFO

#[derive(Clone, Debug)]
#[repr(C)]
pub struct CK_TOKEN_INFO {
    pub label: [CK_UTF8CHAR; 32],
    pub manufacturerID: [CK_UTF8CHAR; 32],
    pub model: [CK_UTF8CHAR; 16],
    pub serialNumber: [CK_CHAR; 16],
    pub flags: CK_TOKEN_INFO_FLAGS,
    pub ulMaxSessionCount: CK_ULONG,
    pub ulSessionCount: CK_ULONG,
    pub ulMaxRwSessionCount: CK_ULONG,
    pub ulRwSessionCount: CK_ULONG,
    pub ulMaxPinLen: CK_ULONG,
    pub ulMinPinLen: CK_ULONG,
    pub ulTotalPublicMemory: CK_ULONG,
    pub ulFreePublicMemory: CK_ULONG,
    pub ulTotalPrivateMemory: CK_ULONG,
    pub ulFreePrivateMemory: CK_ULONG,
    pub hardwareVersion: CK_VERSION,
    pub firmwareVersion: CK_VERSION,
    pub utcTime: [CK_CHAR; 16],
}

// CK_ULONG

pub type CK_ULONG = std::os::raw::c_ulong;

pub const CK_EFFECTIVELY_INFINITE: CK_ULONG = 0;
pub const CK_UNAVAILABLE_INFORMATION: CK_ULONG = !0;

// CK_USER_TYPE

define_enum!(CK_USER_TYPE {
    CKU_SO = 0x0000_0000,
    CKU_USER = 0x0000_0001,
    CKU_CONTEXT_SPECIFIC = 0x0000_0002,
});

// CK_UTF8CHAR

pub type CK_UTF8CHAR = CK_BYTE;

// CK_VERSION

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(C)]
pub struct CK_VERSION {
    pub major: CK_BYTE,
    pub minor: CK_BYTE,
}

impl std::fmt::Display for CK_VERSION {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)
    }
}
