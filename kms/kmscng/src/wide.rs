// Copyright (c) Microsoft. All rights reserved.

use kmstoken::Error;
use ncrypt_sys::{NTE_INVALID_PARAMETER, WCHAR};

use crate::ErrorExt;

/// Decodes a UTF-16 string without its NUL terminator.
pub(crate) fn decode(s: &[WCHAR], name: &str) -> Result<String, Error> {
    String::from_utf16(s).map_err(|err| {
        Error::invalid_argument(format!("{name} is not valid UTF-16"))
            .with_status(NTE_INVALID_PARAMETER)
            .with_source(err)
    })
}

/// Encodes `s` as a NUL-terminated UTF-16LE byte string, the form of string-valued properties.
pub(crate) fn encode(s: &str) -> Vec<u8> {
    s.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect()
}

#[cfg(test)]
pub(crate) fn to_wide(s: &str) -> Vec<WCHAR> {
    s.encode_utf16().collect()
}
