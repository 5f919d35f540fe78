// Copyright (c) Microsoft. All rights reserved.

use kmstoken::Error;
use ncrypt_sys::{
    DWORD, HANDLE, LPCWSTR, NCRYPT_KEY_HANDLE, NCRYPT_KEY_STORAGE_FUNCTION_TABLE,
    NCRYPT_KEY_STORAGE_INTERFACE_VERSION, NCRYPT_PROV_HANDLE, NCRYPT_SECRET_HANDLE,
    NTE_INVALID_PARAMETER, NTE_NOT_SUPPORTED, PBYTE, PDWORD, PVOID, SECURITY_STATUS, WCHAR,
};

use crate::ErrorExt;

static FUNCTION_TABLE: NCRYPT_KEY_STORAGE_FUNCTION_TABLE =
    NCRYPT_KEY_STORAGE_FUNCTION_TABLE {
        Version: NCRYPT_KEY_STORAGE_INTERFACE_VERSION,
        OpenProvider: Some(open_provider),
        OpenKey: Some(open_key),
        CreatePersistedKey: Some(create_persisted_key),
        GetProviderProperty: Some(get_provider_property),
        GetKeyProperty: Some(get_key_property),
        SetProviderProperty: Some(set_provider_property),
        SetKeyProperty: Some(set_key_property),
        FinalizeKey: Some(finalize_key),
        DeleteKey: Some(delete_key),
        FreeProvider: Some(free_provider),
        FreeKey: Some(free_key),
        FreeBuffer: Some(free_buffer),
        Encrypt: Some(encrypt),
        Decrypt: Some(decrypt),
        IsAlgSupported: Some(is_alg_supported),
        EnumAlgorithms: Some(enum_algorithms),
        EnumKeys: Some(enum_keys),
        ImportKey: Some(import_key),
        ExportKey: Some(export_key),
        SignHash: Some(sign_hash),
        VerifySignature: Some(verify_signature),
        PromptUser: Some(prompt_user),
        NotifyChangeKey: Some(notify_change_key),
        SecretAgreement: Some(secret_agreement),
        DeriveKey: Some(derive_key),
        FreeSecret: Some(free_secret),
    };

pub(crate) unsafe fn get_key_storage_interface(
    _provider_name: LPCWSTR,
    function_table_out: *mut *const NCRYPT_KEY_STORAGE_FUNCTION_TABLE,
    _flags: DWORD,
) -> SECURITY_STATUS {
    crate::r#catch(|| {
        let function_table_out = function_table_out.as_mut().ok_or_else(|| {
            Error::invalid_argument("function table pointer cannot be null")
                .with_status(NTE_INVALID_PARAMETER)
        })?;
        *function_table_out = &FUNCTION_TABLE;
        Ok(())
    })
}

unsafe extern "system" fn open_provider(
    provider_out: *mut NCRYPT_PROV_HANDLE,
    provider_name: LPCWSTR,
    flags: DWORD,
) -> SECURITY_STATUS {
    crate::r#catch(|| {
        let bridge = crate::bridge()?;
        bridge.open_provider(provider_out.as_mut(), wide_str(provider_name), flags)
    })
}

unsafe extern "system" fn free_provider(provider: NCRYPT_PROV_HANDLE) -> SECURITY_STATUS {
    crate::r#catch(|| {
        let bridge = crate::bridge()?;
        bridge.free_provider(provider)
    })
}

unsafe extern "system" fn get_provider_property(
    provider: NCRYPT_PROV_HANDLE,
    property: LPCWSTR,
    output: PBYTE,
    output_len: DWORD,
    result: PDWORD,
    flags: DWORD,
) -> SECURITY_STATUS {
    crate::r#catch(|| {
        let bridge = crate::bridge()?;
        bridge.get_provider_property(
            provider,
            wide_str(property),
            buffer_mut(output, output_len),
            result.as_mut(),
            flags,
        )
    })
}

unsafe extern "system" fn set_provider_property(
    provider: NCRYPT_PROV_HANDLE,
    property: LPCWSTR,
    input: PBYTE,
    input_len: DWORD,
    flags: DWORD,
) -> SECURITY_STATUS {
    crate::r#catch(|| {
        let bridge = crate::bridge()?;
        bridge.set_provider_property(provider, wide_str(property), buffer(input, input_len), flags)
    })
}

unsafe extern "system" fn open_key(
    provider: NCRYPT_PROV_HANDLE,
    key_out: *mut NCRYPT_KEY_HANDLE,
    key_name: LPCWSTR,
    legacy_key_spec: DWORD,
    flags: DWORD,
) -> SECURITY_STATUS {
    crate::r#catch(|| {
        let bridge = crate::bridge()?;
        bridge.open_key(
            provider,
            key_out.as_mut(),
            wide_str(key_name),
            legacy_key_spec,
            flags,
        )
    })
}

unsafe extern "system" fn free_key(
    provider: NCRYPT_PROV_HANDLE,
    key: NCRYPT_KEY_HANDLE,
) -> SECURITY_STATUS {
    crate::r#catch(|| {
        let bridge = crate::bridge()?;
        bridge.free_key(provider, key)
    })
}

unsafe extern "system" fn get_key_property(
    provider: NCRYPT_PROV_HANDLE,
    key: NCRYPT_KEY_HANDLE,
    property: LPCWSTR,
    output: PBYTE,
    output_len: DWORD,
    result: PDWORD,
    flags: DWORD,
) -> SECURITY_STATUS {
    crate::r#catch(|| {
        let bridge = crate::bridge()?;
        bridge.get_key_property(
            provider,
            key,
            wide_str(property),
            buffer_mut(output, output_len),
            result.as_mut(),
            flags,
        )
    })
}

unsafe extern "system" fn sign_hash(
    provider: NCRYPT_PROV_HANDLE,
    key: NCRYPT_KEY_HANDLE,
    padding_info: PVOID,
    hash: PBYTE,
    hash_len: DWORD,
    signature: PBYTE,
    signature_len: DWORD,
    result: PDWORD,
    flags: DWORD,
) -> SECURITY_STATUS {
    crate::r#catch(|| {
        let bridge = crate::bridge()?;
        bridge.sign_hash(
            provider,
            key,
            padding_info.cast_const(),
            buffer(hash, hash_len),
            buffer_mut(signature, signature_len),
            result.as_mut(),
            flags,
        )
    })
}

unsafe extern "system" fn is_alg_supported(
    provider: NCRYPT_PROV_HANDLE,
    alg_id: LPCWSTR,
    flags: DWORD,
) -> SECURITY_STATUS {
    crate::r#catch(|| {
        let bridge = crate::bridge()?;
        bridge.is_alg_supported(provider, wide_str(alg_id), flags)
    })
}

// Unsupported operations

unsafe extern "system" fn create_persisted_key(
    _provider: NCRYPT_PROV_HANDLE,
    _key_out: *mut NCRYPT_KEY_HANDLE,
    _alg_id: LPCWSTR,
    _key_name: LPCWSTR,
    _legacy_key_spec: DWORD,
    _flags: DWORD,
) -> SECURITY_STATUS {
    not_supported("CreatePersistedKey")
}

unsafe extern "system" fn set_key_property(
    _provider: NCRYPT_PROV_HANDLE,
    _key: NCRYPT_KEY_HANDLE,
    _property: LPCWSTR,
    _input: PBYTE,
    _input_len: DWORD,
    _flags: DWORD,
) -> SECURITY_STATUS {
    not_supported("SetKeyProperty")
}

unsafe extern "system" fn finalize_key(
    _provider: NCRYPT_PROV_HANDLE,
    _key: NCRYPT_KEY_HANDLE,
    _flags: DWORD,
) -> SECURITY_STATUS {
    not_supported("FinalizeKey")
}

unsafe extern "system" fn delete_key(
    _provider: NCRYPT_PROV_HANDLE,
    _key: NCRYPT_KEY_HANDLE,
    _flags: DWORD,
) -> SECURITY_STATUS {
    not_supported("DeleteKey")
}

unsafe extern "system" fn free_buffer(_input: PVOID) -> SECURITY_STATUS {
    not_supported("FreeBuffer")
}

unsafe extern "system" fn encrypt(
    _provider: NCRYPT_PROV_HANDLE,
    _key: NCRYPT_KEY_HANDLE,
    _input: PBYTE,
    _input_len: DWORD,
    _padding_info: PVOID,
    _output: PBYTE,
    _output_len: DWORD,
    _result: PDWORD,
    _flags: DWORD,
) -> SECURITY_STATUS {
    not_supported("Encrypt")
}

unsafe extern "system" fn decrypt(
    _provider: NCRYPT_PROV_HANDLE,
    _key: NCRYPT_KEY_HANDLE,
    _input: PBYTE,
    _input_len: DWORD,
    _padding_info: PVOID,
    _output: PBYTE,
    _output_len: DWORD,
    _result: PDWORD,
    _flags: DWORD,
) -> SECURITY_STATUS {
    not_supported("Decrypt")
}

unsafe extern "system" fn enum_algorithms(
    _provider: NCRYPT_PROV_HANDLE,
    _alg_operations: DWORD,
    _alg_count: PDWORD,
    _alg_list: *mut PVOID,
    _flags: DWORD,
) -> SECURITY_STATUS {
    not_supported("EnumAlgorithms")
}

unsafe extern "system" fn enum_keys(
    _provider: NCRYPT_PROV_HANDLE,
    _scope: LPCWSTR,
    _key_name: *mut PVOID,
    _enum_state: *mut PVOID,
    _flags: DWORD,
) -> SECURITY_STATUS {
    not_supported("EnumKeys")
}

unsafe extern "system" fn import_key(
    _provider: NCRYPT_PROV_HANDLE,
    _import_key: NCRYPT_KEY_HANDLE,
    _blob_type: LPCWSTR,
    _parameter_list: PVOID,
    _key_out: *mut NCRYPT_KEY_HANDLE,
    _data: PBYTE,
    _data_len: DWORD,
    _flags: DWORD,
) -> SECURITY_STATUS {
    not_supported("ImportKey")
}

unsafe extern "system" fn export_key(
    _provider: NCRYPT_PROV_HANDLE,
    _key: NCRYPT_KEY_HANDLE,
    _export_key: NCRYPT_KEY_HANDLE,
    _blob_type: LPCWSTR,
    _parameter_list: PVOID,
    _output: PBYTE,
    _output_len: DWORD,
    _result: PDWORD,
    _flags: DWORD,
) -> SECURITY_STATUS {
    not_supported("ExportKey")
}

unsafe extern "system" fn verify_signature(
    _provider: NCRYPT_PROV_HANDLE,
    _key: NCRYPT_KEY_HANDLE,
    _padding_info: PVOID,
    _hash: PBYTE,
    _hash_len: DWORD,
    _signature: PBYTE,
    _signature_len: DWORD,
    _flags: DWORD,
) -> SECURITY_STATUS {
    not_supported("VerifySignature")
}

unsafe extern "system" fn prompt_user(
    _provider: NCRYPT_PROV_HANDLE,
    _key: NCRYPT_KEY_HANDLE,
    _operation: LPCWSTR,
    _flags: DWORD,
) -> SECURITY_STATUS {
    not_supported("PromptUser")
}

unsafe extern "system" fn notify_change_key(
    _provider: NCRYPT_PROV_HANDLE,
    _event: *mut HANDLE,
    _flags: DWORD,
) -> SECURITY_STATUS {
    not_supported("NotifyChangeKey")
}

unsafe extern "system" fn secret_agreement(
    _provider: NCRYPT_PROV_HANDLE,
    _private_key: NCRYPT_KEY_HANDLE,
    _public_key: NCRYPT_KEY_HANDLE,
    _agreed_secret_out: *mut NCRYPT_SECRET_HANDLE,
    _flags: DWORD,
) -> SECURITY_STATUS {
    not_supported("SecretAgreement")
}

unsafe extern "system" fn derive_key(
    _provider: NCRYPT_PROV_HANDLE,
    _shared_secret: NCRYPT_SECRET_HANDLE,
    _kdf: LPCWSTR,
    _parameter_list: PVOID,
    _derived_key: PBYTE,
    _derived_key_len: DWORD,
    _result: PDWORD,
    _flags: DWORD,
) -> SECURITY_STATUS {
    not_supported("DeriveKey")
}

unsafe extern "system" fn free_secret(
    _provider: NCRYPT_PROV_HANDLE,
    _shared_secret: NCRYPT_SECRET_HANDLE,
) -> SECURITY_STATUS {
    not_supported("FreeSecret")
}

fn not_supported(operation: &str) -> SECURITY_STATUS {
    crate::r#catch(|| {
        Err(Error::not_supported(format!("{operation} is not supported"))
            .with_status(NTE_NOT_SUPPORTED))
    })
}

/// The NUL-terminated string at `s`, without its terminator. `None` if `s` is null.
unsafe fn wide_str<'a>(s: LPCWSTR) -> Option<&'a [WCHAR]> {
    if s.is_null() {
        return None;
    }

    let mut len = 0;
    while *s.add(len) != 0 {
        len += 1;
    }

    Some(std::slice::from_raw_parts(s, len))
}

unsafe fn buffer<'a>(p: PBYTE, len: DWORD) -> Option<&'a [u8]> {
    if p.is_null() {
        None
    } else {
        Some(std::slice::from_raw_parts(p, len as usize))
    }
}

unsafe fn buffer_mut<'a>(p: PBYTE, len: DWORD) -> Option<&'a mut [u8]> {
    if p.is_null() {
        None
    } else {
        Some(std::slice::from_raw_parts_mut(p, len as usize))
    }
}
