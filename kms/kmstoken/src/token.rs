// Copyright (c) Microsoft. All rights reserved.

use std::sync::{Arc, RwLock};

use kms_common::KmsClient;
use pkcs11_sys::{
    CK_EFFECTIVELY_INFINITE, CK_SLOT_ID, CK_SLOT_INFO, CK_TOKEN_INFO, CK_ULONG,
    CK_UNAVAILABLE_INFORMATION, CK_USER_TYPE, CK_VERSION, CKF_SO_PIN_LOCKED, CKF_TOKEN_INITIALIZED,
    CKF_TOKEN_PRESENT, CKF_USER_PIN_INITIALIZED, CKR_OPERATION_NOT_INITIALIZED, CKR_PIN_LOCKED,
    CKR_USER_ALREADY_LOGGED_IN, CKR_USER_NOT_LOGGED_IN, CKR_USER_TYPE_INVALID,
    CKU_CONTEXT_SPECIFIC, CKU_SO, CKU_USER,
};

use crate::config::TokenConfig;
use crate::object_store::{load_objects, load_state, ObjectStoreState};
use crate::{Error, HandleRegistry, Object};

const SLOT_DESCRIPTION: &str = "A virtual slot mapped to a key ring in Google Cloud KMS";
const MANUFACTURER_ID: &str = "Google";
const TOKEN_MODEL: &str = "Cloud KMS Token";

/// A virtual HSM exposing the keys of one remote key ring.
///
/// The set of objects is fixed when the token is created. Only the login state changes afterwards.
pub struct Token {
    slot_id: CK_SLOT_ID,
    slot_info: CK_SLOT_INFO,
    token_info: CK_TOKEN_INFO,
    objects: HandleRegistry<Object>,
    is_logged_in: RwLock<bool>,
}

impl Token {
    /// Loads the token's objects from the key ring named in `token_config`.
    pub fn new(
        slot_id: CK_SLOT_ID,
        token_config: &TokenConfig,
        client: &dyn KmsClient,
        generate_certificates: bool,
    ) -> Result<Self, Error> {
        let state = load_state(client, &token_config.key_ring, generate_certificates)?;
        Token::from_state(slot_id, token_config, &state)
    }

    /// Creates a token from a previously loaded object store snapshot.
    pub fn from_state(
        slot_id: CK_SLOT_ID,
        token_config: &TokenConfig,
        state: &ObjectStoreState,
    ) -> Result<Self, Error> {
        let slot_info = new_slot_info()?;
        let token_info = new_token_info(token_config)?;
        let objects = load_objects(state)?;

        log::info!(
            "slot {} holds {} objects from {}",
            slot_id.0,
            objects.len(),
            token_config.key_ring,
        );

        Ok(Token {
            slot_id,
            slot_info,
            token_info,
            objects,
            is_logged_in: RwLock::new(false),
        })
    }

    pub fn slot_id(&self) -> CK_SLOT_ID {
        self.slot_id
    }

    pub fn slot_info(&self) -> &CK_SLOT_INFO {
        &self.slot_info
    }

    pub fn token_info(&self) -> &CK_TOKEN_INFO {
        &self.token_info
    }

    pub fn is_logged_in(&self) -> bool {
        *self
            .is_logged_in
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Logs in as `user_type`. Only the normal user role is supported, and no PIN is required.
    pub fn login(&self, user_type: CK_USER_TYPE) -> Result<(), Error> {
        match user_type {
            CKU_USER => (),
            CKU_SO => {
                return Err(Error::permission_denied("security officer login is not supported")
                    .with_rv(CKR_PIN_LOCKED))
            }
            CKU_CONTEXT_SPECIFIC => {
                return Err(Error::permission_denied(
                    "context specific login is not supported",
                )
                .with_rv(CKR_OPERATION_NOT_INITIALIZED))
            }
            user_type => {
                return Err(
                    Error::invalid_argument(format!("unknown user type {user_type}"))
                        .with_rv(CKR_USER_TYPE_INVALID),
                )
            }
        }

        let mut is_logged_in = self
            .is_logged_in
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *is_logged_in {
            return Err(Error::failed_precondition("user is already logged in")
                .with_rv(CKR_USER_ALREADY_LOGGED_IN));
        }
        *is_logged_in = true;

        Ok(())
    }

    pub fn logout(&self) -> Result<(), Error> {
        let mut is_logged_in = self
            .is_logged_in
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !*is_logged_in {
            return Err(
                Error::failed_precondition("user is not logged in").with_rv(CKR_USER_NOT_LOGGED_IN)
            );
        }
        *is_logged_in = false;

        Ok(())
    }

    pub fn get_object(&self, handle: CK_ULONG) -> Result<Arc<Object>, Error> {
        self.objects.get(handle)
    }

    /// Returns the handles of all objects matching `predicate`, ordered by key name and then object class.
    pub fn find_objects<P>(&self, predicate: P) -> Vec<CK_ULONG>
    where
        P: Fn(&Object) -> bool,
    {
        self.objects.find(
            predicate,
            Some(|a: &Object, b: &Object| {
                a.kms_key_name()
                    .cmp(b.kms_key_name())
                    .then_with(|| a.object_class().cmp(&b.object_class()))
            }),
        )
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("slot_id", &self.slot_id)
            .field("objects", &self.objects)
            .field("is_logged_in", &self.is_logged_in())
            .finish()
    }
}

fn new_slot_info() -> Result<CK_SLOT_INFO, Error> {
    let mut slot_info = CK_SLOT_INFO {
        slotDescription: [b' '; 64],
        manufacturerID: [b' '; 32],
        flags: CKF_TOKEN_PRESENT,
        hardwareVersion: CK_VERSION::default(),
        firmwareVersion: CK_VERSION::default(),
    };
    copy_padded(&mut slot_info.slotDescription, SLOT_DESCRIPTION, "slot description")?;
    copy_padded(&mut slot_info.manufacturerID, MANUFACTURER_ID, "manufacturer")?;
    Ok(slot_info)
}

fn new_token_info(token_config: &TokenConfig) -> Result<CK_TOKEN_INFO, Error> {
    let mut token_info = CK_TOKEN_INFO {
        label: [b' '; 32],
        manufacturerID: [b' '; 32],
        model: [b' '; 16],
        serialNumber: [b'0'; 16],
        flags: CKF_USER_PIN_INITIALIZED | CKF_TOKEN_INITIALIZED | CKF_SO_PIN_LOCKED,
        ulMaxSessionCount: CK_EFFECTIVELY_INFINITE,
        ulSessionCount: CK_UNAVAILABLE_INFORMATION,
        ulMaxRwSessionCount: CK_EFFECTIVELY_INFINITE,
        ulRwSessionCount: CK_UNAVAILABLE_INFORMATION,
        ulMaxPinLen: 0,
        ulMinPinLen: 0,
        ulTotalPublicMemory: CK_UNAVAILABLE_INFORMATION,
        ulFreePublicMemory: CK_UNAVAILABLE_INFORMATION,
        ulTotalPrivateMemory: CK_UNAVAILABLE_INFORMATION,
        ulFreePrivateMemory: CK_UNAVAILABLE_INFORMATION,
        hardwareVersion: CK_VERSION::default(),
        firmwareVersion: CK_VERSION::default(),
        utcTime: [b'0'; 16],
    };
    copy_padded(&mut token_info.label, &token_config.label, "token label")?;
    copy_padded(&mut token_info.manufacturerID, MANUFACTURER_ID, "manufacturer")?;
    copy_padded(&mut token_info.model, TOKEN_MODEL, "token model")?;
    Ok(token_info)
}

/// Copies `value` into a fixed-width, space-padded field.
fn copy_padded(field: &mut [u8], value: &str, name: &str) -> Result<(), Error> {
    let value = value.as_bytes();
    if value.len() > field.len() {
        return Err(Error::invalid_argument(format!(
            "{name} is longer than {} bytes",
            field.len()
        )));
    }

    field[..value.len()].copy_from_slice(value);
    field[value.len()..].fill(b' ');
    Ok(())
}
