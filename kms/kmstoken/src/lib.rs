// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

//! A virtual token whose objects are the asymmetric keys of a remote key ring.
//!
//! Private key material never leaves the remote service. The token holds public keys,
//! optional certificates issued by a per-process authority, and the metadata needed to
//! route signing requests back to the service.

mod algorithm;
pub use algorithm::{get_details, AlgorithmDetails};

mod cert_authority;
pub use cert_authority::CertAuthority;

pub mod config;
pub use config::{Config, TokenConfig};

mod error;
pub use error::{Error, ErrorKind};

mod handle_registry;
pub use handle_registry::{HandleRegistry, RawHandle};

mod object;
pub use object::{KeyPair, Object};

mod object_store;
pub use object_store::{load_objects, load_state, AsymmetricKey, Certificate, ObjectStoreState};

mod preconditions;
pub use preconditions::check_key_preconditions;

mod token;
pub use token::Token;
