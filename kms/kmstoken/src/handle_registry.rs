// Copyright (c) Microsoft. All rights reserved.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::Error;

/// Draws above this many consecutive collisions are treated as an exhausted handle space.
const MAX_ALLOCATION_ATTEMPTS: usize = 128;

/// An unsigned integer usable as a handle. Zero is never issued.
pub trait RawHandle:
    Copy + Eq + Ord + std::hash::Hash + std::fmt::Debug + std::fmt::LowerHex + Send + Sync + 'static
{
    /// Draws a uniformly random value, which may be zero.
    fn random() -> Result<Self, Error>;

    fn is_null(self) -> bool;
}

macro_rules! impl_raw_handle {
    ($($ty:ty),*) => {
        $(
            impl RawHandle for $ty {
                fn random() -> Result<Self, Error> {
                    let mut buf = [0_u8; std::mem::size_of::<$ty>()];
                    openssl::rand::rand_bytes(&mut buf).map_err(|err| {
                        Error::internal("could not generate a random handle").with_source(err)
                    })?;
                    Ok(<$ty>::from_ne_bytes(buf))
                }

                fn is_null(self) -> bool {
                    self == 0
                }
            }
        )*
    };
}

impl_raw_handle!(u32, u64, usize);

/// Draws a nonzero handle that is not contained in `in_use`.
pub(crate) fn allocate<H>(in_use: impl Fn(&H) -> bool) -> Result<H, Error>
where
    H: RawHandle,
{
    for _ in 0..MAX_ALLOCATION_ATTEMPTS {
        let handle = H::random()?;
        if !handle.is_null() && !in_use(&handle) {
            return Ok(handle);
        }
    }

    Err(Error::internal("could not allocate an unused handle"))
}

/// Allocates handles for items that are not yet registered anywhere,
/// such as the entries of an object store snapshot being built.
#[derive(Debug, Default)]
pub(crate) struct HandleSet<H> {
    allocated: HashSet<H>,
}

impl<H> HandleSet<H>
where
    H: RawHandle,
{
    pub(crate) fn new() -> Self {
        HandleSet {
            allocated: HashSet::new(),
        }
    }

    pub(crate) fn allocate(&mut self) -> Result<H, Error> {
        let handle = allocate(|handle| self.allocated.contains(handle))?;
        self.allocated.insert(handle);
        Ok(handle)
    }
}

/// A thread-safe map from randomly assigned handles to shared items.
///
/// Lookups take a shared lock and mutations an exclusive one. Items are handed out as
/// `Arc`s, so removing a handle does not invalidate references that callers already hold.
pub struct HandleRegistry<T, H = pkcs11_sys::CK_ULONG> {
    items: RwLock<HashMap<H, Arc<T>>>,
    not_found_code: u64,
}

impl<T, H> HandleRegistry<T, H>
where
    H: RawHandle,
{
    /// Creates an empty registry. Lookups of unknown handles fail with an
    /// `InvalidHandle` error carrying `not_found_code`.
    pub fn new(not_found_code: impl Into<u64>) -> Self {
        HandleRegistry {
            items: RwLock::new(HashMap::new()),
            not_found_code: not_found_code.into(),
        }
    }

    /// Registers an item under a new handle.
    pub fn add(&self, item: Arc<T>) -> Result<H, Error> {
        let mut items = self.write();

        let handle = allocate(|handle| items.contains_key(handle))?;
        items.insert(handle, item);
        log::debug!("registered handle {:#x}", handle);

        Ok(handle)
    }

    /// Registers an item under a caller-chosen handle.
    pub fn add_direct(&self, handle: H, item: Arc<T>) -> Result<(), Error> {
        let mut items = self.write();

        if handle.is_null() {
            return Err(Error::internal("handle 0 is reserved"));
        }
        if items.contains_key(&handle) {
            return Err(Error::internal(format!(
                "handle {handle:#x} is already in use"
            )));
        }
        items.insert(handle, item);

        Ok(())
    }

    pub fn get(&self, handle: H) -> Result<Arc<T>, Error> {
        self.read()
            .get(&handle)
            .cloned()
            .ok_or_else(|| self.not_found(handle))
    }

    pub fn remove(&self, handle: H) -> Result<(), Error> {
        match self.write().remove(&handle) {
            Some(_) => {
                log::debug!("released handle {:#x}", handle);
                Ok(())
            }
            None => Err(self.not_found(handle)),
        }
    }

    /// Returns the handles of all items matching `predicate`.
    ///
    /// The result is ordered by `compare` when given, otherwise by handle.
    pub fn find<P, C>(&self, predicate: P, compare: Option<C>) -> Vec<H>
    where
        P: Fn(&T) -> bool,
        C: Fn(&T, &T) -> std::cmp::Ordering,
    {
        let items = self.read();

        let mut matches: Vec<(H, &Arc<T>)> = items
            .iter()
            .filter(|(_, item)| predicate(item))
            .map(|(handle, item)| (*handle, item))
            .collect();

        match compare {
            Some(compare) => matches.sort_by(|(_, a), (_, b)| compare(a, b)),
            None => matches.sort_by_key(|(handle, _)| *handle),
        }

        matches.into_iter().map(|(handle, _)| handle).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn not_found(&self, handle: H) -> Error {
        Error::invalid_handle(format!("handle {handle:#x} not found"))
            .with_code(self.not_found_code)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<H, Arc<T>>> {
        // A panic while holding the lock aborts the process, so a poisoned lock is never observed.
        self.items.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<H, Arc<T>>> {
        self.items
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<T, H> std::fmt::Debug for HandleRegistry<T, H>
where
    H: RawHandle,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("len", &self.len())
            .finish()
    }
}
