//! Cache slots: raw values, holders, element references and pointers.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::definition::DefId;
use crate::value::{ArgumentList, Value, same_arguments};

/// A resolved `(definition, arguments)` binding, named the way it was requested.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInstance {
    pub definition: DefId,
    pub arguments: ArgumentList,
    pub name: Arc<str>,
}

impl ResolvedInstance {
    pub fn new(definition: DefId, name: &str) -> Self {
        Self {
            definition,
            arguments: ArgumentList::new(),
            name: name.into(),
        }
    }
}

/// A cached value together with the binding that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Holder {
    pub nominal_definition: DefId,
    pub nominal_arguments: ArgumentList,
    pub resolved_definition: DefId,
    pub resolved_arguments: ArgumentList,
    /// `None` is an explicitly uninitialized payload and reads as absent.
    pub data: Option<Value>,
    pub resolved_instance: Option<ResolvedInstance>,
}

impl Holder {
    pub fn new(definition: DefId, arguments: ArgumentList, data: Value) -> Self {
        Self {
            nominal_definition: definition,
            nominal_arguments: arguments.clone(),
            resolved_definition: definition,
            resolved_arguments: arguments,
            data: Some(data),
            resolved_instance: None,
        }
    }

    pub fn uninitialized(definition: DefId, arguments: ArgumentList) -> Self {
        Self {
            data: None,
            ..Self::new(definition, arguments, Value::Null)
        }
    }

    pub fn with_resolution(mut self, definition: DefId, arguments: ArgumentList) -> Self {
        self.resolved_definition = definition;
        self.resolved_arguments = arguments;
        self
    }

    /// Still valid for a request with this definition and arguments.
    pub fn matches(&self, definition: DefId, arguments: &ArgumentList) -> bool {
        self.nominal_definition == definition && same_arguments(&self.nominal_arguments, arguments)
    }

    /// Same binding, compared by definition and argument identity.
    pub fn same_binding(&self, other: &Holder) -> bool {
        self.matches(other.nominal_definition, &other.nominal_arguments)
    }
}

/// An element of a cached collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementRef {
    pub collection: Value,
    pub index: usize,
}

impl ElementRef {
    pub fn resolve(&self) -> Option<Value> {
        self.collection.as_list()?.get(self.index).cloned()
    }
}

/// "The value for this key lives under `key` in `cache`."
#[derive(Clone)]
pub struct Pointer {
    pub target: ResolvedInstance,
    pub alias_target: Option<ResolvedInstance>,
    pub key: String,
    pub container_key: Option<String>,
    pub cache: CacheRef,
}

impl Pointer {
    /// Key of the designated slot during loop iteration `loop_index`.
    pub fn slot_key(&self, loop_index: Option<u32>) -> Cow<'_, str> {
        loop_key(&self.key, loop_index)
    }

    pub fn points_into(&self, cache: &CacheRef) -> bool {
        Arc::ptr_eq(&self.cache, cache)
    }

    /// Same slot of the same map.
    pub fn same_slot(&self, other: &Pointer) -> bool {
        self.key == other.key && Arc::ptr_eq(&self.cache, &other.cache)
    }
}

impl std::fmt::Debug for Pointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pointer")
            .field("target", &self.target.name)
            .field("alias_target", &self.alias_target.as_ref().map(|alias| &alias.name))
            .field("key", &self.key)
            .field("container_key", &self.container_key)
            .field("cache", &Arc::as_ptr(&self.cache))
            .finish()
    }
}

impl PartialEq for Pointer {
    fn eq(&self, other: &Self) -> bool {
        self.same_slot(other)
            && self.target == other.target
            && self.alias_target == other.alias_target
            && self.container_key == other.container_key
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    Value(Value),
    Holder(Arc<Holder>),
    Element(ElementRef),
    Pointer(Arc<Pointer>),
}

impl CacheEntry {
    pub fn holder(holder: Holder) -> Self {
        CacheEntry::Holder(Arc::new(holder))
    }

    pub fn as_pointer(&self) -> Option<&Arc<Pointer>> {
        match self {
            CacheEntry::Pointer(pointer) => Some(pointer),
            _ => None,
        }
    }
}

impl From<Value> for CacheEntry {
    fn from(value: Value) -> Self {
        CacheEntry::Value(value)
    }
}

pub type CacheMap = HashMap<String, CacheEntry>;
pub type KeepMap = HashMap<String, Arc<Pointer>>;

/// A cache map with its own lock. Writes to a shared map lock only that map.
pub type CacheRef = Arc<Mutex<CacheMap>>;
pub type KeepMapRef = Arc<Mutex<KeepMap>>;

pub fn new_cache() -> CacheRef {
    Arc::new(Mutex::new(CacheMap::new()))
}

pub fn new_keep_map() -> KeepMapRef {
    Arc::new(Mutex::new(KeepMap::new()))
}

/// Lock a map, recovering it if a previous holder panicked.
/// Entries are replaced whole, so a poisoned map is still consistent.
pub fn lock<T>(map: &Mutex<T>) -> MutexGuard<'_, T> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Independent copy of a cache map.
/// `key` as stored during loop iteration `loop_index`: `key#index`.
pub fn loop_key(key: &str, loop_index: Option<u32>) -> Cow<'_, str> {
    match loop_index {
        Some(index) => Cow::Owned(format!("{key}#{index}")),
        None => Cow::Borrowed(key),
    }
}

pub fn copy_cache(cache: &CacheRef) -> CacheRef {
    Arc::new(Mutex::new(lock(cache).clone()))
}

pub fn copy_keep_map(keep_map: &KeepMapRef) -> KeepMapRef {
    Arc::new(Mutex::new(lock(keep_map).clone()))
}
