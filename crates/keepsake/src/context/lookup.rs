//! Reading cached values through the frame chain.

use std::sync::Arc;

use super::Context;
use crate::cache::{CacheEntry, CacheRef, Holder, Pointer, lock, loop_key};
use crate::definition::{Access, DefId, first_segment};
use crate::error::ContextError;
use crate::value::{ArgumentList, Value, same_arguments};

/// Names that never delegate to an enclosing frame.
pub const RESERVED_NAMES: &[&str] = &[
    "this", "super", "owner", "site", "core", "container", "count", "keys",
];

/// A cache read request.
#[derive(Debug, Clone, Copy)]
pub struct Lookup<'a> {
    pub key: &'a str,
    /// Fully-qualified key to try in the durable tables first.
    pub global_key: Option<&'a str>,
    /// Definition the value must have been computed for.
    pub definition: Option<DefId>,
    pub arguments: Option<&'a ArgumentList>,
    /// Search the top frame only.
    pub local: bool,
}

impl<'a> Lookup<'a> {
    pub fn new(key: &'a str) -> Self {
        Self {
            key,
            global_key: None,
            definition: None,
            arguments: None,
            local: false,
        }
    }

    pub fn global(mut self, global_key: &'a str) -> Self {
        self.global_key = Some(global_key);
        self
    }

    pub fn for_definition(mut self, definition: DefId) -> Self {
        self.definition = Some(definition);
        self
    }

    pub fn with_arguments(mut self, arguments: &'a ArgumentList) -> Self {
        self.arguments = Some(arguments);
        self
    }

    pub fn local(mut self) -> Self {
        self.local = true;
        self
    }
}

impl Context {
    pub fn get(&self, key: &str) -> Result<Option<Value>, ContextError> {
        self.lookup(&Lookup::new(key))
    }

    /// Find the value cached for `request.key`.
    ///
    /// Durable tables come first when a global key is given. Then each frame
    /// is tried (its own cache, loop-suffixed, then its keep pointer) before
    /// moving to the enclosing frame. The walk stops at a frame whose
    /// definition declares the key's head itself, at reserved names, and
    /// after the top frame for local requests.
    pub fn lookup(&self, request: &Lookup<'_>) -> Result<Option<Value>, ContextError> {
        let found = self.find(request)?;
        self.runtime.stats().record_lookup(found.is_some());
        Ok(found)
    }

    fn find(&self, request: &Lookup<'_>) -> Result<Option<Value>, ContextError> {
        let namespace = self.runtime.namespace();
        let arena = self.arena();
        let Some(top) = self.top else {
            return Ok(None);
        };
        let top_scope = arena.get(top).ok_or(ContextError::StaleScope(top))?;
        let origin = top_scope.definition;

        if let Some(global_key) = request.global_key {
            let mut tables: Vec<CacheRef> = Vec::with_capacity(3);
            if let Some(definition) = request.definition.map(|id| namespace.definition(id)) {
                if definition.is_global() {
                    tables.push(self.runtime.durable_table(definition));
                }
            }
            tables.extend(top_scope.site_cache.clone());
            tables.push(self.runtime.global_keep().clone());
            let loop_index = top_scope.loop_index;
            let slot = loop_key(global_key, loop_index);
            for table in tables {
                let entry = lock(&table).get(slot.as_ref()).cloned();
                if let Some(entry) = entry {
                    if let Some(value) = self.resolve_entry(entry, request, origin, loop_index)? {
                        return Ok(Some(value));
                    }
                }
            }
        }

        let head = first_segment(request.key);
        let reserved = RESERVED_NAMES.contains(&head);
        let mut current = Some(top);
        while let Some(id) = current {
            let scope = arena.get(id).ok_or(ContextError::StaleScope(id))?;
            let entry = scope
                .cached(request.key)
                .or_else(|| scope.keep_pointer(request.key).map(CacheEntry::Pointer));
            if let Some(entry) = entry {
                if let Some(value) = self.resolve_entry(entry, request, origin, scope.loop_index)? {
                    return Ok(Some(value));
                }
            }
            if request.local || reserved {
                break;
            }
            let local_allowed = namespace.is_within(origin, scope.definition);
            if namespace.has_child_definition(scope.definition, head, local_allowed) {
                break;
            }
            current = scope.previous;
        }
        Ok(None)
    }

    /// Unwrap a cache entry to its value, following pointers into the slots
    /// of loop iteration `loop_index`.
    fn resolve_entry(
        &self,
        entry: CacheEntry,
        request: &Lookup<'_>,
        origin: DefId,
        loop_index: Option<u32>,
    ) -> Result<Option<Value>, ContextError> {
        let entry = match entry {
            CacheEntry::Pointer(pointer) => match self.follow(pointer, request.key, loop_index)? {
                Some(entry) => entry,
                None => return Ok(None),
            },
            entry => entry,
        };
        Ok(match entry {
            CacheEntry::Value(value) => Some(value),
            CacheEntry::Holder(holder) => {
                if self.holder_visible(&holder, origin) && holder_matches(&holder, request) {
                    holder.data.clone()
                } else {
                    None
                }
            }
            CacheEntry::Element(element) => element.resolve(),
            CacheEntry::Pointer(_) => None,
        })
    }

    /// Follow a pointer chain to the first entry that is not a pointer.
    fn follow(
        &self,
        pointer: Arc<Pointer>,
        key: &str,
        loop_index: Option<u32>,
    ) -> Result<Option<CacheEntry>, ContextError> {
        let limit = self.runtime.config().max_pointer_hops;
        let mut pointer = pointer;
        for hops in 1..=limit {
            let entry = lock(&pointer.cache).get(pointer.slot_key(loop_index).as_ref()).cloned();
            match entry {
                Some(CacheEntry::Pointer(next)) => pointer = next,
                entry => {
                    self.runtime.stats().record_pointer_hops(hops);
                    return Ok(entry);
                }
            }
        }
        log::error!("pointer chain for `{key}` exceeds {limit} hops");
        Err(ContextError::PointerChainTooLong {
            key: key.to_string(),
            limit,
        })
    }

    /// A local definition's value is only visible from inside its owner.
    fn holder_visible(&self, holder: &Holder, origin: DefId) -> bool {
        let namespace = self.runtime.namespace();
        let definition = namespace.definition(holder.nominal_definition);
        match (definition.access, definition.owner) {
            (Access::Local, Some(owner)) => namespace.is_within(origin, owner),
            _ => true,
        }
    }

    /// Whether a kept name is registered within reach of the top frame.
    pub fn is_kept(&self, key: &str) -> bool {
        let levels = self.runtime.config().propagation_levels();
        let arena = self.arena();
        let mut current = self.top;
        let mut visited = 0;
        while let Some(scope) = current.and_then(|id| arena.get(id)) {
            if levels.is_some_and(|levels| visited > levels) {
                break;
            }
            if scope.keep_pointer(key).is_some() {
                return true;
            }
            visited += 1;
            current = scope.previous;
        }
        false
    }
}

fn holder_matches(holder: &Holder, request: &Lookup<'_>) -> bool {
    match (request.definition, request.arguments) {
        (Some(definition), Some(arguments)) => holder.matches(definition, arguments),
        (Some(definition), None) => holder.matches(definition, &ArgumentList::new()),
        (None, Some(arguments)) => same_arguments(&holder.nominal_arguments, arguments),
        (None, None) => true,
    }
}
