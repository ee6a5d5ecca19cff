//! One activation frame of the context stack.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use crate::arena::ScopeId;
use crate::cache::{
    CacheEntry, CacheRef, KeepMapRef, Pointer, copy_cache, copy_keep_map, lock, loop_key,
    new_cache, new_keep_map,
};
use crate::definition::DefId;
use crate::value::{ArgumentList, ParameterList};

#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub definition: DefId,
    /// `None` starts a new call frame; `Some` continues a super-call chain.
    pub super_definition: Option<DefId>,
    pub parameters: ParameterList,
    pub arguments: ArgumentList,
    pub cache: CacheRef,
    pub keep_map: KeepMapRef,
    /// Tables for `keep x in c`, keyed by container name.
    pub keep_tables: HashMap<String, CacheRef>,
    /// Site-wide cache of the site this frame runs in.
    pub site_cache: Option<CacheRef>,
    pub site: Option<DefId>,
    pub previous: Option<ScopeId>,
    /// Frames whose `previous` is this frame.
    pub ref_count: u32,
    /// Contexts holding this frame as their top (or unpushed) frame.
    pub pins: u32,
    pub loop_index: Option<u32>,
    pub loop_index_generator: u32,
    pub context_state: u64,
}

impl Scope {
    pub fn new(
        definition: DefId,
        super_definition: Option<DefId>,
        parameters: ParameterList,
        arguments: ArgumentList,
        previous: Option<ScopeId>,
    ) -> Self {
        Self {
            definition,
            super_definition,
            parameters,
            arguments,
            cache: new_cache(),
            keep_map: new_keep_map(),
            previous,
            ..Self::default()
        }
    }

    pub fn is_unreferenced(&self) -> bool {
        self.ref_count == 0 && self.pins == 0
    }

    /// Reset the frame for reuse. Allocations nobody else shares are kept.
    ///
    /// # Panics
    /// If another frame or a context still references this frame.
    pub fn clear(&mut self) {
        assert!(
            self.is_unreferenced(),
            "clearing scope for {} with ref_count {} and {} pins",
            self.definition,
            self.ref_count,
            self.pins
        );
        match Arc::get_mut(&mut self.cache) {
            Some(cache) => cache.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner()).clear(),
            None => self.cache = new_cache(),
        }
        match Arc::get_mut(&mut self.keep_map) {
            Some(keep_map) => {
                keep_map.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner()).clear()
            }
            None => self.keep_map = new_keep_map(),
        }
        self.keep_tables.clear();
        self.site_cache = None;
        self.site = None;
        self.super_definition = None;
        self.parameters.clear();
        self.arguments.clear();
        self.previous = None;
        self.loop_index = None;
        self.loop_index_generator = 0;
        self.context_state = 0;
    }

    /// Overwrite this frame with `other`'s binding. With `copy_keep` the caches
    /// and keep maps are shared with `other`; otherwise they are copied.
    /// Link counts are not copied.
    ///
    /// # Panics
    /// If this frame is still referenced.
    pub fn copy_from(&mut self, other: &Scope, copy_keep: bool) {
        self.clear();
        self.definition = other.definition;
        self.super_definition = other.super_definition;
        self.parameters = other.parameters.clone();
        self.arguments = other.arguments.clone();
        if copy_keep {
            self.cache = other.cache.clone();
            self.keep_map = other.keep_map.clone();
            self.keep_tables = other.keep_tables.clone();
        } else {
            self.cache = copy_cache(&other.cache);
            self.keep_map = copy_keep_map(&other.keep_map);
            self.keep_tables = other
                .keep_tables
                .iter()
                .map(|(name, table)| (name.clone(), copy_cache(table)))
                .collect();
            self.rebase_keeps(other);
        }
        self.site_cache = other.site_cache.clone();
        self.site = other.site;
        self.previous = other.previous;
        self.loop_index = other.loop_index;
        self.loop_index_generator = other.loop_index_generator;
        self.context_state = other.context_state;
    }

    /// Re-point keeps that target `other`'s own tables at this frame's copies.
    /// Keeps into durable or ancestor tables stay shared.
    fn rebase_keeps(&self, other: &Scope) {
        let mut keep_map = lock(&self.keep_map);
        for pointer in keep_map.values_mut() {
            let copy = if pointer.points_into(&other.cache) {
                Some(self.cache.clone())
            } else {
                other
                    .keep_tables
                    .iter()
                    .find(|(_, table)| pointer.points_into(table))
                    .and_then(|(name, _)| self.keep_tables.get(name).cloned())
            };
            if let Some(cache) = copy {
                *pointer = Arc::new(Pointer { cache, ..(**pointer).clone() });
            }
        }
    }

    /// Cache key for `key`, suffixed with the active loop index.
    pub fn slot_key<'k>(&self, key: &'k str) -> Cow<'k, str> {
        loop_key(key, self.loop_index)
    }

    pub fn cached(&self, key: &str) -> Option<CacheEntry> {
        lock(&self.cache).get(self.slot_key(key).as_ref()).cloned()
    }

    pub fn keep_pointer(&self, key: &str) -> Option<Arc<Pointer>> {
        lock(&self.keep_map).get(key).cloned()
    }

    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|parameter| &**parameter == name)
    }

    pub fn next_loop_index(&mut self) -> u32 {
        let index = self.loop_index_generator;
        self.loop_index_generator += 1;
        self.loop_index = Some(index);
        index
    }
}
