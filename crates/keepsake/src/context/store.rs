//! Writing computed values and mirroring them into kept slots.

use std::sync::Arc;

use super::Context;
use crate::cache::{CacheEntry, CacheRef, Holder, Pointer, lock, loop_key};
use crate::definition::Access;
use crate::error::ContextError;
use crate::value::Value;

/// The slot a write ended up in.
#[derive(Debug, Clone)]
pub struct Written {
    pub cache: CacheRef,
    pub key: String,
}

impl Written {
    fn is(&self, pointer: &Pointer, loop_index: Option<u32>) -> bool {
        self.key == pointer.slot_key(loop_index) && pointer.points_into(&self.cache)
    }
}

/// Store `entry` in the slot `pointer` designates during loop iteration
/// `loop_index`, following pointers left in that slot.
fn write_through(
    pointer: &Arc<Pointer>,
    entry: CacheEntry,
    limit: usize,
    loop_index: Option<u32>,
) -> Result<Written, ContextError> {
    let mut pointer = pointer.clone();
    for _ in 0..limit {
        let key = pointer.slot_key(loop_index).into_owned();
        let mut cache = lock(&pointer.cache);
        let next = cache.get(&key).and_then(CacheEntry::as_pointer).cloned();
        match next {
            Some(next) => {
                drop(cache);
                pointer = next;
            }
            None => {
                cache.insert(key.clone(), entry);
                return Ok(Written {
                    cache: pointer.cache.clone(),
                    key,
                });
            }
        }
    }
    Err(ContextError::PointerChainTooLong {
        key: pointer.key.clone(),
        limit,
    })
}

impl Context {
    /// Cache `holder` under `key`, propagating it as far as the configured
    /// number of frames.
    pub fn put(&mut self, key: &str, holder: Holder) -> Result<Written, ContextError> {
        let levels = self.runtime.config().propagation_levels();
        self.put_with_levels(key, holder, levels)
    }

    /// Cache `holder` under `key` in the top frame, or in the slot a keep
    /// points `key` at. Also records durable definitions in their durable
    /// table and mirrors the value into the keep of the frame owning the
    /// definition, searching at most `max_levels` frames (`None` searches
    /// the whole stack).
    pub fn put_with_levels(
        &mut self,
        key: &str,
        holder: Holder,
        max_levels: Option<usize>,
    ) -> Result<Written, ContextError> {
        let top = self.top.ok_or(ContextError::StackUnderflow)?;
        let runtime = self.runtime.clone();
        let namespace = runtime.namespace();
        let limit = runtime.config().max_pointer_hops;
        let definition = namespace.definition(holder.nominal_definition);
        let entry = CacheEntry::holder(holder);

        let arena = self.arena();
        let top_scope = arena.get(top).ok_or(ContextError::StaleScope(top))?;

        let loop_index = top_scope.loop_index;
        let written = match top_scope.keep_pointer(key) {
            Some(pointer) => write_through(&pointer, entry.clone(), limit, loop_index)?,
            None => {
                let slot = top_scope.slot_key(key).into_owned();
                let existing = lock(&top_scope.cache)
                    .get(&slot)
                    .and_then(CacheEntry::as_pointer)
                    .cloned();
                match existing {
                    Some(pointer) => write_through(&pointer, entry.clone(), limit, loop_index)?,
                    None => {
                        lock(&top_scope.cache).insert(slot.clone(), entry.clone());
                        Written {
                            cache: top_scope.cache.clone(),
                            key: slot,
                        }
                    }
                }
            }
        };

        if definition.is_global() && &*definition.name == key {
            lock(&runtime.durable_table(definition))
                .insert(loop_key(&definition.full_name, loop_index).into_owned(), entry.clone());
        }

        if definition.access != Access::Local {
            if let Some(owner) = definition.owner {
                let mut current = Some(top);
                let mut levels = 0;
                while let Some(id) = current {
                    if max_levels.is_some_and(|max| levels > max) {
                        break;
                    }
                    let scope = arena.get(id).ok_or(ContextError::StaleScope(id))?;
                    if namespace.equals_or_extends(scope.definition, owner) {
                        if id != top {
                            if let Some(pointer) = scope.keep_pointer(&definition.name) {
                                if !written.is(&pointer, scope.loop_index) {
                                    write_through(&pointer, entry.clone(), limit, scope.loop_index)?;
                                    log::debug!(
                                        "mirrored `{}` into the keep of `{}`",
                                        definition.full_name,
                                        namespace.definition(scope.definition).full_name
                                    );
                                }
                            }
                        }
                        break;
                    }
                    levels += 1;
                    current = scope.previous;
                }
            }
        }

        if let Some((container, child)) = key.split_once('.') {
            let mut current = Some(top);
            let mut levels = 0;
            while let Some(id) = current {
                if max_levels.is_some_and(|max| levels > max) {
                    break;
                }
                let scope = arena.get(id).ok_or(ContextError::StaleScope(id))?;
                if scope.keep_tables.contains_key(container) {
                    let pointer = scope
                        .keep_pointer(child)
                        .filter(|pointer| pointer.container_key.as_deref() == Some(container));
                    if let Some(pointer) = pointer {
                        if !written.is(&pointer, scope.loop_index) {
                            write_through(&pointer, entry.clone(), limit, scope.loop_index)?;
                            log::debug!("mirrored `{key}` into container keep `{container}`");
                        }
                    }
                    break;
                }
                levels += 1;
                current = scope.previous;
            }
        }

        Ok(written)
    }

    /// Bind a raw value in the top frame, under the current loop index.
    pub fn put_value(&mut self, key: &str, value: Value) -> Result<(), ContextError> {
        let top = self.top.ok_or(ContextError::StackUnderflow)?;
        let arena = self.arena();
        let scope = arena.get(top).ok_or(ContextError::StaleScope(top))?;
        let slot = scope.slot_key(key).into_owned();
        lock(&scope.cache).insert(slot, CacheEntry::Value(value));
        Ok(())
    }
}
