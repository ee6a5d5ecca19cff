//! Keep registration: turning `keep` statements into pointers.

use std::sync::Arc;

use super::Context;
use crate::cache::{CacheRef, KeepMapRef, Pointer, ResolvedInstance, lock, new_cache};
use crate::definition::{Definition, KeepStatement};
use crate::error::ContextError;
use crate::scope::Scope;

impl Context {
    /// Register `keep` on the top frame, as if its definition declared it.
    /// Returns `false` when the target does not name a child definition.
    pub fn add_keep(&mut self, keep: &KeepStatement) -> Result<bool, ContextError> {
        let top = self.top.ok_or(ContextError::StackUnderflow)?;
        let runtime = self.runtime.clone();
        let family = self.family.clone();
        let mut arena = lock(&family.arena);
        let enclosing = arena
            .get(top)
            .and_then(|scope| scope.previous)
            .and_then(|previous| arena.get(previous))
            .map(|scope| scope.keep_map.clone());
        let scope = arena.get_mut(top).ok_or(ContextError::StaleScope(top))?;
        let definition = runtime.namespace().definition(scope.definition);
        Ok(self.register_keep(scope, definition, keep, enclosing.as_ref()))
    }

    pub(super) fn register_keeps(
        &self,
        scope: &mut Scope,
        definition: &Definition,
        enclosing: Option<&KeepMapRef>,
    ) {
        for keep in definition.keeps() {
            self.register_keep(scope, definition, keep, enclosing);
        }
    }

    /// Point the target name, its alias and its container path at one shared
    /// slot. The qualified name `owner.target` goes into the `enclosing` keep
    /// map, so the slot stays reachable after this frame is popped.
    fn register_keep(
        &self,
        scope: &mut Scope,
        definition: &Definition,
        keep: &KeepStatement,
        enclosing: Option<&KeepMapRef>,
    ) -> bool {
        let namespace = self.runtime.namespace();
        let Some(target_id) = namespace.child_definition(definition.id, &keep.target) else {
            log::warn!(
                "`{}` keeps `{}`, which it does not define",
                definition.full_name,
                keep.target
            );
            return false;
        };
        let target_definition = namespace.definition(target_id);
        let target = ResolvedInstance::new(target_id, &keep.target);
        let alias_target = keep.alias.as_deref().map(|alias| {
            let alias_id = namespace.child_definition(definition.id, alias).unwrap_or(target_id);
            ResolvedInstance::new(alias_id, alias)
        });

        let (table, key, qualified): (CacheRef, String, Option<String>) =
            if target_definition.is_global() {
                (
                    self.runtime.durable_table(target_definition),
                    target_definition.full_name.to_string(),
                    None,
                )
            } else {
                let table = match &keep.container {
                    Some(container) => scope
                        .keep_tables
                        .entry(container.to_string())
                        .or_insert_with(new_cache)
                        .clone(),
                    None => scope.cache.clone(),
                };
                (
                    table,
                    keep.target.to_string(),
                    Some(format!("{}.{}", definition.full_name, keep.target)),
                )
            };

        let pointer = Arc::new(Pointer {
            target,
            alias_target,
            key,
            container_key: keep.container.as_deref().map(str::to_string),
            cache: table,
        });
        let mut keep_map = lock(&scope.keep_map);
        keep_map.insert(keep.target.to_string(), pointer.clone());
        if let Some(alias) = &keep.alias {
            keep_map.insert(alias.to_string(), pointer.clone());
        }
        if let Some(container) = &keep.container {
            keep_map.insert(format!("{container}.{}", keep.target), pointer.clone());
        }
        drop(keep_map);
        if let Some(qualified) = qualified {
            lock(enclosing.unwrap_or(&scope.keep_map)).insert(qualified, pointer.clone());
        }

        self.runtime.stats().record_keep();
        log::debug!(
            "`{}` keeps `{}` under `{}`{}",
            definition.full_name,
            keep.target,
            pointer.key,
            keep.alias.as_ref().map(|alias| format!(" as `{alias}`")).unwrap_or_default()
        );
        true
    }

    /// Target name behind a `keep x as y` alias visible from the top frame.
    pub fn keep_target(&self, name: &str) -> Option<Arc<str>> {
        let arena = self.arena();
        let mut current = self.top;
        while let Some(scope) = current.and_then(|id| arena.get(id)) {
            if let Some(pointer) = scope.keep_pointer(name) {
                let aliased = pointer
                    .alias_target
                    .as_ref()
                    .is_some_and(|alias| &*alias.name == name);
                return aliased.then(|| pointer.target.name.clone());
            }
            current = scope.previous;
        }
        None
    }
}
