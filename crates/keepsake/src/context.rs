//! The context stack.
//!
//! A `Context` is a view onto a persistent chain of frames stored in an arena
//! shared by every clone of the same family. Cloning copies the top frame only;
//! everything below it is shared by index.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::arena::{ScopeArena, ScopeId};
use crate::cache::{lock, new_cache};
use crate::definition::{DefId, Instantiation};
use crate::error::ContextError;
use crate::namespace::Namespace;
use crate::runtime::Runtime;
use crate::scope::Scope;
use crate::value::{Argument, ArgumentList, same_arguments};

mod keep;
mod lookup;
mod store;

pub use lookup::{Lookup, RESERVED_NAMES};
pub use store::Written;

/// Identity of a clone family, minted when its first context is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RootId(Ulid);

impl RootId {
    fn new() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one point of an evaluation: the same frame state and loop
/// iteration of the same family.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Marker {
    pub root: Option<RootId>,
    pub state: u64,
    pub loop_index: Option<u32>,
}

/// State shared by every clone of one context.
struct Family {
    root: RootId,
    arena: std::sync::Mutex<ScopeArena>,
    state_counter: AtomicU64,
}

/// Copy of a frame's binding, for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub id: ScopeId,
    pub definition: DefId,
    pub super_definition: Option<DefId>,
    pub arguments: ArgumentList,
    pub site: Option<DefId>,
    pub loop_index: Option<u32>,
    pub context_state: u64,
}

impl Frame {
    fn of(id: ScopeId, scope: &Scope) -> Self {
        Self {
            id,
            definition: scope.definition,
            super_definition: scope.super_definition,
            arguments: scope.arguments.clone(),
            site: scope.site,
            loop_index: scope.loop_index,
            context_state: scope.context_state,
        }
    }
}

/// Where a parameter is bound, relative to the top of the stack.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgumentBinding {
    pub argument: Argument,
    /// Frames between the top and the binding frame.
    pub depth: usize,
    pub parameter_index: usize,
    pub definition: DefId,
}

pub struct Context {
    runtime: Arc<Runtime>,
    family: Arc<Family>,
    top: Option<ScopeId>,
    root_scope: Option<ScopeId>,
    size: usize,
    unpushed: Vec<ScopeId>,
}

impl Context {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        let family = Family {
            root: RootId::new(),
            arena: std::sync::Mutex::new(ScopeArena::new(runtime.config().recycle_frames)),
            state_counter: AtomicU64::new(0),
        };
        log::trace!("new context family {}", family.root);
        Self {
            runtime,
            family: Arc::new(family),
            top: None,
            root_scope: None,
            size: 0,
            unpushed: Vec::new(),
        }
    }

    fn arena(&self) -> MutexGuard<'_, ScopeArena> {
        lock(&self.family.arena)
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn namespace(&self) -> &Namespace {
        self.runtime.namespace()
    }

    pub fn root_id(&self) -> RootId {
        self.family.root
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Frame on top of the stack.
    pub fn peek(&self) -> Option<Frame> {
        let top = self.top?;
        self.arena().get(top).map(|scope| Frame::of(top, scope))
    }

    pub fn top_definition(&self) -> Option<DefId> {
        self.definition_of(self.top)
    }

    pub fn root_definition(&self) -> Option<DefId> {
        self.definition_of(self.root_scope)
    }

    fn definition_of(&self, id: Option<ScopeId>) -> Option<DefId> {
        let id = id?;
        self.arena().get(id).map(|scope| scope.definition)
    }

    pub fn current_site(&self) -> Option<DefId> {
        let top = self.top?;
        self.arena().get(top).and_then(|scope| scope.site)
    }

    /// Full names of the frames on the stack, top first.
    pub fn scope_chain(&self) -> Vec<Arc<str>> {
        let namespace = self.runtime.namespace();
        let arena = self.arena();
        let mut chain = Vec::with_capacity(self.size);
        let mut current = self.top;
        while let Some(scope) = current.and_then(|id| arena.get(id)) {
            chain.push(namespace.definition(scope.definition).full_name.clone());
            current = scope.previous;
        }
        chain
    }

    /// Resolve `definition` to something pushable and push a frame for it.
    ///
    /// `new_frame` starts a new call frame; otherwise the frame continues a
    /// super-call chain of the resolved definition.
    pub fn push(
        &mut self,
        definition: DefId,
        arguments: ArgumentList,
        new_frame: bool,
    ) -> Result<(), ContextError> {
        let runtime = self.runtime.clone();
        let namespace = runtime.namespace();
        let config = runtime.config();
        if self.size >= config.max_depth {
            log::warn!(
                "context depth {} reached pushing `{}`",
                config.max_depth,
                namespace.definition(definition).full_name
            );
            return Err(ContextError::DepthExceeded { limit: config.max_depth });
        }

        let canonical = namespace
            .resolve_canonical(definition, arguments, self.top_definition(), config.max_pointer_hops)?
            .ok_or_else(|| {
                ContextError::NullDefinition(namespace.definition(definition).full_name.to_string())
            })?;
        let resolved = namespace.definition(canonical.definition);
        let state = self.family.state_counter.fetch_add(1, Ordering::Relaxed) + 1;

        let family = self.family.clone();
        let mut arena = lock(&family.arena);
        let previous = match self.top {
            Some(top) => Some(arena.get(top).ok_or(ContextError::StaleScope(top))?),
            None => None,
        };

        let (cache, site, site_cache) = if resolved.is_site() {
            let cache = self
                .root_scope
                .and_then(|root| arena.get(root))
                .map_or_else(new_cache, |root| root.cache.clone());
            (cache, Some(resolved.id), Some(runtime.site_keep(resolved.id)))
        } else {
            let previous_site = previous.and_then(|scope| scope.site);
            match resolved.site {
                Some(site) if previous_site != Some(site) => {
                    (new_cache(), Some(site), Some(runtime.site_keep(site)))
                }
                _ => (
                    new_cache(),
                    previous_site,
                    previous.and_then(|scope| scope.site_cache.clone()),
                ),
            }
        };

        let inherited_keeps = previous
            .filter(|scope| {
                scope.definition == canonical.definition
                    && (canonical.arguments.iter().all(Argument::is_missing)
                        || same_arguments(&scope.arguments, &canonical.arguments))
            })
            .map(|scope| (scope.keep_map.clone(), scope.keep_tables.clone()));
        let reuses_keeps = inherited_keeps.is_some();

        let previous_id = self.top;
        let super_definition = if new_frame { None } else { Some(canonical.definition) };
        let (id, recycled) = arena.alloc(|scope| {
            scope.definition = canonical.definition;
            scope.super_definition = super_definition;
            scope.parameters = resolved.parameters.clone();
            scope.arguments = canonical.arguments;
            scope.cache = cache;
            scope.site = site;
            scope.site_cache = site_cache;
            scope.previous = previous_id;
            scope.pins = 1;
            scope.context_state = state;
            if let Some((keep_map, keep_tables)) = inherited_keeps {
                scope.keep_map = keep_map;
                scope.keep_tables = keep_tables;
            }
        });
        if let Some(previous) = previous_id {
            arena.link(previous);
            arena.unpin(previous);
        }

        self.top = Some(id);
        self.size += 1;
        if self.root_scope.is_none() {
            self.root_scope = Some(id);
        }
        runtime.stats().record_push(self.size, recycled);
        log::trace!("push `{}` at depth {}", resolved.full_name, self.size);

        if !reuses_keeps && !resolved.keeps.is_empty() {
            let enclosing = previous_id
                .and_then(|previous| arena.get(previous))
                .map(|scope| scope.keep_map.clone());
            if let Some(scope) = arena.get_mut(id) {
                self.register_keeps(scope, resolved, enclosing.as_ref());
            }
        }
        Ok(())
    }

    /// Push the definition `instantiation` names, as seen from the top frame.
    pub fn push_instance(
        &mut self,
        instantiation: &Instantiation,
        new_frame: bool,
    ) -> Result<DefId, ContextError> {
        let definition = self
            .namespace()
            .lookup_from(self.top_definition(), &instantiation.name)
            .ok_or_else(|| ContextError::UndefinedDefinition(instantiation.name.to_string()))?;
        self.push(definition, instantiation.arguments.clone(), new_frame)?;
        Ok(definition)
    }

    pub fn pop(&mut self) -> Result<(), ContextError> {
        let top = self.top.ok_or(ContextError::StackUnderflow)?;
        let mut arena = self.arena();
        let previous = arena.get(top).ok_or(ContextError::StaleScope(top))?.previous;
        if let Some(previous) = previous {
            arena.pin(previous);
        }
        let released = arena.unpin(top);
        drop(arena);

        self.top = previous;
        self.size = self.size.saturating_sub(1);
        if self.size == 0 {
            self.root_scope = None;
        }
        let stats = self.runtime.stats();
        stats.record_pop();
        stats.record_freed(released.freed);
        log::trace!("pop to depth {}", self.size);
        Ok(())
    }

    /// Step out of the top frame without releasing it, until `repush`.
    pub fn unpush(&mut self) -> Result<(), ContextError> {
        let top = self.top.ok_or(ContextError::StackUnderflow)?;
        let mut arena = self.arena();
        let previous = arena.get(top).ok_or(ContextError::StaleScope(top))?.previous;
        if let Some(previous) = previous {
            arena.pin(previous);
        }
        drop(arena);

        self.unpushed.push(top);
        self.top = previous;
        self.size = self.size.saturating_sub(1);
        Ok(())
    }

    /// Restore the most recently unpushed frame. The frame must sit directly
    /// on the current top, as it did when it was unpushed.
    pub fn repush(&mut self) -> Result<(), ContextError> {
        let id = *self.unpushed.last().ok_or(ContextError::NothingToRepush)?;
        let previous = self.arena().get(id).ok_or(ContextError::StaleScope(id))?.previous;
        if previous != self.top {
            log::error!("repush of {id:?} over a different stack shape");
            return Err(ContextError::RepushMismatch(id));
        }
        self.unpushed.pop();
        let released = match self.top {
            Some(current) => self.arena().unpin(current),
            None => Default::default(),
        };

        self.top = Some(id);
        self.size += 1;
        self.runtime.stats().record_freed(released.freed);
        Ok(())
    }

    /// Branch this context. The clone shares every frame below the top.
    ///
    /// With `copy_keep` the top frame's cache and keep maps are shared with
    /// this context; otherwise the clone gets independent copies.
    pub fn clone_context(&self, copy_keep: bool) -> Context {
        let mut clone = Context {
            runtime: self.runtime.clone(),
            family: self.family.clone(),
            top: None,
            root_scope: None,
            size: 0,
            unpushed: Vec::new(),
        };
        let Some(top) = self.top else {
            return clone;
        };
        let mut arena = self.arena();
        let Some(source) = arena.get(top).cloned() else {
            return clone;
        };
        let (id, recycled) = arena.alloc(|scope| {
            scope.copy_from(&source, copy_keep);
            scope.pins = 1;
        });
        if let Some(previous) = source.previous {
            arena.link(previous);
        }
        drop(arena);

        self.runtime.stats().record_frame(recycled);
        clone.top = Some(id);
        clone.size = self.size;
        clone.root_scope = if self.root_scope == Some(top) { Some(id) } else { self.root_scope };
        clone
    }

    pub fn marker(&self) -> Marker {
        let mut marker = Marker::default();
        self.mark(&mut marker);
        marker
    }

    /// Fill `marker` with the current point of evaluation.
    pub fn mark(&self, marker: &mut Marker) {
        marker.root = Some(self.family.root);
        let top = self.top.and_then(|top| {
            self.arena().get(top).map(|scope| (scope.context_state, scope.loop_index))
        });
        let (state, loop_index) = top.unwrap_or_default();
        marker.state = state;
        marker.loop_index = loop_index;
    }

    /// Start the next loop iteration of the top frame.
    pub fn next_loop_index(&mut self) -> Result<u32, ContextError> {
        let top = self.top.ok_or(ContextError::StackUnderflow)?;
        let mut arena = self.arena();
        let scope = arena.get_mut(top).ok_or(ContextError::StaleScope(top))?;
        Ok(scope.next_loop_index())
    }

    /// Leave the loop. The generator keeps counting so later loops get fresh indices.
    pub fn reset_loop_index(&mut self) {
        self.restore_loop_index(None);
    }

    /// Reinstate the loop index an enclosing loop was using.
    pub fn restore_loop_index(&mut self, index: Option<u32>) {
        if let Some(top) = self.top {
            if let Some(scope) = self.arena().get_mut(top) {
                scope.loop_index = index;
            }
        }
    }

    pub fn loop_index(&self) -> Option<u32> {
        let top = self.top?;
        self.arena().get(top).and_then(|scope| scope.loop_index)
    }

    /// Find the frame binding parameter `name`, walking out through frames
    /// whose definitions are lexically nested in the frame below.
    pub fn argument_for(&self, name: &str) -> Option<ArgumentBinding> {
        let namespace = self.runtime.namespace();
        let arena = self.arena();
        let mut current = self.top?;
        let mut depth = 0;
        loop {
            let scope = arena.get(current)?;
            if let Some(parameter_index) = scope.parameter_index(name) {
                return Some(ArgumentBinding {
                    argument: scope
                        .arguments
                        .get(parameter_index)
                        .cloned()
                        .unwrap_or(Argument::Missing),
                    depth,
                    parameter_index,
                    definition: scope.definition,
                });
            }
            let previous = scope.previous?;
            let outer = arena.get(previous)?.definition;
            if !namespace.is_within(scope.definition, outer) {
                return None;
            }
            depth += 1;
            current = previous;
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        let mut arena = lock(&self.family.arena);
        let mut freed = 0;
        for id in self.top.take().into_iter().chain(self.unpushed.drain(..)) {
            freed += arena.unpin(id).freed;
        }
        drop(arena);
        self.runtime.stats().record_freed(freed);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("root", &self.family.root)
            .field("size", &self.size)
            .field("chain", &self.scope_chain())
            .field("unpushed", &self.unpushed.len())
            .finish()
    }
}
