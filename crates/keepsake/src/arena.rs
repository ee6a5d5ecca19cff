use serde::{Deserialize, Serialize};

use crate::scope::Scope;

/// Generational index into the scope arena.
/// Detects use of a frame id after its slot was recycled.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct ScopeId {
    pub index: u32,
    pub generation: u32,
}

struct Slot {
    generation: u32,
    live: bool,
    scope: Scope,
}

/// Result of releasing a link on a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Released {
    pub freed: usize,
}

/// Arena of scope frames shared by one family of cloned contexts.
///
/// `previous` links between frames are `ScopeId`s. A frame stays live while
/// another frame links to it (`ref_count`) or a context holds it (`pins`).
pub struct ScopeArena {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    recycle: bool,
    live: usize,
}

impl ScopeArena {
    pub fn new(recycle: bool) -> Self {
        Self::with_capacity(64, recycle)
    }

    pub fn with_capacity(capacity: usize, recycle: bool) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            recycle,
            live: 0,
        }
    }

    /// Allocate a frame initialized by `init`. Returns the id and whether a
    /// retired slot was reused.
    pub fn alloc(&mut self, init: impl FnOnce(&mut Scope)) -> (ScopeId, bool) {
        self.live += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.live = true;
            init(&mut slot.scope);
            (ScopeId { index, generation: slot.generation }, true)
        } else {
            let index = self.slots.len() as u32;
            let mut scope = Scope::default();
            init(&mut scope);
            self.slots.push(Slot { generation: 0, live: true, scope });
            (ScopeId { index, generation: 0 }, false)
        }
    }

    /// Free an unreferenced frame.
    ///
    /// # Panics
    /// If the frame is still referenced.
    fn free(&mut self, id: ScopeId) {
        if !self.is_valid(id) {
            return;
        }
        let slot = &mut self.slots[id.index as usize];
        slot.scope.clear();
        slot.live = false;
        // Bump generation immediately to invalidate outstanding ids
        slot.generation += 1;
        self.live -= 1;
        if self.recycle {
            self.free_list.push(id.index);
        }
    }

    pub fn is_valid(&self, id: ScopeId) -> bool {
        self.slots
            .get(id.index as usize)
            .is_some_and(|slot| slot.live && slot.generation == id.generation)
    }

    pub fn get(&self, id: ScopeId) -> Option<&Scope> {
        if self.is_valid(id) {
            Some(&self.slots[id.index as usize].scope)
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, id: ScopeId) -> Option<&mut Scope> {
        if self.is_valid(id) {
            Some(&mut self.slots[id.index as usize].scope)
        } else {
            None
        }
    }

    /// Record a context holding `id`.
    pub fn pin(&mut self, id: ScopeId) {
        if let Some(scope) = self.get_mut(id) {
            scope.pins += 1;
        }
    }

    /// Record a new frame whose `previous` is `id`.
    pub fn link(&mut self, id: ScopeId) {
        if let Some(scope) = self.get_mut(id) {
            scope.ref_count += 1;
        }
    }

    /// Drop a context's hold on `id`, freeing every frame that becomes unreferenced.
    pub fn unpin(&mut self, id: ScopeId) -> Released {
        match self.get_mut(id) {
            Some(scope) => {
                scope.pins = scope.pins.saturating_sub(1);
                if scope.is_unreferenced() {
                    self.free_chain(id)
                } else {
                    Released::default()
                }
            }
            None => Released::default(),
        }
    }

    /// Free `id` and walk down the `previous` chain while frames become unreferenced.
    fn free_chain(&mut self, id: ScopeId) -> Released {
        let mut released = Released::default();
        let mut current = Some(id);
        while let Some(id) = current.take() {
            let Some(previous) = self.get(id).map(|scope| scope.previous) else {
                break;
            };
            self.free(id);
            released.freed += 1;
            if let Some(previous) = previous {
                if let Some(scope) = self.get_mut(previous) {
                    scope.ref_count = scope.ref_count.saturating_sub(1);
                    if scope.is_unreferenced() {
                        current = Some(previous);
                    }
                }
            }
        }
        released
    }

    /// Number of live frames.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Number of slots, including retired ones.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for ScopeArena {
    fn default() -> Self {
        Self::new(true)
    }
}
