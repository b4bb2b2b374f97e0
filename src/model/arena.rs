//! Source arena: ID-indexed slots for sources under construction
//!
//! Sources may reference sources declared later (composite branches,
//! extensions, joins), so the builder works against an arena of slots
//! indexed by `SourceId` and resolves forward references as ID lookups.
//! Re-entering a slot that is already being built is a true definition
//! cycle and reported as such.

use std::collections::HashMap;
use std::sync::Arc;

use super::composite::CompositeSource;
use super::structdef::StructDef;

/// Index of a source slot in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub usize);

/// Construction state of one source
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSlot {
    /// Declared, not yet built
    Pending,
    /// Currently being built; hitting this again means a cycle
    InProgress,
    Struct(Arc<StructDef>),
    Composite(Arc<CompositeSource>),
    /// Build failed; diagnostics already reported, references skip quietly
    Failed,
}

/// Arena of named source slots
#[derive(Debug, Default)]
pub struct SourceArena {
    slots: Vec<SourceSlot>,
    names: Vec<String>,
    index: HashMap<String, SourceId>,
}

impl SourceArena {
    pub fn new() -> Self {
        SourceArena::default()
    }

    /// Register a declared source name. Returns None if the name is
    /// already taken (the caller reports the collision).
    pub fn register(&mut self, name: &str) -> Option<SourceId> {
        if self.index.contains_key(name) {
            return None;
        }
        let id = SourceId(self.slots.len());
        self.slots.push(SourceSlot::Pending);
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), id);
        Some(id)
    }

    pub fn id_of(&self, name: &str) -> Option<SourceId> {
        self.index.get(name).copied()
    }

    pub fn name_of(&self, id: SourceId) -> &str {
        &self.names[id.0]
    }

    pub fn slot(&self, id: SourceId) -> &SourceSlot {
        &self.slots[id.0]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Mark a pending slot as under construction. Returns false when the
    /// slot is already in progress (a definition cycle).
    pub fn begin(&mut self, id: SourceId) -> bool {
        match &self.slots[id.0] {
            SourceSlot::InProgress => false,
            SourceSlot::Pending => {
                self.slots[id.0] = SourceSlot::InProgress;
                true
            }
            // Already settled; nothing to begin
            _ => true,
        }
    }

    pub fn finish_struct(&mut self, id: SourceId, def: Arc<StructDef>) {
        self.slots[id.0] = SourceSlot::Struct(def);
    }

    pub fn finish_composite(&mut self, id: SourceId, def: Arc<CompositeSource>) {
        self.slots[id.0] = SourceSlot::Composite(def);
    }

    pub fn fail(&mut self, id: SourceId) {
        self.slots[id.0] = SourceSlot::Failed;
    }

    pub fn get_struct(&self, id: SourceId) -> Option<&Arc<StructDef>> {
        match &self.slots[id.0] {
            SourceSlot::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_composite(&self, id: SourceId) -> Option<&Arc<CompositeSource>> {
        match &self.slots[id.0] {
            SourceSlot::Composite(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_settled(&self, id: SourceId) -> bool {
        matches!(
            &self.slots[id.0],
            SourceSlot::Struct(_) | SourceSlot::Composite(_) | SourceSlot::Failed
        )
    }
}
