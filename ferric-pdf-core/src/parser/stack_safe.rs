//! Stack-safe parsing utilities
//!
//! Bounds nesting depth while parsing containers and tracks which indirect
//! objects are currently being loaded, so self-referential `/Length` entries
//! or reference chains cannot recurse without end.

use crate::error::{PdfError, Result};
use crate::objects::ObjectId;
use std::collections::HashSet;

#[derive(Debug)]
pub struct StackSafeContext {
    depth: usize,
    max_depth: usize,
    active_refs: HashSet<ObjectId>,
}

impl StackSafeContext {
    pub fn new(max_depth: usize) -> Self {
        Self {
            depth: 0,
            max_depth,
            active_refs: HashSet::new(),
        }
    }

    /// Enter a new nesting level
    pub fn enter(&mut self, offset: u64) -> Result<()> {
        if self.depth >= self.max_depth {
            return Err(PdfError::ValueOutOfRange(format!(
                "nesting deeper than {} levels at offset {offset}",
                self.max_depth
            )));
        }
        self.depth += 1;
        Ok(())
    }

    /// Exit a nesting level
    pub fn exit(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Mark `id` as being loaded. Fails if it already is.
    pub fn push_ref(&mut self, id: ObjectId) -> Result<()> {
        if !self.active_refs.insert(id) {
            return Err(PdfError::broken(
                0,
                format!("circular reference while loading {id}"),
            ));
        }
        Ok(())
    }

    pub fn pop_ref(&mut self, id: ObjectId) {
        self.active_refs.remove(&id);
    }

    pub fn is_active(&self, id: ObjectId) -> bool {
        self.active_refs.contains(&id)
    }
}
