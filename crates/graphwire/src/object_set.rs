use crate::error::{MarshalError, Result};
use crate::mob::Mob;

/// Hard upper bound on live objects in one set: wire pointer indexes are
/// one byte and 255 is the values-phase terminator.
pub const MAX_OBJECTS: usize = 255;

/// Ordered, deduplicated collection of marshal objects.
///
/// Insertion order is the wire order: the index an object gets here is the
/// index pointers to it carry in the byte stream, so both sides must grow
/// their sets identically. Mostly append-only; `remove` exists to strip
/// shared members back out after discovery and shifts later entries down
/// one slot to keep the remaining indexes dense.
#[derive(Debug, Default, Clone)]
pub struct ObjectSet {
    mobs: Vec<Mob>,
}

impl ObjectSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.mobs.len()
    }

    /// Insert unless an identical object is already present.
    ///
    /// Returns `Ok(false)` on duplicate (no-op). Exceeding `max` live
    /// entries is a defined error, not a panic: the 256th distinct object
    /// of a session must be rejected deterministically.
    pub fn push(&mut self, mob: Mob, max: usize) -> Result<bool> {
        if self.index_of(&mob).is_some() {
            return Ok(false);
        }
        if self.mobs.len() >= max {
            return Err(MarshalError::CapacityExceeded { max });
        }
        self.mobs.push(mob);
        Ok(true)
    }

    /// LIFO removal, used for full teardown.
    pub fn pop(&mut self) -> Option<Mob> {
        self.mobs.pop()
    }

    pub fn get(&self, index: usize) -> Option<Mob> {
        self.mobs.get(index).copied()
    }

    /// Index of the entry matching `mob`'s identity, if present.
    pub fn index_of(&self, mob: &Mob) -> Option<usize> {
        self.mobs.iter().position(|entry| entry.same_identity(mob))
    }

    /// Excise the entry matching `mob`, shifting every later entry down
    /// one slot. Returns whether anything was removed.
    pub fn remove(&mut self, mob: &Mob) -> bool {
        match self.index_of(mob) {
            Some(index) => {
                self.mobs.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove every element of `remove` from this set.
    pub fn difference_update(&mut self, remove: &ObjectSet) {
        for mob in &remove.mobs {
            self.remove(mob);
        }
    }

    /// Visit every element from `start` onward until `f` declines to
    /// continue. Returns whether the end was reached.
    pub fn iterate<F>(&self, start: usize, mut f: F) -> Result<bool>
    where
        F: FnMut(usize, Mob) -> Result<bool>,
    {
        let mut index = start;
        while index < self.mobs.len() {
            if !f(index, self.mobs[index])? {
                return Ok(false);
            }
            index += 1;
        }
        Ok(true)
    }

    pub fn clear(&mut self) {
        self.mobs.clear();
    }
}
