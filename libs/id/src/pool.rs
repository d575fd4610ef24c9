//! Reusable command id pool.

use std::collections::BTreeSet;

use crate::CommandId;

/// Allocator of small, reusable command ids.
///
/// `acquire` always returns the smallest free id: released ids come back
/// before a new one is minted. The pool is not synchronized; each device
/// session owns one and serializes access to it.
#[derive(Debug, Default, Clone)]
pub struct IdPool {
    /// Highest id ever minted.
    high_water: Option<CommandId>,

    /// Ids that were minted and then released.
    free: BTreeSet<CommandId>,
}

impl IdPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes an id out of the pool.
    pub fn acquire(&mut self) -> CommandId {
        if let Some(id) = self.free.pop_first() {
            return id;
        }

        let id = match self.high_water {
            Some(last) => last.next(),
            None => CommandId::FIRST,
        };
        self.high_water = Some(id);
        id
    }

    /// Returns an id to the pool.
    ///
    /// Returns `false` without changing the pool if the id was never handed
    /// out or is already free.
    pub fn release(&mut self, id: CommandId) -> bool {
        match self.high_water {
            Some(high) if id <= high => self.free.insert(id),
            _ => false,
        }
    }

    /// Returns true if the id is currently handed out.
    #[must_use]
    pub fn is_in_use(&self, id: CommandId) -> bool {
        matches!(self.high_water, Some(high) if id <= high) && !self.free.contains(&id)
    }

    /// Number of ids currently handed out.
    #[must_use]
    pub fn in_use(&self) -> usize {
        let minted = self.high_water.map_or(0, |id| id.value() as usize);
        minted - self.free.len()
    }

    /// Number of ids ever minted.
    #[must_use]
    pub fn minted(&self) -> usize {
        self.high_water.map_or(0, |id| id.value() as usize)
    }
}
