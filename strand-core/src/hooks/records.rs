//! Ordered record storage for the hook dispatcher.
//!
//! Position in this list *is* the identity of a hook's state: the n-th hook
//! called in a pass owns the n-th slot. The list is an arena addressed by a
//! monotonically advancing index rather than a chain of linked nodes, so the
//! reconciler's checks reduce to index and type comparisons.

/// An ordered, index-addressed sequence of records.
#[derive(Debug)]
pub struct RecordList<T> {
    slots: Vec<T>,
}

impl<T> RecordList<T> {
    /// Create an empty list.
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the list has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Append a record and return its position.
    pub fn append(&mut self, record: T) -> usize {
        self.slots.push(record);
        self.slots.len() - 1
    }

    /// Replace the payload at `position`, keeping the position and its
    /// neighbours. Returns the previous payload, or hands `record` back when
    /// the position is not occupied.
    pub fn swap(&mut self, position: usize, record: T) -> Result<T, T> {
        match self.slots.get_mut(position) {
            Some(slot) => Ok(std::mem::replace(slot, record)),
            None => Err(record),
        }
    }

    /// Remove every record at or after `from`, returned in positional order.
    pub fn drop_suffix(&mut self, from: usize) -> Vec<T> {
        if from >= self.slots.len() {
            return Vec::new();
        }
        self.slots.split_off(from)
    }

    /// Remove every record.
    pub fn clear(&mut self) -> Vec<T> {
        std::mem::take(&mut self.slots)
    }

    pub fn get(&self, position: usize) -> Option<&T> {
        self.slots.get(position)
    }

    /// Iterate front to back.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.slots.iter()
    }
}

impl<T> Default for RecordList<T> {
    fn default() -> Self {
        Self::new()
    }
}
