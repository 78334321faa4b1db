// Fixed-capacity rendition of the engine's id pool; continuation capacity never
// changes over a queue's lifetime, so there is no resizing path.

/// Manages a pool of identifier values over a fixed id space. Grabbing an id
/// from the pool picks a number that has been picked and returned before, or if
/// none of those are available, the minimum value greater than any existing id.
pub(crate) struct IndexPool {
    next_index: usize,
    capacity: usize,
    available_ids: Vec<usize>,
}

impl IndexPool {
    /// Creates a new pool over the id space `[0, capacity)`.
    pub fn new(capacity: usize) -> Self {
        IndexPool {
            next_index: 0,
            capacity,
            available_ids: Vec::with_capacity(capacity),
        }
    }

    /// Takes an id from the pool. The caller must know a free id exists.
    #[inline(always)]
    pub fn take(&mut self) -> usize {
        match self.available_ids.pop() {
            Some(id) => id,
            None => {
                let id = self.next_index;
                debug_assert!(
                    id < self.capacity,
                    "Taking an id from an exhausted pool is likely a mistake."
                );
                self.next_index += 1;
                id
            }
        }
    }

    /// Returns an id to the pool.
    #[inline(always)]
    pub fn return_id(&mut self, id: usize) {
        debug_assert!(id < self.capacity);
        debug_assert!(
            self.available_ids.len() < self.capacity,
            "Returning more ids than were ever taken is likely a mistake."
        );
        self.available_ids.push(id);
    }

    /// Resets the pool so all ids are available again.
    pub fn clear(&mut self) {
        self.next_index = 0;
        self.available_ids.clear();
    }
}
