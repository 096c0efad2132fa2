//! Stable-ID slot storage for node and edge records.
//!
//! A record's ID is its slot index. Freed slots become tombstones and are
//! pushed onto a free list that later allocations pop from, so IDs of live
//! records never move. Matrix rows and columns are indexed by the same IDs.

use crate::errors::{GraphError, GraphResult};

/// How a slot was obtained, recorded so an allocation can be undone exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotOrigin {
    /// The store grew. `padded` tombstones were created below the new slot
    /// and pushed onto the free list.
    Extended { previous_high_water_mark: u64, padded: u64 },
    /// The slot was taken from the free list at `position`.
    Recycled { position: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocation {
    pub id: u64,
    pub origin: SlotOrigin,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BlockStore<T> {
    slots: Vec<Option<T>>,
    free_list: Vec<u64>,
    capacity: u64,
    live: usize,
}

impl<T> BlockStore<T> {
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            slots: Vec::with_capacity(capacity.min(1 << 16) as usize),
            free_list: Vec::new(),
            capacity: capacity.max(1),
            live: 0,
        }
    }

    /// One past the highest slot ever handed out.
    pub fn high_water_mark(&self) -> u64 {
        self.slots.len() as u64
    }

    /// Logical capacity; grows by doubling and never shrinks.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn deleted_count(&self) -> usize {
        self.free_list.len()
    }

    /// Tombstoned IDs in the order they will be reused (last first).
    pub fn free_list(&self) -> &[u64] {
        &self.free_list
    }

    pub fn allocate(&mut self, item: T) -> u64 {
        self.allocate_tracked(item).id
    }

    pub fn allocate_tracked(&mut self, item: T) -> Allocation {
        if let Some(id) = self.free_list.pop() {
            let position = self.free_list.len();
            self.slots[id as usize] = Some(item);
            self.live += 1;
            return Allocation {
                id,
                origin: SlotOrigin::Recycled { position },
            };
        }
        let previous = self.high_water_mark();
        self.push_slot(item);
        Allocation {
            id: previous,
            origin: SlotOrigin::Extended {
                previous_high_water_mark: previous,
                padded: 0,
            },
        }
    }

    /// ID the `n`-th upcoming allocation (0-based) will receive, assuming no
    /// frees happen in between.
    pub fn reserved_id(&self, n: usize) -> u64 {
        let free = self.free_list.len();
        if n < free {
            self.free_list[free - 1 - n]
        } else {
            self.high_water_mark() + (n - free) as u64
        }
    }

    /// Place `item` at a caller-chosen ID. Used when rebuilding a store from a
    /// snapshot or replaying replicated effects. Slots below `id` are padded
    /// onto the free list, so callers bound `id` before placing.
    pub fn place(&mut self, id: u64, item: T) -> GraphResult<Allocation> {
        let hwm = self.high_water_mark();
        if id >= hwm {
            let padded = id - hwm;
            for pad in hwm..id {
                self.slots.push(None);
                self.free_list.push(pad);
            }
            self.push_slot(item);
            return Ok(Allocation {
                id,
                origin: SlotOrigin::Extended {
                    previous_high_water_mark: hwm,
                    padded,
                },
            });
        }
        if self.slots[id as usize].is_some() {
            return Err(GraphError::invalid_input(format!("slot {id} is already live")));
        }
        let position = self
            .free_list
            .iter()
            .position(|&free| free == id)
            .ok_or_else(|| GraphError::invalid_input(format!("slot {id} is not on the free list")))?;
        self.free_list.remove(position);
        self.slots[id as usize] = Some(item);
        self.live += 1;
        Ok(Allocation {
            id,
            origin: SlotOrigin::Recycled { position },
        })
    }

    pub fn get(&self, id: u64) -> GraphResult<&T> {
        self.slots
            .get(id as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| GraphError::out_of_range(id, self.high_water_mark()))
    }

    pub fn get_mut(&mut self, id: u64) -> GraphResult<&mut T> {
        let limit = self.high_water_mark();
        self.slots
            .get_mut(id as usize)
            .and_then(Option::as_mut)
            .ok_or(GraphError::OutOfRange { id, limit })
    }

    pub fn contains(&self, id: u64) -> bool {
        matches!(self.slots.get(id as usize), Some(Some(_)))
    }

    /// Tombstone `id` and push it onto the free list. Other slots are untouched.
    pub fn free(&mut self, id: u64) -> GraphResult<T> {
        let limit = self.high_water_mark();
        let item = self
            .slots
            .get_mut(id as usize)
            .and_then(Option::take)
            .ok_or(GraphError::OutOfRange { id, limit })?;
        self.free_list.push(id);
        self.live -= 1;
        Ok(item)
    }

    /// Exact inverse of [`BlockStore::free`]; must be called before any other
    /// mutation that happened after the free is undone.
    pub fn restore(&mut self, id: u64, item: T) -> GraphResult<()> {
        if self.free_list.last() != Some(&id) {
            return Err(GraphError::invalid_input(format!(
                "slot {id} is not the most recently freed"
            )));
        }
        self.free_list.pop();
        self.slots[id as usize] = Some(item);
        self.live += 1;
        Ok(())
    }

    /// Exact inverse of an allocation, restoring the high-water mark or the
    /// free-list position the slot came from.
    pub fn unallocate(&mut self, allocation: Allocation) -> GraphResult<T> {
        let Allocation { id, origin } = allocation;
        let limit = self.high_water_mark();
        match origin {
            SlotOrigin::Extended {
                previous_high_water_mark,
                padded,
            } => {
                if id + 1 != limit || previous_high_water_mark + padded != id {
                    return Err(GraphError::invalid_input(format!(
                        "slot {id} is not the most recent extension"
                    )));
                }
                let item = self
                    .slots
                    .pop()
                    .flatten()
                    .ok_or(GraphError::OutOfRange { id, limit })?;
                self.live -= 1;
                for _ in 0..padded {
                    self.slots.pop();
                    self.free_list.pop();
                }
                Ok(item)
            }
            SlotOrigin::Recycled { position } => {
                let item = self
                    .slots
                    .get_mut(id as usize)
                    .and_then(Option::take)
                    .ok_or(GraphError::OutOfRange { id, limit })?;
                self.live -= 1;
                let position = position.min(self.free_list.len());
                self.free_list.insert(position, id);
                Ok(item)
            }
        }
    }

    /// Replace the free list with `order`, which must list exactly the
    /// current tombstones.
    pub fn rebuild_free_list(&mut self, order: Vec<u64>) -> GraphResult<()> {
        let mut expected: Vec<u64> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(id, _)| id as u64)
            .collect();
        let mut given = order.clone();
        expected.sort_unstable();
        given.sort_unstable();
        if expected != given {
            return Err(GraphError::invalid_input(
                "free list does not match tombstoned slots",
            ));
        }
        self.free_list = order;
        Ok(())
    }

    /// Grow the high-water mark to `high_water_mark` with tombstones.
    pub fn pad_to(&mut self, high_water_mark: u64) {
        for id in self.high_water_mark()..high_water_mark {
            self.slots.push(None);
            self.free_list.push(id);
        }
        if high_water_mark > self.capacity {
            self.capacity = (self.capacity * 2).max(high_water_mark);
        }
    }

    /// Live records in ID order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|item| (id as u64, item)))
    }

    fn push_slot(&mut self, item: T) {
        self.slots.push(Some(item));
        self.live += 1;
        let hwm = self.high_water_mark();
        if hwm > self.capacity {
            self.capacity = (self.capacity * 2).max(hwm);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_allocations_are_dense() {
        let mut store = BlockStore::with_capacity(4);
        assert_eq!(store.allocate("a"), 0);
        assert_eq!(store.allocate("b"), 1);
        assert_eq!(store.high_water_mark(), 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn capacity_doubles_past_initial() {
        let mut store = BlockStore::with_capacity(2);
        for i in 0..3 {
            store.allocate(i);
        }
        assert_eq!(store.capacity(), 4);
    }

    #[test]
    fn freed_slot_is_out_of_range_for_get() {
        let mut store = BlockStore::with_capacity(4);
        let id = store.allocate(7);
        store.free(id).expect("free");
        assert!(matches!(store.get(id), Err(GraphError::OutOfRange { .. })));
        assert!(matches!(store.free(id), Err(GraphError::OutOfRange { .. })));
        assert!(matches!(store.get(99), Err(GraphError::OutOfRange { id: 99, limit: 1 })));
    }

    #[test]
    fn reserved_ids_follow_free_list_then_fresh() {
        let mut store = BlockStore::with_capacity(8);
        for i in 0..4 {
            store.allocate(i);
        }
        store.free(1).unwrap();
        store.free(3).unwrap();
        assert_eq!(store.reserved_id(0), 3);
        assert_eq!(store.reserved_id(1), 1);
        assert_eq!(store.reserved_id(2), 4);
        assert_eq!(store.allocate(10), 3);
        assert_eq!(store.allocate(11), 1);
        assert_eq!(store.allocate(12), 4);
    }

    #[test]
    fn unallocate_reverses_extension_and_recycling() {
        let mut store = BlockStore::with_capacity(8);
        for i in 0..3 {
            store.allocate(i);
        }
        store.free(0).unwrap();
        store.free(2).unwrap();
        let before = store.clone();

        let recycled = store.allocate_tracked(20);
        let recycled_again = store.allocate_tracked(21);
        let fresh = store.allocate_tracked(22);
        assert_eq!(fresh.id, 3);

        store.unallocate(fresh).unwrap();
        store.unallocate(recycled_again).unwrap();
        store.unallocate(recycled).unwrap();
        assert_eq!(store, before);
    }

    #[test]
    fn place_pads_with_tombstones_and_can_be_undone() {
        let mut store = BlockStore::with_capacity(8);
        store.allocate("zero");
        let before = store.clone();
        let placed = store.place(4, "four").unwrap();
        assert_eq!(store.high_water_mark(), 5);
        assert_eq!(store.free_list(), &[1, 2, 3]);
        store.unallocate(placed).unwrap();
        assert_eq!(store, before);
    }

    #[test]
    fn restore_is_inverse_of_free() {
        let mut store = BlockStore::with_capacity(8);
        store.allocate('a');
        let id = store.allocate('b');
        let before = store.clone();
        let item = store.free(id).unwrap();
        store.restore(id, item).unwrap();
        assert_eq!(store, before);
    }

    #[test]
    fn rebuild_free_list_rejects_live_ids() {
        let mut store = BlockStore::with_capacity(8);
        store.place(2, 'x').unwrap();
        assert!(store.rebuild_free_list(vec![1, 0]).is_ok());
        assert_eq!(store.free_list(), &[1, 0]);
        assert!(store.rebuild_free_list(vec![2, 1, 0]).is_err());
    }
}
