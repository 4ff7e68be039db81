use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use crate::Identifiable;

/// The shared backing store behind an [`IdentifiedMap`](crate::IdentifiedMap):
/// the canonical id order, the id → value table, and a lazily built reverse
/// index from id to ordinal position.
///
/// `order` and `values` always describe the same id set; every id appears
/// exactly once in `order`. `positions` is derived data: it is rebuilt in one
/// pass on the first position query after a mutation, and every mutating entry
/// point discards it up front via [`invalidate_positions`](Self::invalidate_positions).
/// Cloning copies only the two canonical structures; a clone starts with an
/// empty cache.
pub(crate) struct Storage<V: Identifiable> {
    pub(crate) order: Vec<V::Id>,
    pub(crate) values: HashMap<V::Id, V>,
    positions: OnceLock<HashMap<V::Id, usize>>,
}

impl<V: Identifiable> Storage<V> {
    pub(crate) fn new() -> Self {
        Storage {
            order: Vec::new(),
            values: HashMap::new(),
            positions: OnceLock::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        let Self { order, values, .. } = self;
        debug_assert_eq!(order.len(), values.len());
        order.len()
    }

    /// Current position of `id`, answered from the reverse index, building it
    /// first if a mutation has discarded it.
    ///
    /// Panics if `id` is not a member; callers check membership first.
    pub(crate) fn position_of(&self, id: &V::Id) -> usize {
        let positions = self.positions.get_or_init(|| {
            self.order
                .iter()
                .enumerate()
                .map(|(position, id)| (id.clone(), position))
                .collect()
        });
        positions[id]
    }

    /// Discards the position cache. Must run before any change to `order` or
    /// membership.
    pub(crate) fn invalidate_positions(&mut self) {
        self.positions.take();
    }

    /// Consumes the storage into its elements in current order.
    pub(crate) fn into_ordered_values(self) -> Vec<V> {
        let Self {
            order, mut values, ..
        } = self;
        order
            .into_iter()
            .map(|id| values.remove(&id).unwrap())
            .collect()
    }

    /// Removes the given ordinal positions in a single stable compaction pass:
    /// retained ids are swapped leftward past removed ones, then the tail is
    /// truncated. Also drops the corresponding entries from `values`.
    /// Out-of-range indices are ignored.
    pub(crate) fn remove_positions(&mut self, indices: &BTreeSet<usize>) {
        let Self { order, values, .. } = self;
        for &index in indices {
            if index < order.len() {
                values.remove(&order[index]);
            }
        }
        compact(order, indices);
    }

    /// Relocates the ids at `indices` so they land contiguously at `to`,
    /// keeping their relative order (ascending original position). No-op when
    /// `to` is itself one of the source indices; `to` is otherwise clamped to
    /// `0..=len`. Membership is untouched, only `order` changes.
    pub(crate) fn move_positions(&mut self, indices: &BTreeSet<usize>, to: usize) {
        if indices.contains(&to) {
            return;
        }
        let order = &mut self.order;
        let to = to.min(order.len());
        let extracted: Vec<V::Id> = indices
            .iter()
            .filter(|&&index| index < order.len())
            .map(|&index| order[index].clone())
            .collect();
        // Removing the sources shifts everything after them left; compensate
        // for the sources sitting before the target.
        let offset = indices
            .iter()
            .filter(|&&index| index < order.len() && index < to)
            .count();
        compact(order, indices);
        order.splice(to - offset..to - offset, extracted);
    }
}

/// Two-pointer stable removal of a set of positions from `order`. One pass,
/// no per-element `Vec::remove` shifting, immune to index invalidation.
fn compact<T>(order: &mut Vec<T>, indices: &BTreeSet<usize>) {
    let mut write = 0;
    for read in 0..order.len() {
        if !indices.contains(&read) {
            order.swap(write, read);
            write += 1;
        }
    }
    order.truncate(write);
}

impl<V: Identifiable> Default for Storage<V> {
    fn default() -> Self {
        Storage::new()
    }
}

impl<V: Identifiable + Clone> Clone for Storage<V> {
    fn clone(&self) -> Self {
        // The cache is never inherited; a stale copy on a fresh storage would
        // break position lookups after the original mutates.
        Storage {
            order: self.order.clone(),
            values: self.values.clone(),
            positions: OnceLock::new(),
        }
    }
}
