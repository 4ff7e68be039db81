use derive_where::derive_where;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::Index;
use std::slice;
use std::sync::Arc;

mod codec;
mod storage;

use storage::Storage;

/// The capability an element type must expose to live in an
/// [`IdentifiedMap`]: a stable identity key that is hashable and totally
/// ordered. The key must not change while the element is held by a map;
/// uniqueness across held elements is maintained by the map itself.
pub trait Identifiable {
    type Id: Eq + Ord + std::hash::Hash + Clone;

    fn id(&self) -> Self::Id;
}

/// An ordered, identity-indexed map: a container that simultaneously maintains
/// a lookup table from each element's stable identity key to the element, and
/// a caller-meaningful ordering of those identities.
///
/// Internally the map keeps two coupled structures behind a shared `Storage`:
/// a `Vec<V::Id>` defining the order and a `HashMap<V::Id, V>` holding the
/// elements. Every id appears exactly once in the order array, and the order
/// array and the value table always describe the same id set. A lazily built
/// reverse index from id to ordinal position accelerates repeated
/// [`index_of`](Self::index_of) queries and is discarded whenever the map
/// mutates.
///
/// `IdentifiedMap` is a value type with copy-on-write sharing: cloning a map
/// is O(1) and shares the backing storage, and the first mutation through any
/// one of the sharing handles clones the storage so the others never observe
/// it. The uniqueness test is the `Arc` refcount, so the clone-before-mutate
/// decision is sound even when clones cross threads.
///
/// Positional single-element operations ([`insert`](Self::insert),
/// [`remove_at`](Self::remove_at), `map[i]`) treat an out-of-range index as a
/// contract violation and panic. The multi-index operations
/// ([`move_indices`](Self::move_indices),
/// [`remove_at_indices`](Self::remove_at_indices)) clamp and ignore
/// out-of-range indices instead, so they are total for any input.
#[derive_where(Clone, Default)]
pub struct IdentifiedMap<V: Identifiable> {
    storage: Arc<Storage<V>>,
}

impl<V: Identifiable> IdentifiedMap<V> {
    pub fn new() -> Self {
        IdentifiedMap {
            storage: Arc::new(Storage::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.len() == 0
    }

    /// The ids in current order.
    pub fn ids(&self) -> &[V::Id] {
        &self.storage.order
    }

    pub fn get(&self, id: &V::Id) -> Option<&V> {
        self.storage.values.get(id)
    }

    pub fn contains_id(&self, id: &V::Id) -> bool {
        self.storage.values.contains_key(id)
    }

    /// Current ordinal position of `id`, or `None` if it is not a member.
    /// Answered from the lazily built reverse index, so repeated queries
    /// between mutations cost O(1) after the first.
    pub fn index_of(&self, id: &V::Id) -> Option<usize> {
        if !self.storage.values.contains_key(id) {
            return None;
        }
        Some(self.storage.position_of(id))
    }

    pub fn get_at(&self, position: usize) -> Option<&V> {
        let id = self.storage.order.get(position)?;
        Some(&self.storage.values[id])
    }

    pub fn first(&self) -> Option<&V> {
        self.get_at(0)
    }

    pub fn last(&self) -> Option<&V> {
        self.len().checked_sub(1).and_then(|last| self.get_at(last))
    }

    /// Iterator over elements in current order.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            order: self.storage.order.iter(),
            values: &self.storage.values,
        }
    }

    /// Elements in current order satisfying `predicate`, as a plain sequence.
    pub fn filter<F>(&self, mut predicate: F) -> Vec<V>
    where
        V: Clone,
        F: FnMut(&V) -> bool,
    {
        self.iter().filter(|value| predicate(value)).cloned().collect()
    }

    /// Drops all elements. Sharing handles onto the old storage are unaffected.
    pub fn clear(&mut self) {
        self.storage = Arc::new(Storage::new());
    }
}

impl<V: Identifiable + Clone> IdentifiedMap<V> {
    /// Copy-on-write entry point for every mutating operation: clones the
    /// backing storage first when it is shared, and discards the position
    /// cache before handing out mutable access.
    fn storage_mut(&mut self) -> &mut Storage<V> {
        let storage = Arc::make_mut(&mut self.storage);
        storage.invalidate_positions();
        storage
    }

    /// Adds `value` at the tail. If its id is already a member the old
    /// position is vacated first, so the id always ends up last and never
    /// duplicated.
    pub fn append(&mut self, value: V) {
        let id = value.id();
        let storage = self.storage_mut();
        if storage.values.contains_key(&id) {
            let position = storage.order.iter().position(|member| *member == id).unwrap();
            storage.order.remove(position);
        }
        storage.order.push(id.clone());
        storage.values.insert(id, value);
    }

    pub fn prepend(&mut self, value: V) {
        self.insert(0, value);
    }

    /// Inserts `value` at `position`. If its id is already a member this is a
    /// move of the existing entry to `position` (clamped, no-op when it is
    /// already there) followed by a value overwrite; for a new id, `position`
    /// must be within `0..=len` or this panics.
    pub fn insert(&mut self, position: usize, value: V) {
        let id = value.id();
        let storage = self.storage_mut();
        if storage.values.contains_key(&id) {
            let from = storage.order.iter().position(|member| *member == id).unwrap();
            storage.move_positions(&BTreeSet::from([from]), position);
        } else {
            storage.order.insert(position, id.clone());
        }
        storage.values.insert(id, value);
    }

    /// Inserts a contiguous block of elements starting at `position`,
    /// preserving their relative order. Each element's value entry is set
    /// regardless of prior membership; the order-array splice assumes the ids
    /// are new, matching the per-item [`insert`](Self::insert) contract.
    pub fn insert_many<I>(&mut self, position: usize, values: I)
    where
        I: IntoIterator<Item = V>,
    {
        let storage = self.storage_mut();
        let mut ids = Vec::new();
        for value in values {
            let id = value.id();
            ids.push(id.clone());
            storage.values.insert(id, value);
        }
        storage.order.splice(position..position, ids);
    }

    /// Removes `id` if present and returns its value. Absent ids are a no-op
    /// and do not trigger a copy-on-write clone.
    pub fn remove_id(&mut self, id: &V::Id) -> Option<V> {
        if !self.storage.values.contains_key(id) {
            return None;
        }
        let storage = self.storage_mut();
        let position = storage.order.iter().position(|member| member == id).unwrap();
        storage.order.remove(position);
        storage.values.remove(id)
    }

    /// Removes and returns the element at ordinal `position`. Panics if
    /// `position >= len`.
    pub fn remove_at(&mut self, position: usize) -> V {
        let storage = self.storage_mut();
        let id = storage.order.remove(position);
        storage.values.remove(&id).unwrap()
    }

    /// Removes the elements at the given ordinal positions in a single stable
    /// compaction pass. Out-of-range indices are ignored.
    pub fn remove_at_indices<I>(&mut self, indices: I)
    where
        I: IntoIterator<Item = usize>,
    {
        let indices: BTreeSet<usize> = indices.into_iter().collect();
        if indices.is_empty() {
            return;
        }
        self.storage_mut().remove_positions(&indices);
    }

    /// Relocates the elements at `from` so they land contiguously at `to`,
    /// keeping their relative order. No-op when `to` is itself one of the
    /// source indices; `to` is otherwise clamped to `0..=len`.
    pub fn move_indices<I>(&mut self, from: I, to: usize)
    where
        I: IntoIterator<Item = usize>,
    {
        let from: BTreeSet<usize> = from.into_iter().collect();
        if from.is_empty() {
            return;
        }
        self.storage_mut().move_positions(&from, to);
    }

    /// Re-sorts the order by comparing elements; the value table is untouched.
    pub fn sort_by<F>(&mut self, mut compare: F)
    where
        F: FnMut(&V, &V) -> Ordering,
    {
        let storage = self.storage_mut();
        let values = &storage.values;
        storage.order.sort_by(|a, b| compare(&values[a], &values[b]));
    }

    /// Non-mutating [`sort_by`](Self::sort_by): returns a freshly ordered map
    /// and leaves `self` untouched.
    pub fn sorted_by<F>(&self, compare: F) -> Self
    where
        F: FnMut(&V, &V) -> Ordering,
    {
        let mut sorted = self.clone();
        sorted.sort_by(compare);
        sorted
    }

    /// The indexed write: delegates to [`insert`](Self::insert), so a value
    /// whose id differs from the current occupant of `position` is inserted
    /// or moved there rather than overwriting the occupant in place.
    pub fn set_at(&mut self, position: usize, value: V) {
        self.insert(position, value);
    }

    /// The keyed write: a member id has its value overwritten in place with
    /// no reordering (the old value is returned); a new id is appended.
    pub fn update_or_append(&mut self, value: V) -> Option<V> {
        let id = value.id();
        if self.storage.values.contains_key(&id) {
            self.storage_mut().values.insert(id, value)
        } else {
            self.append(value);
            None
        }
    }
}

/// Builds the map from a flat element sequence: the first occurrence of an id
/// fixes its position, a later occurrence overwrites the value only. (Note
/// this differs from repeated [`append`](IdentifiedMap::append), which sends a
/// repeated id to the tail.)
impl<V: Identifiable> FromIterator<V> for IdentifiedMap<V> {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        let mut storage = Storage::new();
        for value in iter {
            let id = value.id();
            if storage.values.insert(id.clone(), value).is_none() {
                storage.order.push(id);
            }
        }
        IdentifiedMap {
            storage: Arc::new(storage),
        }
    }
}

impl<V: Identifiable + Clone> Extend<V> for IdentifiedMap<V> {
    fn extend<I: IntoIterator<Item = V>>(&mut self, iter: I) {
        for value in iter {
            self.append(value);
        }
    }
}

impl<V: Identifiable> Index<usize> for IdentifiedMap<V> {
    type Output = V;

    fn index(&self, position: usize) -> &V {
        let id = &self.storage.order[position];
        &self.storage.values[id]
    }
}

pub struct Iter<'a, V: Identifiable> {
    order: slice::Iter<'a, V::Id>,
    values: &'a HashMap<V::Id, V>,
}

impl<'a, V: Identifiable> Iterator for Iter<'a, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<&'a V> {
        self.order.next().map(|id| &self.values[id])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.order.size_hint()
    }
}

impl<'a, V: Identifiable> DoubleEndedIterator for Iter<'a, V> {
    fn next_back(&mut self) -> Option<&'a V> {
        self.order.next_back().map(|id| &self.values[id])
    }
}

impl<'a, V: Identifiable> ExactSizeIterator for Iter<'a, V> {}

impl<'a, V: Identifiable> IntoIterator for &'a IdentifiedMap<V> {
    type Item = &'a V;
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Iter<'a, V> {
        self.iter()
    }
}

impl<V: Identifiable + Clone> IntoIterator for IdentifiedMap<V> {
    type Item = V;
    type IntoIter = std::vec::IntoIter<V>;

    fn into_iter(self) -> Self::IntoIter {
        let storage = Arc::try_unwrap(self.storage).unwrap_or_else(|shared| (*shared).clone());
        storage.into_ordered_values().into_iter()
    }
}

impl<V: Identifiable + fmt::Debug> fmt::Debug for IdentifiedMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Two maps are equal iff their orders are equal and their value tables are
/// equal; the position cache never participates.
impl<V: Identifiable + PartialEq> PartialEq for IdentifiedMap<V> {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.storage, &other.storage) {
            return true;
        }
        self.storage.order == other.storage.order && self.storage.values == other.storage.values
    }
}

impl<V: Identifiable + Eq> Eq for IdentifiedMap<V> {}
