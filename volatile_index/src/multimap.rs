use std::hash::{BuildHasher, Hash};

use hashbrown::hash_table::HashTable;

/// Distinct keys plus the source-order element indices carrying each key.
///
/// Hashes are recalculated from the stored keys when the table grows, they are not stored with
/// the entries.
pub(crate) struct KeyMultimap<K, S> {
    table: HashTable<usize>,
    groups: Vec<(K, Vec<usize>)>,
    build_hasher: S,
}

impl<K, S> KeyMultimap<K, S> {
    pub fn with_hasher(build_hasher: S) -> Self {
        KeyMultimap {
            table: HashTable::new(),
            groups: Vec::new(),
            build_hasher,
        }
    }

    pub fn distinct_keys(&self) -> usize {
        self.groups.len()
    }
}

impl<K: Hash + Eq, S: BuildHasher> KeyMultimap<K, S> {
    pub fn insert(&mut self, key: K, index: usize) {
        let hash = self.build_hasher.hash_one(&key);
        match self.table.entry(
            hash,
            |&group| self.groups[group].0 == key,
            |&group| self.build_hasher.hash_one(&self.groups[group].0),
        ) {
            hashbrown::hash_table::Entry::Occupied(entry) => {
                self.groups[*entry.get()].1.push(index);
            }
            hashbrown::hash_table::Entry::Vacant(entry) => {
                let group = self.groups.len();
                entry.insert(group);
                self.groups.push((key, vec![index]));
            }
        }
    }

    /// Returns the indices stored under `key`, or the shared empty slice.
    pub fn get(&self, key: &K) -> &[usize] {
        let hash = self.build_hasher.hash_one(key);
        match self.table.find(hash, |&group| &self.groups[group].0 == key) {
            Some(&group) => &self.groups[group].1,
            None => &[],
        }
    }
}

#[test]
fn insert_preserves_source_order() {
    use crate::hash::DefaultBuildHasher;

    let mut map: KeyMultimap<u32, DefaultBuildHasher> =
        KeyMultimap::with_hasher(Default::default());
    for (index, key) in [3u32, 1, 3, 2, 1, 3].into_iter().enumerate() {
        map.insert(key, index);
    }
    assert_eq!(map.get(&3), &[0, 2, 5]);
    assert_eq!(map.get(&1), &[1, 4]);
    assert_eq!(map.get(&2), &[3]);
    assert_eq!(map.get(&7), &[] as &[usize]);
    assert_eq!(map.distinct_keys(), 3);
}
