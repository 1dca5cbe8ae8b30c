//! Grouping index that carries failures as per-element data.
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::ops::Range;

use hashbrown::hash_table::HashTable;

use crate::hash::DefaultBuildHasher;

/// Equality index whose lookups yield per-element wrappers instead of bare elements.
///
/// Key-derivation failures are data here, not control flow: a failing element is retained next
/// to its failure and shows up in lookup results as a [`Keyed`] wrapper whose inspection
/// re-raises the failure. This lets a caller walk a mixed result (the elements matching the
/// probe key followed by every element whose key could not be derived) and decide per element
/// what a failure means.
///
/// Internally the keyed elements live in a single array of contiguous per-key runs, with source
/// order preserved inside each run, and a hash table resolves a probe key to its run. Every
/// lookup is a fresh value over this shared immutable state, so lookups take `&self` and are
/// safe to run concurrently.
pub struct GroupedIndex<E, K, X, S = DefaultBuildHasher> {
    entries: Vec<(K, E)>,
    groups: Vec<Range<usize>>,
    table: HashTable<usize>,
    failures: Vec<(E, X)>,
    order: Vec<SourceSlot>,
    build_hasher: S,
}

/// Home of one source position after the build: either a slot of the grouped entry array or a
/// slot of the failure list.
enum SourceSlot {
    Entry(usize),
    Failure(usize),
}

impl<E, K: Hash + Eq, X> GroupedIndex<E, K, X> {
    /// Builds an index over `source`, grouping elements by derived key and retaining failing
    /// elements alongside their failures.
    pub fn build(
        source: impl IntoIterator<Item = E>,
        key_fn: impl FnMut(&E) -> Result<K, X>,
    ) -> Self {
        let Ok(index) = Self::build_fallible(source.into_iter().map(Ok), key_fn) else {
            unreachable!()
        };
        index
    }

    /// Builds an index over a source whose own advance can fail.
    ///
    /// A source failure has no element to attach to, so it is surfaced and the partially
    /// drained source is discarded.
    pub fn build_fallible(
        source: impl IntoIterator<Item = Result<E, X>>,
        key_fn: impl FnMut(&E) -> Result<K, X>,
    ) -> Result<Self, X> {
        Self::build_fallible_with_hasher(source, key_fn, DefaultBuildHasher::default())
    }
}

impl<E, K: Hash + Eq, X, S: BuildHasher> GroupedIndex<E, K, X, S> {
    /// Like [`build_fallible`](Self::build_fallible) with an explicit [`BuildHasher`].
    pub fn build_fallible_with_hasher(
        source: impl IntoIterator<Item = Result<E, X>>,
        mut key_fn: impl FnMut(&E) -> Result<K, X>,
        build_hasher: S,
    ) -> Result<Self, X> {
        // Staged keyed elements as (group, staging index, key, element), group ids assigned in
        // first-appearance order.
        let mut staged: Vec<(usize, usize, K, E)> = Vec::new();
        let mut first_of_group: Vec<usize> = Vec::new();
        let mut table: HashTable<usize> = HashTable::new();
        let mut failures: Vec<(E, X)> = Vec::new();
        let mut order: Vec<SourceSlot> = Vec::new();

        for item in source {
            let element = item?;
            match key_fn(&element) {
                Ok(key) => {
                    let hash = build_hasher.hash_one(&key);
                    let group = match table.entry(
                        hash,
                        |&group| staged[first_of_group[group]].2 == key,
                        |&group| build_hasher.hash_one(&staged[first_of_group[group]].2),
                    ) {
                        hashbrown::hash_table::Entry::Occupied(entry) => *entry.get(),
                        hashbrown::hash_table::Entry::Vacant(entry) => {
                            let group = first_of_group.len();
                            first_of_group.push(staged.len());
                            entry.insert(group);
                            group
                        }
                    };
                    order.push(SourceSlot::Entry(staged.len()));
                    let staging = staged.len();
                    staged.push((group, staging, key, element));
                }
                Err(failure) => {
                    order.push(SourceSlot::Failure(failures.len()));
                    failures.push((element, failure));
                }
            }
        }

        // A stable sort by group id produces one contiguous run per distinct key while keeping
        // source order inside each run; run order is first-appearance order, a total order
        // consistent with key equality.
        staged.sort_by_key(|&(group, _, _, _)| group);

        let mut position = vec![0usize; staged.len()];
        let mut groups: Vec<Range<usize>> = Vec::with_capacity(first_of_group.len());
        for (final_pos, entry) in staged.iter().enumerate() {
            position[entry.1] = final_pos;
            if entry.0 == groups.len() {
                groups.push(final_pos..final_pos + 1);
            } else {
                groups[entry.0].end = final_pos + 1;
            }
        }
        for slot in &mut order {
            if let SourceSlot::Entry(staging) = slot {
                *staging = position[*staging];
            }
        }
        let entries = staged
            .into_iter()
            .map(|(_, _, key, element)| (key, element))
            .collect();

        Ok(GroupedIndex {
            entries,
            groups,
            table,
            failures,
            order,
            build_hasher,
        })
    }

    /// Looks up the run for the key produced by `probe`.
    ///
    /// A hit yields one valid wrapper per matching element in source order, followed by one
    /// failing wrapper per recorded key-derivation failure in source order. A miss yields the
    /// empty lookup. A failing probe yields the whole source in source order, every wrapper
    /// carrying the probe failure so that inspecting any of them re-raises it.
    pub fn lookup(&self, probe: impl FnOnce() -> Result<K, X>) -> GroupLookup<'_, E, K, X> {
        let key = match probe() {
            Ok(key) => key,
            Err(failure) => {
                return GroupLookup {
                    inner: LookupInner::ProbeFailed {
                        failure,
                        order: self.order.iter(),
                        entries: &self.entries,
                        failures: &self.failures,
                    },
                }
            }
        };
        let hash = self.build_hasher.hash_one(&key);
        let found = self
            .table
            .find(hash, |&group| self.entries[self.groups[group].start].0 == key);
        match found {
            Some(&group) => GroupLookup {
                inner: LookupInner::Found {
                    matched: self.entries[self.groups[group].clone()].iter(),
                    failures: self.failures.iter(),
                },
            },
            None => GroupLookup::default(),
        }
    }
}

impl<E, K, X, S> GroupedIndex<E, K, X, S> {
    /// Returns the number of keyed entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the index contains no keyed entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of distinct keys.
    pub fn distinct_keys(&self) -> usize {
        self.groups.len()
    }

    /// Returns the recorded key-derivation failures with their elements, in source order.
    pub fn key_failures(&self) -> impl Iterator<Item = (&E, &X)> {
        self.failures.iter().map(|(element, failure)| (element, failure))
    }
}

impl<E, K, X, S> fmt::Debug for GroupedIndex<E, K, X, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupedIndex")
            .field("len", &self.len())
            .field("distinct_keys", &self.distinct_keys())
            .field("key_failures", &self.failures.len())
            .finish_non_exhaustive()
    }
}

/// A source element together with its key-derivation outcome.
///
/// Wrappers are yielded by [`GroupedIndex::lookup`]. The element itself is always accessible;
/// its key is behind the same failure the key derivation (or the probe) produced, and
/// [`is_valid`](Self::is_valid) re-raises that failure on inspection.
pub struct Keyed<'a, E, K, X> {
    value: &'a E,
    state: Result<&'a K, X>,
}

impl<'a, E, K, X> Keyed<'a, E, K, X> {
    /// Returns the wrapped element.
    pub fn value(&self) -> &'a E {
        self.value
    }

    /// Returns the derived key, or the pending failure.
    pub fn key(&self) -> Result<&'a K, X>
    where
        X: Clone,
    {
        self.state.clone()
    }

    /// Returns `Ok(true)` for a wrapper whose key was derived, re-raising the pending failure
    /// otherwise.
    pub fn is_valid(&self) -> Result<bool, X>
    where
        X: Clone,
    {
        match &self.state {
            Ok(_) => Ok(true),
            Err(failure) => Err(failure.clone()),
        }
    }
}

impl<E: fmt::Debug, K: fmt::Debug, X: fmt::Debug> fmt::Debug for Keyed<'_, E, K, X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keyed")
            .field("value", &self.value)
            .field("state", &self.state)
            .finish()
    }
}

/// Lazy result sequence of a [`GroupedIndex`] lookup.
///
/// This struct is created by the [`lookup`](GroupedIndex::lookup) method on [`GroupedIndex`].
pub struct GroupLookup<'a, E, K, X> {
    inner: LookupInner<'a, E, K, X>,
}

enum LookupInner<'a, E, K, X> {
    Empty,
    Found {
        matched: std::slice::Iter<'a, (K, E)>,
        failures: std::slice::Iter<'a, (E, X)>,
    },
    ProbeFailed {
        failure: X,
        order: std::slice::Iter<'a, SourceSlot>,
        entries: &'a [(K, E)],
        failures: &'a [(E, X)],
    },
}

impl<E, K, X> Default for GroupLookup<'_, E, K, X> {
    fn default() -> Self {
        GroupLookup {
            inner: LookupInner::Empty,
        }
    }
}

impl<'a, E, K, X: Clone> Iterator for GroupLookup<'a, E, K, X> {
    type Item = Keyed<'a, E, K, X>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            LookupInner::Empty => None,
            LookupInner::Found { matched, failures } => match matched.next() {
                Some((key, value)) => Some(Keyed {
                    value,
                    state: Ok(key),
                }),
                None => failures.next().map(|(value, failure)| Keyed {
                    value,
                    state: Err(failure.clone()),
                }),
            },
            LookupInner::ProbeFailed {
                failure,
                order,
                entries,
                failures,
            } => {
                let value = match order.next()? {
                    SourceSlot::Entry(position) => &entries[*position].1,
                    SourceSlot::Failure(position) => &failures[*position].0,
                };
                Some(Keyed {
                    value,
                    state: Err(failure.clone()),
                })
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = match &self.inner {
            LookupInner::Empty => 0,
            LookupInner::Found { matched, failures } => matched.len() + failures.len(),
            LookupInner::ProbeFailed { order, .. } => order.len(),
        };
        (len, Some(len))
    }
}

impl<E, K, X: Clone> ExactSizeIterator for GroupLookup<'_, E, K, X> {}

impl<E, K, X: Clone> std::iter::FusedIterator for GroupLookup<'_, E, K, X> {}

#[test]
fn runs_are_contiguous_and_source_ordered() {
    let rows = vec![(3u32, 'a'), (1, 'b'), (3, 'c'), (2, 'd'), (1, 'e')];
    let index = GroupedIndex::build(rows, |row: &(u32, char)| Ok::<_, ()>(row.0));

    assert_eq!(index.len(), 5);
    assert_eq!(index.distinct_keys(), 3);

    let matched: Vec<char> = index
        .lookup(|| Ok(3))
        .map(|keyed| keyed.value().1)
        .collect();
    assert_eq!(matched, ['a', 'c']);

    let matched: Vec<char> = index
        .lookup(|| Ok(1))
        .map(|keyed| keyed.value().1)
        .collect();
    assert_eq!(matched, ['b', 'e']);

    assert_eq!(index.lookup(|| Ok(9)).count(), 0);
}
