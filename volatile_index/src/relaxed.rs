//! Failure-swallowing equality index.
use std::fmt;
use std::hash::{BuildHasher, Hash};

use crate::hash::DefaultBuildHasher;
use crate::multimap::KeyMultimap;

/// Equality index that silently discards every failure.
///
/// The fastest and simplest of the index family: elements whose key derivation fails are dropped
/// during the build, and a failing probe turns the lookup into a miss. Callers trade result
/// completeness (the naive nested scan would have failed before producing some of its rows) for
/// never having to handle an error on the lookup path.
///
/// Elements are moved into the index by the build; build from `slice.iter()` to index borrowed
/// elements without copying them. Once built the index is immutable and all lookups take `&self`,
/// so concurrent lookups from multiple threads are safe whenever `E` and `K` are.
///
/// # Examples
///
/// ```
/// use volatile_index::RelaxedIndex;
///
/// let rows = vec![(1, "a"), (1, "b"), (2, "c")];
/// let index = RelaxedIndex::build(rows, |row: &(i32, &str)| Ok::<_, ()>(row.0));
///
/// let matches: Vec<_> = index.lookup(|| Ok::<_, ()>(1)).collect();
/// assert_eq!(matches, [&(1, "a"), &(1, "b")]);
/// assert_eq!(index.lookup(|| Ok::<_, ()>(9)).count(), 0);
/// ```
pub struct RelaxedIndex<E, K, S = DefaultBuildHasher> {
    elements: Vec<E>,
    map: KeyMultimap<K, S>,
}

impl<E, K: Hash + Eq> RelaxedIndex<E, K> {
    /// Builds an index over `source`, dropping every element for which `key_fn` fails.
    pub fn build<X>(
        source: impl IntoIterator<Item = E>,
        key_fn: impl FnMut(&E) -> Result<K, X>,
    ) -> Self {
        Self::build_fallible(source.into_iter().map(Ok), key_fn)
    }

    /// Builds an index over a source whose own advance can fail.
    ///
    /// A source failure stops the build; the elements drained up to that point are indexed and
    /// the failure is discarded like any other.
    pub fn build_fallible<X>(
        source: impl IntoIterator<Item = Result<E, X>>,
        key_fn: impl FnMut(&E) -> Result<K, X>,
    ) -> Self {
        Self::build_fallible_with_hasher(source, key_fn, DefaultBuildHasher::default())
    }
}

impl<E, K: Hash + Eq, S: BuildHasher> RelaxedIndex<E, K, S> {
    /// Like [`build_fallible`](Self::build_fallible) with an explicit [`BuildHasher`].
    pub fn build_fallible_with_hasher<X>(
        source: impl IntoIterator<Item = Result<E, X>>,
        mut key_fn: impl FnMut(&E) -> Result<K, X>,
        build_hasher: S,
    ) -> Self {
        let mut elements = Vec::new();
        let mut map = KeyMultimap::with_hasher(build_hasher);
        let mut seen = 0usize;
        for item in source {
            let Ok(element) = item else {
                log::debug!("relaxed index build: source failed after {seen} elements, keeping the indexed prefix");
                break;
            };
            seen += 1;
            if let Ok(key) = key_fn(&element) {
                let index = elements.len();
                elements.push(element);
                map.insert(key, index);
            }
        }
        RelaxedIndex { elements, map }
    }

    /// Looks up the bucket for the key produced by `probe`.
    ///
    /// The probe is only evaluated here, never at the call site, so its failure can be routed:
    /// a failing probe returns the empty lookup. This lookup cannot fail and the probe's error
    /// type is independent of the error type the index was built with.
    ///
    /// Misses borrow the canonical empty slice and allocate nothing.
    pub fn lookup<X>(&self, probe: impl FnOnce() -> Result<K, X>) -> RelaxedLookup<'_, E> {
        match probe() {
            Ok(key) => RelaxedLookup {
                elements: &self.elements,
                indices: self.map.get(&key).iter(),
            },
            Err(_) => RelaxedLookup::default(),
        }
    }
}

impl<E, K, S> RelaxedIndex<E, K, S> {
    /// Returns the number of indexed elements.
    ///
    /// Elements whose key derivation failed are not counted; they are not retained at all.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns `true` when the index contains no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Returns the number of distinct keys.
    pub fn distinct_keys(&self) -> usize {
        self.map.distinct_keys()
    }
}

impl<E, K, S> fmt::Debug for RelaxedIndex<E, K, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelaxedIndex")
            .field("len", &self.len())
            .field("distinct_keys", &self.distinct_keys())
            .finish_non_exhaustive()
    }
}

/// Lazy result sequence of a [`RelaxedIndex`] lookup.
///
/// Yields the matching elements in source order and cannot fail.
///
/// This struct is created by the [`lookup`](RelaxedIndex::lookup) method on [`RelaxedIndex`].
pub struct RelaxedLookup<'a, E> {
    elements: &'a [E],
    indices: std::slice::Iter<'a, usize>,
}

impl<E> Default for RelaxedLookup<'_, E> {
    fn default() -> Self {
        RelaxedLookup {
            elements: &[],
            indices: [].iter(),
        }
    }
}

impl<'a, E> Iterator for RelaxedLookup<'a, E> {
    type Item = &'a E;

    fn next(&mut self) -> Option<Self::Item> {
        self.indices.next().map(|&index| &self.elements[index])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.indices.size_hint()
    }
}

impl<E> ExactSizeIterator for RelaxedLookup<'_, E> {}

impl<E> std::iter::FusedIterator for RelaxedLookup<'_, E> {}

#[test]
fn failing_elements_and_probes_are_swallowed() {
    let rows: Vec<Option<u32>> = vec![Some(1), None, Some(2), Some(1)];
    let index = RelaxedIndex::build(rows.iter(), |row| row.ok_or("null"));

    assert_eq!(index.len(), 3);
    assert_eq!(
        index.lookup(|| Ok::<_, &str>(1)).collect::<Vec<_>>(),
        [&&Some(1), &&Some(1)]
    );
    assert_eq!(index.lookup(|| Err::<u32, _>("boom")).count(), 0);
}
