//! Failure-order-preserving equality index.
use std::fmt;
use std::hash::{BuildHasher, Hash};

use crate::hash::DefaultBuildHasher;
use crate::multimap::KeyMultimap;

/// Guard type of indexes built without a key guard.
pub type NoKeyGuard<K, X> = fn(&K) -> Result<(), X>;

/// Equality index that reproduces the failures of the naive nested scan, in the order the
/// caller of that scan would have observed them.
///
/// The build halts at the first failing key derivation and records the failure; elements past
/// that point stay unseen by the index, exactly as they would have stayed unvisited by the scan.
/// Every lookup that reaches the failure point re-raises a clone of the recorded failure, and a
/// failing probe is re-ordered against the first element's key derivation according to the shape
/// of the expression being accelerated (see [`lookup`](Self::lookup)).
///
/// An optional *key guard* models expressions whose key comparison itself can fail on degenerate
/// key values (the classic instance-equals on an absent operand). The guard can be applied to
/// every stored key during the build and to the probe key during lookup, in both cases failing
/// exactly where the scan would have.
///
/// Once built the index is immutable; lookups take `&self` and are safe to run concurrently.
///
/// # Examples
///
/// A key derivation that fails on the third element indexes the first two; a lookup yields its
/// matches and then fails on the final advance:
///
/// ```
/// use volatile_index::StrictIndex;
///
/// let rows = vec![4i64, 2, 0, 5];
/// let index = StrictIndex::build(rows, |&n: &i64| 100i64.checked_div(n).ok_or("div by zero"));
///
/// let mut lookup = index.lookup(|| Ok(25), false, false);
/// assert_eq!(lookup.next(), Some(Ok(&4)));
/// assert_eq!(lookup.next(), Some(Err("div by zero")));
/// assert_eq!(lookup.next(), None);
/// ```
pub struct StrictIndex<E, K, X, F, G = NoKeyGuard<K, X>, S = DefaultBuildHasher> {
    elements: Vec<E>,
    map: KeyMultimap<K, S>,
    valid_prefix: usize,
    first_failure: Option<X>,
    key_fn: F,
    key_guard: Option<G>,
}

impl<E, K, X, F> StrictIndex<E, K, X, F>
where
    K: Hash + Eq,
    F: Fn(&E) -> Result<K, X>,
{
    /// Builds an index over `source`, halting at the first failing key derivation.
    pub fn build(source: impl IntoIterator<Item = E>, key_fn: F) -> Self {
        Self::build_fallible(source.into_iter().map(Ok), key_fn)
    }

    /// Builds an index over a source whose own advance can fail.
    ///
    /// A source failure is recorded like a key failure: the drained prefix stays indexed and the
    /// failure is re-raised by lookups.
    pub fn build_fallible(source: impl IntoIterator<Item = Result<E, X>>, key_fn: F) -> Self {
        Self::build_inner(source, key_fn, None, false, DefaultBuildHasher::default())
    }
}

impl<E, K, X, F, S> StrictIndex<E, K, X, F, NoKeyGuard<K, X>, S>
where
    K: Hash + Eq,
    F: Fn(&E) -> Result<K, X>,
    S: BuildHasher,
{
    /// Like [`build_fallible`](Self::build_fallible) with an explicit [`BuildHasher`].
    pub fn build_fallible_with_hasher(
        source: impl IntoIterator<Item = Result<E, X>>,
        key_fn: F,
        build_hasher: S,
    ) -> Self {
        Self::build_inner(source, key_fn, None, false, build_hasher)
    }
}

impl<E, K, X, F, G> StrictIndex<E, K, X, F, G>
where
    K: Hash + Eq,
    F: Fn(&E) -> Result<K, X>,
    G: Fn(&K) -> Result<(), X>,
{
    /// Builds an index carrying a key guard.
    ///
    /// With `guard_source_keys` set, the guard runs on every derived key during the build and
    /// its failure halts the build exactly like a failing key derivation. Without the flag the
    /// guard is only stored for use by lookups that ask for it.
    pub fn build_guarded(
        source: impl IntoIterator<Item = E>,
        key_fn: F,
        key_guard: G,
        guard_source_keys: bool,
    ) -> Self {
        Self::build_guarded_fallible(source.into_iter().map(Ok), key_fn, key_guard, guard_source_keys)
    }

    /// Fallible-source form of [`build_guarded`](Self::build_guarded).
    pub fn build_guarded_fallible(
        source: impl IntoIterator<Item = Result<E, X>>,
        key_fn: F,
        key_guard: G,
        guard_source_keys: bool,
    ) -> Self {
        Self::build_inner(
            source,
            key_fn,
            Some(key_guard),
            guard_source_keys,
            DefaultBuildHasher::default(),
        )
    }
}

impl<E, K, X, F, G, S> StrictIndex<E, K, X, F, G, S>
where
    K: Hash + Eq,
    F: Fn(&E) -> Result<K, X>,
    G: Fn(&K) -> Result<(), X>,
    S: BuildHasher,
{
    fn build_inner(
        source: impl IntoIterator<Item = Result<E, X>>,
        key_fn: F,
        key_guard: Option<G>,
        guard_source_keys: bool,
        build_hasher: S,
    ) -> Self {
        let mut elements = Vec::new();
        let mut map = KeyMultimap::with_hasher(build_hasher);
        let mut valid_prefix = 0;
        let mut first_failure = None;
        for item in source {
            let element = match item {
                Ok(element) => element,
                Err(failure) => {
                    log::debug!(
                        "strict index build: source failed after {} elements",
                        elements.len()
                    );
                    first_failure = Some(failure);
                    break;
                }
            };
            // The failing element is retained: it is still the first source element as far as
            // lookup-time re-probing is concerned.
            let index = elements.len();
            elements.push(element);
            let key = match key_fn(&elements[index]) {
                Ok(key) => key,
                Err(failure) => {
                    log::debug!("strict index build: key derivation failed at element {index}");
                    first_failure = Some(failure);
                    break;
                }
            };
            if guard_source_keys {
                if let Some(guard) = &key_guard {
                    if let Err(failure) = guard(&key) {
                        first_failure = Some(failure);
                        break;
                    }
                }
            }
            map.insert(key, index);
            valid_prefix += 1;
        }
        StrictIndex {
            elements,
            map,
            valid_prefix,
            first_failure,
            key_fn,
            key_guard,
        }
    }

    /// Looks up the bucket for the key produced by `probe`.
    ///
    /// Failures surface in the order the equivalent nested scan would have raised them:
    ///
    /// * A failing probe over an empty source yields the empty lookup; the scan would have
    ///   produced nothing without ever evaluating the probe.
    /// * A failing probe over a non-empty source raises the probe failure, unless
    ///   `key_before_probe` is set, in which case the key derivation of the first source element
    ///   runs first and its failure takes precedence. (The index re-probes the element it
    ///   retained at build time, so sources need not re-enumerate deterministically.) If the
    ///   source failed on its very first advance, that failure takes precedence the same way.
    /// * With `guard_probe` set and a guard stored, the guard runs on the successfully evaluated
    ///   probe key and its failure is raised.
    /// * A failure recorded during the build is yielded once, after the last match, on the
    ///   lookup's final advance.
    ///
    /// Raised failures are `Err` items of the returned iterator, which fuses after yielding one.
    pub fn lookup(
        &self,
        probe: impl FnOnce() -> Result<K, X>,
        key_before_probe: bool,
        guard_probe: bool,
    ) -> StrictLookup<'_, E, X>
    where
        X: Clone,
    {
        let key = match probe() {
            Ok(key) => key,
            Err(probe_failure) => {
                if self.source_is_empty() {
                    return StrictLookup::default();
                }
                if key_before_probe {
                    if let Some(first) = self.elements.first() {
                        if let Err(failure) = (self.key_fn)(first) {
                            return StrictLookup::failed(failure);
                        }
                    } else if let Some(failure) = &self.first_failure {
                        return StrictLookup::failed(failure.clone());
                    }
                }
                return StrictLookup::failed(probe_failure);
            }
        };
        if guard_probe {
            if let Some(guard) = &self.key_guard {
                if let Err(failure) = guard(&key) {
                    return StrictLookup::failed(failure);
                }
            }
        }
        StrictLookup {
            elements: &self.elements,
            indices: self.map.get(&key).iter(),
            trailing: self.first_failure.clone(),
        }
    }
}

impl<E, K, X, F, G, S> StrictIndex<E, K, X, F, G, S> {
    /// Returns the number of indexed elements, the prefix of the source in front of any
    /// recorded failure.
    pub fn len(&self) -> usize {
        self.valid_prefix
    }

    /// Returns `true` when the index contains no elements.
    pub fn is_empty(&self) -> bool {
        self.valid_prefix == 0
    }

    /// Returns the failure that halted the build, if any.
    pub fn first_failure(&self) -> Option<&X> {
        self.first_failure.as_ref()
    }

    /// Returns the number of distinct keys.
    pub fn distinct_keys(&self) -> usize {
        self.map.distinct_keys()
    }

    fn source_is_empty(&self) -> bool {
        self.elements.is_empty() && self.first_failure.is_none()
    }
}

impl<E, K, X: fmt::Debug, F, G, S> fmt::Debug for StrictIndex<E, K, X, F, G, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrictIndex")
            .field("len", &self.len())
            .field("distinct_keys", &self.distinct_keys())
            .field("first_failure", &self.first_failure)
            .finish_non_exhaustive()
    }
}

/// Lazy result sequence of a [`StrictIndex`] lookup.
///
/// Yields the matching elements in source order; a failure raised by the lookup is yielded as
/// a single `Err` item, either leading (probe and guard failures) or trailing (the recorded
/// build failure, on the final advance). The iterator fuses after an `Err`.
///
/// This struct is created by the [`lookup`](StrictIndex::lookup) method on [`StrictIndex`].
pub struct StrictLookup<'a, E, X> {
    elements: &'a [E],
    indices: std::slice::Iter<'a, usize>,
    trailing: Option<X>,
}

impl<E, X> StrictLookup<'_, E, X> {
    fn failed(failure: X) -> Self {
        StrictLookup {
            elements: &[],
            indices: [].iter(),
            trailing: Some(failure),
        }
    }
}

impl<E, X> Default for StrictLookup<'_, E, X> {
    fn default() -> Self {
        StrictLookup {
            elements: &[],
            indices: [].iter(),
            trailing: None,
        }
    }
}

impl<'a, E, X> Iterator for StrictLookup<'a, E, X> {
    type Item = Result<&'a E, X>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.indices.next() {
            Some(&index) => Some(Ok(&self.elements[index])),
            None => self.trailing.take().map(Err),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let extra = self.trailing.is_some() as usize;
        let (lower, upper) = self.indices.size_hint();
        (lower + extra, upper.map(|upper| upper + extra))
    }
}

impl<E, X> ExactSizeIterator for StrictLookup<'_, E, X> {}

impl<E, X> std::iter::FusedIterator for StrictLookup<'_, E, X> {}

#[test]
fn probe_failure_ordering() {
    let rows: Vec<Option<u32>> = vec![None, Some(2)];
    let index = StrictIndex::build(rows, |row: &Option<u32>| row.ok_or("key failed"));

    // The first element's key derivation failed, so nothing is indexed.
    assert!(index.is_empty());
    assert_eq!(index.first_failure(), Some(&"key failed"));

    // Probe failure alone is raised as is.
    let observed: Vec<_> = index
        .lookup(|| Err::<u32, _>("probe failed"), false, false)
        .collect();
    assert_eq!(observed, [Err("probe failed")]);

    // With the key operand evaluated first, the first element's failure wins.
    let observed: Vec<_> = index
        .lookup(|| Err::<u32, _>("probe failed"), true, false)
        .collect();
    assert_eq!(observed, [Err("key failed")]);
}
