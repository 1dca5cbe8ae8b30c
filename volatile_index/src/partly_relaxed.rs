//! Failure-collecting equality index gated by a residual predicate.
use std::fmt;
use std::hash::{BuildHasher, Hash};

use crate::hash::DefaultBuildHasher;
use crate::multimap::KeyMultimap;

/// Equality index that retains every key-derivation failure but only raises the ones the
/// original scan would have reached.
///
/// The build drains the whole source: successful keys populate the buckets while failures are
/// recorded with their elements in source order. At lookup time a failure is only raised when
/// its element would have been visited: always, without further information, or gated by a
/// *residual predicate* standing in for the remaining conditions of the outer expression (see
/// [`lookup_filtered`](Self::lookup_filtered)). This lets a caller push the rest of its filter
/// into the index so the index does not invent failures the original expression would have
/// filtered out.
///
/// Once built the index is immutable; lookups take `&self` and are safe to run concurrently.
pub struct PartlyRelaxedIndex<E, K, X, F, S = DefaultBuildHasher> {
    elements: Vec<E>,
    map: KeyMultimap<K, S>,
    key_failures: Vec<(usize, X)>,
    key_fn: F,
}

impl<E, K, X, F> PartlyRelaxedIndex<E, K, X, F>
where
    K: Hash + Eq,
    F: Fn(&E) -> Result<K, X>,
{
    /// Builds an index over `source`, recording every failing key derivation.
    pub fn build(source: impl IntoIterator<Item = E>, key_fn: F) -> Self {
        let Ok(index) = Self::build_fallible(source.into_iter().map(Ok), key_fn) else {
            unreachable!()
        };
        index
    }

    /// Builds an index over a source whose own advance can fail.
    ///
    /// Unlike key-derivation failures, a source failure has no element to attach to, so it is
    /// surfaced and the partially drained source is discarded.
    pub fn build_fallible(
        source: impl IntoIterator<Item = Result<E, X>>,
        key_fn: F,
    ) -> Result<Self, X> {
        Self::build_fallible_with_hasher(source, key_fn, DefaultBuildHasher::default())
    }
}

impl<E, K, X, F, S> PartlyRelaxedIndex<E, K, X, F, S>
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
    ) -> Result<Self, X> {
        let mut elements = Vec::new();
        let mut map = KeyMultimap::with_hasher(build_hasher);
        let mut key_failures = Vec::new();
        for item in source {
            let element = item?;
            let index = elements.len();
            elements.push(element);
            match key_fn(&elements[index]) {
                Ok(key) => map.insert(key, index),
                Err(failure) => key_failures.push((index, failure)),
            }
        }
        Ok(PartlyRelaxedIndex {
            elements,
            map,
            key_failures,
            key_fn,
        })
    }

    /// Looks up the bucket for the key produced by `probe`.
    ///
    /// Without a residual predicate every recorded failure is reachable, so the first one is
    /// raised (as a leading `Err`) before any results. A failing probe over an empty source
    /// yields the empty lookup; over a non-empty source it raises the probe failure, unless
    /// `key_before_probe` is set, in which case the first element's key derivation runs first
    /// and its failure takes precedence.
    pub fn lookup(
        &self,
        probe: impl FnOnce() -> Result<K, X>,
        key_before_probe: bool,
    ) -> PartlyRelaxedLookup<'_, E, X>
    where
        X: Clone,
    {
        self.lookup_inner(probe, key_before_probe, None::<fn(&E) -> bool>)
    }

    /// Looks up the bucket for the key produced by `probe`, gated and filtered by `residual`.
    ///
    /// The residual predicate stands in for the remaining conditions of the outer expression.
    /// A recorded failure is only raised when some failing element satisfies it; a failing
    /// probe is only raised when some source element satisfies it (the first such element is
    /// the one whose key derivation runs first under `key_before_probe`); and the returned
    /// bucket is lazily filtered by it.
    pub fn lookup_filtered<P>(
        &self,
        probe: impl FnOnce() -> Result<K, X>,
        key_before_probe: bool,
        residual: P,
    ) -> PartlyRelaxedLookup<'_, E, X, P>
    where
        X: Clone,
        P: Fn(&E) -> bool,
    {
        self.lookup_inner(probe, key_before_probe, Some(residual))
    }

    fn lookup_inner<P>(
        &self,
        probe: impl FnOnce() -> Result<K, X>,
        key_before_probe: bool,
        residual: Option<P>,
    ) -> PartlyRelaxedLookup<'_, E, X, P>
    where
        X: Clone,
        P: Fn(&E) -> bool,
    {
        let key = match probe() {
            Ok(key) => key,
            Err(probe_failure) => {
                // The first element the outer scan would have visited decides whether the
                // probe failure is observable at all.
                let witness = match &residual {
                    None => self.elements.first(),
                    Some(residual) => self.elements.iter().find(|&element| residual(element)),
                };
                let Some(witness) = witness else {
                    return PartlyRelaxedLookup::default();
                };
                if key_before_probe {
                    if let Err(failure) = (self.key_fn)(witness) {
                        return PartlyRelaxedLookup::failed(failure);
                    }
                }
                return PartlyRelaxedLookup::failed(probe_failure);
            }
        };
        let blocking = match &residual {
            None => self.key_failures.first(),
            Some(residual) => self
                .key_failures
                .iter()
                .find(|(index, _)| residual(&self.elements[*index])),
        };
        if let Some((_, failure)) = blocking {
            return PartlyRelaxedLookup::failed(failure.clone());
        }
        PartlyRelaxedLookup {
            elements: &self.elements,
            indices: self.map.get(&key).iter(),
            residual,
            leading: None,
        }
    }
}

impl<E, K, X, F, S> PartlyRelaxedIndex<E, K, X, F, S> {
    /// Returns the number of indexed elements.
    ///
    /// Elements whose key derivation failed are retained but not counted here; see
    /// [`key_failures`](Self::key_failures).
    pub fn len(&self) -> usize {
        self.elements.len() - self.key_failures.len()
    }

    /// Returns `true` when the index contains no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of distinct keys.
    pub fn distinct_keys(&self) -> usize {
        self.map.distinct_keys()
    }

    /// Returns the recorded key-derivation failures with their elements, in source order.
    pub fn key_failures(&self) -> impl Iterator<Item = (&E, &X)> {
        self.key_failures
            .iter()
            .map(|(index, failure)| (&self.elements[*index], failure))
    }
}

impl<E, K, X, F, S> fmt::Debug for PartlyRelaxedIndex<E, K, X, F, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartlyRelaxedIndex")
            .field("len", &self.len())
            .field("distinct_keys", &self.distinct_keys())
            .field("key_failures", &self.key_failures.len())
            .finish_non_exhaustive()
    }
}

/// Lazy result sequence of a [`PartlyRelaxedIndex`] lookup.
///
/// Yields the matching elements in source order, filtered by the residual predicate when one
/// was supplied. A failure raised by the lookup is yielded as a single leading `Err`; no
/// results follow it. The iterator fuses after an `Err`.
///
/// This struct is created by the [`lookup`](PartlyRelaxedIndex::lookup) and
/// [`lookup_filtered`](PartlyRelaxedIndex::lookup_filtered) methods on [`PartlyRelaxedIndex`].
pub struct PartlyRelaxedLookup<'a, E, X, P = fn(&E) -> bool> {
    elements: &'a [E],
    indices: std::slice::Iter<'a, usize>,
    residual: Option<P>,
    leading: Option<X>,
}

impl<E, X, P> PartlyRelaxedLookup<'_, E, X, P> {
    fn failed(failure: X) -> Self {
        PartlyRelaxedLookup {
            elements: &[],
            indices: [].iter(),
            residual: None,
            leading: Some(failure),
        }
    }
}

impl<E, X, P> Default for PartlyRelaxedLookup<'_, E, X, P> {
    fn default() -> Self {
        PartlyRelaxedLookup {
            elements: &[],
            indices: [].iter(),
            residual: None,
            leading: None,
        }
    }
}

impl<'a, E, X, P: Fn(&E) -> bool> Iterator for PartlyRelaxedLookup<'a, E, X, P> {
    type Item = Result<&'a E, X>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(failure) = self.leading.take() {
            return Some(Err(failure));
        }
        loop {
            let &index = self.indices.next()?;
            let element = &self.elements[index];
            match &self.residual {
                Some(residual) if !residual(element) => continue,
                _ => return Some(Ok(element)),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let extra = self.leading.is_some() as usize;
        if self.residual.is_some() {
            (extra, Some(self.indices.len() + extra))
        } else {
            (self.indices.len() + extra, Some(self.indices.len() + extra))
        }
    }
}

impl<E, X, P: Fn(&E) -> bool> std::iter::FusedIterator for PartlyRelaxedLookup<'_, E, X, P> {}

#[test]
fn residual_gates_recorded_failures() {
    let rows: Vec<Option<u32>> = vec![Some(1), None, Some(1)];
    let index = PartlyRelaxedIndex::build(rows, |row: &Option<u32>| row.ok_or("null"));

    // Reachable failure: raised before any results.
    let observed: Vec<_> = index.lookup(|| Ok(1), false).collect();
    assert_eq!(observed, [Err("null")]);

    // The residual excludes the failing element, so the bucket comes through.
    let observed: Vec<_> = index
        .lookup_filtered(|| Ok(1), false, |row: &Option<u32>| row.is_some())
        .collect();
    assert_eq!(observed, [Ok(&Some(1)), Ok(&Some(1))]);
}
