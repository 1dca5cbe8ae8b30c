//! Equality-keyed in-memory indexes with configurable failure fidelity.
//!
//! This crate accelerates the classic nested-scan pattern: for each element of one sequence,
//! find all elements of another sharing a key, when the key-deriving expressions are arbitrary
//! user code that can fail at any time (an absent field, a division by zero, an overflow). A
//! plain eager hash index would hide or reorder those failures relative to the original
//! element-at-a-time expression; the index family here makes that trade explicit. All variants
//! are built by fully draining a finite source with a fallible key selector, and are probed
//! with a *deferred key*: a nullary closure evaluated inside the lookup so that its failure can
//! be routed by the variant.
//!
//! * [`RelaxedIndex`] swallows every failure: failing elements are dropped, failing probes
//!   miss. Fastest, and the lookup cannot fail.
//! * [`StrictIndex`] reproduces the naive scan's failures in their original observable order:
//!   the build halts at the first failing key derivation and lookups re-raise it after the
//!   last match, while probe failures are re-ordered against the first element's key
//!   derivation as the shape of the original expression demands.
//! * [`PartlyRelaxedIndex`] records all key failures and raises one only when a caller-supplied
//!   residual predicate shows the failing element would have been visited.
//! * [`GroupedIndex`] turns failures into data: lookups yield [`Keyed`] wrappers that re-raise
//!   a pending failure on inspection instead of failing the sequence itself.
//!
//! Failures flow through the caller's own error type, which is cloned (never wrapped, remapped
//! or logged) wherever a stored failure is re-raised. Lookup misses borrow a canonical empty
//! slice and allocate nothing. All index types are immutable once built and expose only `&self`
//! lookups, so concurrent lookups are safe.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod multimap;

pub mod grouped;
pub mod hash;
pub mod partly_relaxed;
pub mod relaxed;
pub mod strict;

pub use grouped::{GroupLookup, GroupedIndex, Keyed};
pub use partly_relaxed::{PartlyRelaxedIndex, PartlyRelaxedLookup};
pub use relaxed::{RelaxedIndex, RelaxedLookup};
pub use strict::{NoKeyGuard, StrictIndex, StrictLookup};
