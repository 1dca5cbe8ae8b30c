//! Default hasher used by the index types.
use std::hash::BuildHasherDefault;

use zwohash::ZwoHasher;

/// The [`BuildHasher`](std::hash::BuildHasher) used by all index types unless a custom one is
/// supplied.
pub type DefaultBuildHasher = BuildHasherDefault<ZwoHasher>;
