//! Live collections and query results.
//!
//! Every collection is a lightweight view `(handle, owner, property)`; it
//! holds no data itself and re-reads the handle's current view on each call,
//! so contents always match the handle's version (or the open write).

mod any;
mod backlinks;
mod list;
mod map;
mod results;
mod set;

pub use any::AnyCollection;
pub use backlinks::LinkingObjects;
pub use list::LiveList;
pub use map::LiveMap;
pub use results::{CompareOp, Predicate, Results, SortKey};
pub use set::LiveSet;

use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::record::Field;
use crate::snapshot::Snapshot;
use driftdb_codec::ObjectKey;
use std::ops::{Bound, Range, RangeBounds};

/// Read access shared by every collection kind.
///
/// Implemented by [`LiveList`], [`LiveSet`], [`LiveMap`], [`Results`],
/// [`LinkingObjects`] and [`AnyCollection`], so code can count, index and
/// iterate any of them without knowing which one it holds.
pub trait Collection {
    /// Element type.
    type Item;

    /// Number of elements.
    fn len(&self) -> CoreResult<usize>;

    /// Element at `index`, or `IndexOutOfBounds`.
    fn get(&self, index: usize) -> CoreResult<Self::Item>;

    /// All elements in order.
    fn to_vec(&self) -> CoreResult<Vec<Self::Item>>;

    /// Returns true if the collection's owner (or handle) is gone.
    fn is_invalidated(&self) -> bool;

    /// Returns true if there are no elements.
    fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Iterates over a copy of the elements.
    fn iter(&self) -> CoreResult<std::vec::IntoIter<Self::Item>> {
        Ok(self.to_vec()?.into_iter())
    }
}

macro_rules! impl_collection {
    ($ty:ty, $item:ty) => {
        impl $crate::collections::Collection for $ty {
            type Item = $item;

            fn len(&self) -> $crate::error::CoreResult<usize> {
                <$ty>::len(self)
            }

            fn get(&self, index: usize) -> $crate::error::CoreResult<$item> {
                <$ty>::get(self, index)
            }

            fn to_vec(&self) -> $crate::error::CoreResult<Vec<$item>> {
                <$ty>::to_vec(self)
            }

            fn is_invalidated(&self) -> bool {
                <$ty>::is_invalidated(self)
            }
        }
    };
}
pub(crate) use impl_collection;

/// Runs `f` on a field of a live owner.
pub(crate) fn with_field<R>(
    db: &Database,
    owner: &ObjectKey,
    property: &str,
    f: impl FnOnce(&Snapshot, &Field) -> CoreResult<R>,
) -> CoreResult<R> {
    db.read(|s| {
        let record = s.record(owner).ok_or(CoreError::InvalidatedObject)?;
        let field = record
            .fields
            .get(property)
            .ok_or_else(|| CoreError::unknown_property(&owner.class, property))?;
        f(s, field)
    })?
}

pub(crate) fn out_of_bounds(index: usize, len: usize) -> CoreError {
    CoreError::IndexOutOfBounds { index, len }
}

/// Converts `range` into indices within `0..len`.
pub(crate) fn bounded(range: impl RangeBounds<usize>, len: usize) -> CoreResult<Range<usize>> {
    let start = match range.start_bound() {
        Bound::Included(&s) => s,
        Bound::Excluded(&s) => s + 1,
        Bound::Unbounded => 0,
    };
    let end = match range.end_bound() {
        Bound::Included(&e) => e + 1,
        Bound::Excluded(&e) => e,
        Bound::Unbounded => len,
    };
    if end > len {
        return Err(out_of_bounds(end - 1, len));
    }
    if start > end {
        return Err(out_of_bounds(start, len));
    }
    Ok(start..end)
}
