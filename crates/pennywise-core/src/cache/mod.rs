//! Client-side caching of backend data.
//!
//! - [`EntityCache`] is the shared engine for one user-scoped collection, with
//!   TTL revalidation, a loading flag and a last error.
//! - [`CategoryStore`], [`ExpenseStore`] and [`GroupTotalsStore`] wrap it with
//!   backend calls, confirm-then-apply mutations and derived accessors.
//! - [`RequestQueue`] collapses concurrent identical requests into one.
//! - [`Prefetcher`] keeps keyed results for a few minutes on top of the queue.

mod categories;
mod entity;
mod entry;
mod expenses;
mod group_totals;
mod prefetch;
mod queue;

pub use categories::CategoryStore;
pub use entity::{EntityCache, FetchOutcome};
pub use entry::CacheEntry;
pub use expenses::ExpenseStore;
pub use group_totals::{GroupTotalsStore, StampedTotal, Totals};
pub use prefetch::{Prefetcher, PREFETCH_TTL};
pub use queue::{RequestQueue, SharedResult};
