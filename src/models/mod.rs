//! Data models for storechain.
//!
//! Records, the absence-safe envelope, and query descriptors.

mod optional;
mod query;
mod record;

pub use optional::Optional;
pub use query::{Condition, Filter, FilterType, SortType, SortingMode, compare_values};
pub use record::{Document, Record, RecordId, ids_of};
