//! Cache module guarding expensive upstream queries
//!
//! This module provides `ExpiringMemo`, an explicit time-bounded memo object
//! that callers own and inject, with an optional least-recently-used bound and
//! a pluggable clock for deterministic tests.

mod memo;

pub use memo::{memoize, CacheKey, Clock, ExpiringMemo, ManualClock, SystemClock};
