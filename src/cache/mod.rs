//! Run-scoped caches
//!
//! Digest and commit lookups are memoized per key for the duration of a run,
//! and platforms sharing a Dockerfile are grouped under a content-addressed
//! build unit key.
//!
//! # Single flight
//!
//! | Caller | Cell state | Outcome |
//! |--------|------------|---------|
//! | first  | empty      | runs the lookup |
//! | others | in flight  | wait for the first |
//! | any    | filled     | cached value |
//! | next   | failed     | runs the lookup again |

pub mod digest;
pub mod unit;

pub use digest::DigestCache;
pub use unit::UnitKey;
