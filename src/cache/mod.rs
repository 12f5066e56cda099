//! # Cache-Aside Layer
//!
//! Content-addressed memoization of stage outputs (extracted text,
//! translations). Callers decide when to populate: a stage output is written
//! only after a confirmed successful invocation, so a failed run can never
//! poison the key space and replay forever.

pub mod key;
pub mod service;

pub use key::stage_cache_key;
pub use service::{CacheHealth, CacheService};
