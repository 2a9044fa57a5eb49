//! Two-tier response caching for read-mostly endpoints.
//!
//! - [`ResponseCache`] holds short-lived entries in memory and answers the
//!   normal "is this fresh enough to serve" question.
//! - [`FallbackStore`] keeps the last good payload on disk for days, and is
//!   only consulted once the live path has failed or been blocked.
//!
//! The two stores expire independently and know nothing about each other.

mod fallback;
mod live;

pub use fallback::{FallbackHit, FallbackStore, DEFAULT_FALLBACK_WINDOW_DAYS};
pub use live::ResponseCache;
