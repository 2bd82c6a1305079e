//! The three-layer cache: session-scoped responses, cross-session claims,
//! and shared tool outputs, all swept by one scheduled eviction task.
//!
//! Layers share the entry shape and the hybrid (semantic × keyword) lookup;
//! they differ in keying, TTL policy, and staleness acceptance. Domain
//! isolation is enforced before any scoring happens.

pub mod claims;
pub mod entry;
pub mod layer;
pub mod response;
pub mod sweeper;
pub mod tool_output;

pub use claims::ClaimCache;
pub use entry::{CacheEntry, Freshness};
pub use layer::{CacheLayer, LayerStats, SweepOutcome};
pub use response::{CachedResponse, ResponseCache, ResponseHit};
pub use sweeper::{CacheSweeper, SweepReport};
pub use tool_output::{tool_cache_key, ToolOutputCache};
