//! The contract layer: parse-or-repair for every inter-phase payload, the
//! violation monitor, token-budget enforcement, and the per-component
//! circuit breakers.
//!
//! Philosophy (applies to every `parse_*`):
//! - parse, don't validate — always return a structurally valid value
//! - repair when possible — extract usable data from malformed payloads
//! - fall back to safe defaults — a degraded response beats a crash
//! - record everything — violations feed prompt improvements

pub mod breaker;
pub mod budget;
pub mod enforcer;
pub mod monitor;

pub use breaker::{CircuitBreaker, CircuitState, CircuitStatus};
pub use budget::{estimate_tokens, TokenBudgetEnforcer};
pub use enforcer::{ContractEnforcer, GuideResponse, PlannedCalls};
pub use monitor::{ContractMonitor, MonitorSummary};
