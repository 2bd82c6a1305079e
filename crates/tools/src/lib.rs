//! The tool plane as the orchestrator sees it: a uniform JSON-RPC client,
//! the shipped tool catalog, and the human-intervention protocol for
//! blockers (CAPTCHAs, login walls, rate limits).

pub mod catalog;
pub mod client;
pub mod intervention;

pub use catalog::{is_approval_required, known_tools, tool_category};
pub use client::ToolClient;
pub use intervention::{
    InterventionOutcome, InterventionRequest, InterventionStore, InterventionType,
};
