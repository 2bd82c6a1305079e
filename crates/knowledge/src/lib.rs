//! Persistent knowledge: the typed claim registry and the hierarchical
//! topic index, sharing one SQLite database (WAL mode, single writer).

mod db;
pub mod registry;
pub mod topics;

pub use db::KnowledgeDb;
pub use registry::{compute_delta, CapsuleDeltaResult, ClaimRegistry};
pub use topics::{Topic, TopicIndex, TopicMatch};
