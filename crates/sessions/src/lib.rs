//! Session-scoped state: the append-only ledger, per-turn directories of
//! typed documents, the live session context, and the long-term memory
//! file layout.

pub mod ledger;
pub mod live;
pub mod memory_files;
pub mod turn_dir;

pub use ledger::{LedgerEvent, SessionLedger};
pub use live::{LiveSessionContext, RecentAction, SessionMap};
pub use memory_files::{MemoryDocKind, MemoryStore, MemoryWrite};
pub use turn_dir::{TurnDirectory, TurnDocs};
