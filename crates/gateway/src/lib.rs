//! Gateway library surface: the composition root, the HTTP router, and the
//! turn runtime. The `coggate` binary is a thin wrapper over these.

pub mod api;
pub mod bootstrap;
pub mod runtime;
pub mod state;
