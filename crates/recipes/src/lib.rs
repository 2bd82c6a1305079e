//! Declarative recipes and the token-budgeted doc-pack builder.
//!
//! A recipe declares what a role reads (prompt fragments, input docs), what
//! it writes, and under what token budget. The doc-pack builder realizes a
//! recipe against a turn directory into the final LLM input, enforcing the
//! budget as a hard invariant — over-budget at build time is fatal, never
//! silently truncated.

pub mod docpack;
pub mod recipe;
pub mod trim;

pub use docpack::{DocPack, DocPackBuilder, DocPackItem};
pub use recipe::{
    DocSpec, PathType, Recipe, RecipeLoader, TokenBudget, TrimMethod, TrimStrategy,
};
