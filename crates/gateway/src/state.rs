//! The fully-wired application state.
//!
//! Every service is constructed once in `bootstrap` and passed explicitly —
//! there are no module-level singletons. `AppState` is cheap to clone (all
//! members are `Arc`s).

use std::sync::Arc;

use cg_cache::{CacheSweeper, ClaimCache, ResponseCache, ToolOutputCache};
use cg_contracts::{CircuitBreaker, ContractEnforcer, ContractMonitor, TokenBudgetEnforcer};
use cg_domain::config::Config;
use cg_knowledge::{ClaimRegistry, TopicIndex};
use cg_providers::LlmClient;
use cg_recipes::{DocPackBuilder, RecipeLoader};
use cg_sessions::{MemoryStore, SessionLedger, SessionMap};
use cg_state::{ArtifactStore, EmbeddingService};
use cg_tools::{InterventionStore, ToolClient};

use crate::runtime::cancel::CancelMap;
use crate::runtime::reflection::ReflectionStats;
use crate::runtime::session_lock::SessionLockMap;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    // Shared-state backbone.
    pub embedder: Arc<EmbeddingService>,
    pub artifacts: Arc<ArtifactStore>,
    pub claims: Arc<ClaimRegistry>,
    pub topics: Arc<TopicIndex>,

    // Three-layer cache + sweeper.
    pub response_cache: Arc<ResponseCache>,
    pub claim_cache: Arc<ClaimCache>,
    pub tool_cache: Arc<ToolOutputCache>,
    pub sweeper: Arc<CacheSweeper>,

    // Contract layer.
    pub enforcer: Arc<ContractEnforcer>,
    pub monitor: Arc<ContractMonitor>,
    pub budget: Arc<TokenBudgetEnforcer>,

    // Fault tolerance: one breaker for LLM endpoints, one for tool
    // categories.
    pub llm_breaker: Arc<CircuitBreaker>,
    pub tool_breaker: Arc<CircuitBreaker>,

    // Recipes & prompt assembly.
    pub recipes: Arc<RecipeLoader>,
    pub docpack: Arc<DocPackBuilder>,

    // LLM endpoints and the outbound concurrency cap.
    pub planner_llm: Arc<dyn LlmClient>,
    pub coordinator_llm: Arc<dyn LlmClient>,
    pub llm_semaphore: Arc<tokio::sync::Semaphore>,

    // Tool plane.
    pub tools: Arc<ToolClient>,
    pub interventions: Arc<InterventionStore>,

    // Session state.
    pub sessions: Arc<SessionMap>,
    pub ledger: Arc<SessionLedger>,
    pub memory: Arc<MemoryStore>,
    pub session_locks: Arc<SessionLockMap>,
    pub cancel_map: Arc<CancelMap>,

    pub reflection_stats: Arc<ReflectionStats>,
}
