//! AppState construction and background-task spawning.
//!
//! This is the single composition root: every service the pipeline uses is
//! built and wired here, then injected through `AppState`.

use std::sync::Arc;

use anyhow::Context;

use cg_cache::{CacheSweeper, ClaimCache, ResponseCache, ToolOutputCache};
use cg_contracts::{CircuitBreaker, ContractEnforcer, ContractMonitor, TokenBudgetEnforcer};
use cg_domain::config::{Config, ConfigSeverity};
use cg_knowledge::KnowledgeDb;
use cg_providers::OpenAiCompatClient;
use cg_recipes::{DocPackBuilder, RecipeLoader};
use cg_sessions::{MemoryStore, SessionLedger, SessionMap};
use cg_state::{ArtifactStore, EmbeddingService};
use cg_tools::{InterventionStore, ToolClient};

use crate::runtime::cancel::CancelMap;
use crate::runtime::reflection::ReflectionStats;
use crate::runtime::session_lock::SessionLockMap;
use crate::state::AppState;

/// Validate config, initialize every subsystem, and return a fully-wired
/// [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Shared-state backbone ────────────────────────────────────────
    let embedder = Arc::new(EmbeddingService::new());
    let artifacts = Arc::new(
        ArtifactStore::open(config.paths.artifacts_dir()).context("opening artifact store")?,
    );
    let knowledge =
        KnowledgeDb::open(&config.paths.knowledge_db()).context("opening knowledge db")?;
    let claims = Arc::new(knowledge.claims());
    let topics = Arc::new(knowledge.topics(embedder.clone()));
    tracing::info!(
        artifacts = %config.paths.artifacts_dir().display(),
        knowledge = %config.paths.knowledge_db().display(),
        "shared-state backbone ready"
    );

    // ── Cache layers + sweeper ───────────────────────────────────────
    let response_cache = Arc::new(ResponseCache::new(
        &config.cache.response,
        &config.cache.hybrid,
        embedder.clone(),
    ));
    let claim_cache = Arc::new(ClaimCache::new(
        &config.cache.claims,
        &config.cache.hybrid,
        embedder.clone(),
    ));
    let tool_cache = Arc::new(ToolOutputCache::new(&config.cache.tool_output));

    let sweeper = Arc::new(CacheSweeper::new(
        config.cache.sweep_interval_seconds,
        config.cache.min_quality_threshold,
    ));
    sweeper.register(response_cache.layer());
    sweeper.register(claim_cache.layer());
    sweeper.register(tool_cache.layer());
    tracing::info!(
        interval = config.cache.sweep_interval_seconds,
        "cache layers registered with sweeper"
    );

    // ── Contract layer ───────────────────────────────────────────────
    let monitor = Arc::new(ContractMonitor::new());
    let enforcer = Arc::new(ContractEnforcer::new(monitor.clone()));
    let budget = Arc::new(TokenBudgetEnforcer::new());

    // ── Circuit breakers ─────────────────────────────────────────────
    let llm_breaker = Arc::new(CircuitBreaker::new(config.breaker.clone()));
    let tool_breaker = Arc::new(CircuitBreaker::new(config.breaker.clone()));
    tracing::info!(
        failure_threshold = config.breaker.failure_threshold,
        recovery_timeout = config.breaker.recovery_timeout,
        "circuit breakers ready"
    );

    // ── Recipes & doc packs ──────────────────────────────────────────
    let recipes = Arc::new(RecipeLoader::new(
        &config.paths.recipes_dir,
        &config.paths.prompts_dir,
    ));
    let docpack = Arc::new(DocPackBuilder::new(
        std::env::current_dir().unwrap_or_default(),
        &config.paths.memory_root,
    ));

    // ── LLM endpoints ────────────────────────────────────────────────
    let planner_llm = Arc::new(
        OpenAiCompatClient::from_config("llm.planner", &config.llm.planner, config.llm.timeout_secs)
            .context("building planner LLM client")?,
    );
    let coordinator_llm = Arc::new(
        OpenAiCompatClient::from_config(
            "llm.coordinator",
            config.llm.coordinator_or_planner(),
            config.llm.timeout_secs,
        )
        .context("building coordinator LLM client")?,
    );
    let llm_semaphore = Arc::new(tokio::sync::Semaphore::new(config.llm.max_concurrent.max(1)));
    tracing::info!(
        planner = %config.llm.planner.base_url,
        max_concurrent = config.llm.max_concurrent,
        "LLM endpoints ready"
    );

    // ── Tool plane ───────────────────────────────────────────────────
    let tools = Arc::new(ToolClient::new(&config.tools, enforcer.clone()).context("building tool client")?);
    let interventions = Arc::new(InterventionStore::new(
        config.paths.intervention_queue(),
        &config.tools.intervention,
    ));

    // ── Session state ────────────────────────────────────────────────
    let sessions = Arc::new(SessionMap::new());
    let ledger = Arc::new(SessionLedger::new(&config.paths.ledger_dir()).context("opening ledger")?);
    let memory = Arc::new(MemoryStore::new(&config.paths.memory_root).context("opening memory store")?);
    std::fs::create_dir_all(&config.paths.transcripts_dir).context("creating transcripts dir")?;
    let session_locks = Arc::new(SessionLockMap::new());
    let cancel_map = Arc::new(CancelMap::new());
    tracing::info!(
        memory = %config.paths.memory_root.display(),
        transcripts = %config.paths.transcripts_dir.display(),
        "session state ready"
    );

    Ok(AppState {
        config,
        embedder,
        artifacts,
        claims,
        topics,
        response_cache,
        claim_cache,
        tool_cache,
        sweeper,
        enforcer,
        monitor,
        budget,
        llm_breaker,
        tool_breaker,
        recipes,
        docpack,
        planner_llm,
        coordinator_llm,
        llm_semaphore,
        tools,
        interventions,
        sessions,
        ledger,
        memory,
        session_locks,
        cancel_map,
        reflection_stats: Arc::new(ReflectionStats::default()),
    })
}

/// Spawn the long-running background tasks. Call after [`build_app_state`]
/// when running the HTTP server.
pub fn spawn_background_tasks(state: &AppState) {
    // ── Cache eviction sweeper ───────────────────────────────────────
    {
        let sweeper = state.sweeper.clone();
        tokio::spawn(sweeper.run());
    }

    // ── Periodic expired-claim pruning ───────────────────────────────
    {
        let claims = state.claims.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(3_600));
            loop {
                interval.tick().await;
                match claims.prune_expired(chrono::Utc::now()) {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(pruned = n, "expired claims deprecated"),
                    Err(e) => tracing::warn!(error = %e, "claim pruning failed"),
                }
            }
        });
    }

    // ── Periodic session-lock pruning ────────────────────────────────
    {
        let locks = state.session_locks.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                locks.prune_idle();
            }
        });
    }

    tracing::info!("background tasks spawned");
}
