//! End-to-end pipeline tests: scripted LLM endpoints, a stub tool server,
//! and real (temp) filesystem state.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

use cg_cache::{CacheSweeper, ClaimCache, ResponseCache, ToolOutputCache};
use cg_contracts::{CircuitBreaker, CircuitState, ContractEnforcer, ContractMonitor, TokenBudgetEnforcer};
use cg_domain::config::Config;
use cg_gateway::runtime::turn::{run_turn, TurnRequest};
use cg_gateway::runtime::{cancel::CancelMap, reflection::ReflectionStats, session_lock::SessionLockMap};
use cg_gateway::state::AppState;
use cg_knowledge::KnowledgeDb;
use cg_providers::ScriptedClient;
use cg_sessions::{MemoryStore, SessionLedger, SessionMap, TurnDirectory};
use cg_state::{ArtifactStore, EmbeddingService};
use cg_tools::{InterventionStore, ToolClient};

// ── Fixtures ───────────────────────────────────────────────────────

/// Serve `POST /web.search` and `POST /web.visit` on an ephemeral port.
async fn spawn_tool_server() -> SocketAddr {
    let app = Router::new()
        .route(
            "/web.search",
            post(|| async {
                Json(json!({
                    "result": [
                        {"title": "HamsterHaus — syrian hamster breeder", "url": "https://hamsterhaus.example"},
                        {"title": "FluffyPaws breeders directory", "url": "https://fluffypaws.example"}
                    ]
                }))
            }),
        )
        .route(
            "/web.visit",
            post(|| async { Json(json!({"data": "page content about breeders"})) }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn build_state(
    root: &tempfile::TempDir,
    tool_server: Option<SocketAddr>,
    planner_responses: &[&str],
    coordinator_responses: &[&str],
) -> (AppState, Arc<ScriptedClient>, Arc<ScriptedClient>) {
    let mut config = Config::default();
    config.paths.memory_root = root.path().join("memory");
    config.paths.transcripts_dir = root.path().join("transcripts");
    config.paths.shared_state_dir = root.path().join("shared_state");
    config.paths.recipes_dir = root.path().join("recipes");
    config.paths.prompts_dir = root.path().join("prompts");
    config.llm.planner.base_url = "http://scripted.invalid/v1".into();
    if let Some(addr) = tool_server {
        config.tools.server_url = format!("http://{addr}");
    } else {
        // Unroutable: every tool call fails at the transport layer.
        config.tools.server_url = "http://127.0.0.1:9".into();
    }
    config.tools.timeout_secs = 2;
    config.tools.approval_required = vec![];
    let config = Arc::new(config);

    let embedder = Arc::new(EmbeddingService::new());
    let artifacts = Arc::new(ArtifactStore::open(config.paths.artifacts_dir()).unwrap());
    let knowledge = KnowledgeDb::open(&config.paths.knowledge_db()).unwrap();
    let claims = Arc::new(knowledge.claims());
    let topics = Arc::new(knowledge.topics(embedder.clone()));

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

    let monitor = Arc::new(ContractMonitor::new());
    let enforcer = Arc::new(ContractEnforcer::new(monitor.clone()));

    let planner = Arc::new(ScriptedClient::new(planner_responses));
    let coordinator = Arc::new(ScriptedClient::new(coordinator_responses));

    let state = AppState {
        config: config.clone(),
        embedder,
        artifacts,
        claims,
        topics,
        response_cache,
        claim_cache,
        tool_cache,
        sweeper,
        enforcer: enforcer.clone(),
        monitor,
        budget: Arc::new(TokenBudgetEnforcer::new()),
        llm_breaker: Arc::new(CircuitBreaker::new(config.breaker.clone())),
        tool_breaker: Arc::new(CircuitBreaker::new(config.breaker.clone())),
        recipes: Arc::new(cg_recipes::RecipeLoader::new(
            &config.paths.recipes_dir,
            &config.paths.prompts_dir,
        )),
        docpack: Arc::new(cg_recipes::DocPackBuilder::new(
            root.path(),
            &config.paths.memory_root,
        )),
        planner_llm: planner.clone(),
        coordinator_llm: coordinator.clone(),
        llm_semaphore: Arc::new(tokio::sync::Semaphore::new(4)),
        tools: Arc::new(ToolClient::new(&config.tools, enforcer).unwrap()),
        interventions: Arc::new(InterventionStore::new(
            config.paths.intervention_queue(),
            &config.tools.intervention,
        )),
        sessions: Arc::new(SessionMap::new()),
        ledger: Arc::new(SessionLedger::new(&config.paths.ledger_dir()).unwrap()),
        memory: Arc::new(MemoryStore::new(&config.paths.memory_root).unwrap()),
        session_locks: Arc::new(SessionLockMap::new()),
        cancel_map: Arc::new(CancelMap::new()),
        reflection_stats: Arc::new(ReflectionStats::default()),
    };
    std::fs::create_dir_all(&state.config.paths.transcripts_dir).unwrap();
    (state, planner, coordinator)
}

const REFLECT_PROCEED: &str =
    "QUERY_TYPE: ACTION\nACTION_VERBS: find\nCONFIDENCE: 0.9\nREASON: concrete target\nDECISION: PROCEED";
const PLAN_JSON: &str = r#"{"goal": "find syrian hamster breeders online",
    "micro_plan": ["search the web for breeders", "verify the sources"],
    "return": {"shape": "list"}}"#;
const VERIFY_JSON: &str = r#"{"claims": [
    {"claim": "HamsterHaus is an online syrian hamster breeder",
     "evidence": ["tool:1:0:web.search"], "confidence": "high",
     "metadata": {"claim_type": "RETAILER"}},
    {"claim": "FluffyPaws lists syrian hamster breeders",
     "evidence": ["tool:1:0:web.search"], "confidence": "medium",
     "metadata": {"claim_type": "RETAILER"}}
  ], "caveats": [], "open_questions": [],
  "recommended_answer_shape": "list"}"#;
const SUMMARY_JSON: &str = r#"{"short_summary": "Found two breeder sources.",
    "key_findings": ["HamsterHaus breeds syrians"], "preferences_learned": [],
    "topic": "hamster breeders", "satisfaction": 0.8, "next_turn_hints": []}"#;

// ── Scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn full_turn_produces_grounded_answer() {
    let root = tempfile::tempdir().unwrap();
    let tool_addr = spawn_tool_server().await;

    let synth_answer = "Two breeders stand out: HamsterHaus [claim-x] and FluffyPaws.";
    let (state, planner, _coordinator) = build_state(
        &root,
        Some(tool_addr),
        // Planner gate, plan, coordinator gate, verifier gate, distill,
        // synthesis, summary.
        &[
            REFLECT_PROCEED,
            PLAN_JSON,
            REFLECT_PROCEED,
            REFLECT_PROCEED,
            VERIFY_JSON,
            synth_answer,
            SUMMARY_JSON,
        ],
        &[
            "ACTION: TOOL_CALL\nCOMMAND: search the web for syrian hamster breeders\nREASON: need sources",
            r#"{"plan": [{"tool": "web.search", "args": {"query": "syrian hamster breeders"}}], "confidence": 0.9}"#,
            "ACTION: DONE\nREASON: evidence collected",
        ],
    );

    let outcome = run_turn(
        &state,
        TurnRequest {
            session_id: "s1".into(),
            query: "find syrian hamster breeders online".into(),
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.status, "completed");
    assert!(!outcome.cached);
    assert!(outcome.answer.contains("HamsterHaus"));

    // Turn directory carries the full document trail, sealed.
    let turn = TurnDirectory::open(&state.config.paths.transcripts_dir, &outcome.trace_id).unwrap();
    for doc in [
        "user_query.md",
        "context.md",
        "intent.json",
        "cache_decision.json",
        "plan.json",
        "bundle.json",
        "capsule.json",
        "answer.md",
        "turn_summary.json",
        "manifest.json",
    ] {
        assert!(turn.exists(doc), "missing {doc}");
    }

    // RETAILER claims were promoted to the registry.
    let rows = state.claims.get_for_session("s1", None, 10).unwrap();
    assert!(rows
        .iter()
        .any(|r| r.claim_type == cg_domain::claim::ClaimType::Retailer));

    // Every capsule evidence handle resolves in the bundle.
    let capsule: cg_domain::capsule::DistilledCapsule =
        serde_json::from_value(turn.read_json("capsule.json").unwrap()).unwrap();
    let bundle: cg_domain::bundle::RawBundle =
        serde_json::from_value(turn.read_json("bundle.json").unwrap()).unwrap();
    for claim in &capsule.claims {
        for handle in &claim.evidence {
            assert!(bundle.item(handle).is_some(), "dangling evidence {handle}");
        }
    }

    // The planner endpoint saw three gates, plan, verify, synth, summary.
    assert_eq!(planner.call_count(), 7);

    // The session ledger recorded the lifecycle in order.
    let events = state.ledger.read("s1").unwrap();
    let names: Vec<&str> = events.iter().map(|e| e.event.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "turn_started",
            "cache_decision",
            "ticket_issued",
            "bundle_ready",
            "capsule_ready",
            "turn_sealed"
        ]
    );
}

#[tokio::test]
async fn repeated_query_is_served_from_response_cache() {
    let root = tempfile::tempdir().unwrap();
    let tool_addr = spawn_tool_server().await;

    let gate_json = r#"{"decision": "use_response_cache", "cache_source": "response",
        "reasoning": "fresh identical query", "confidence": 0.9}"#;
    let (state, planner, coordinator) = build_state(
        &root,
        Some(tool_addr),
        &[
            // Turn 1.
            REFLECT_PROCEED,
            PLAN_JSON,
            REFLECT_PROCEED,
            REFLECT_PROCEED,
            VERIFY_JSON,
            "HamsterHaus and FluffyPaws are solid options.",
            SUMMARY_JSON,
            // Turn 2.
            REFLECT_PROCEED,
            gate_json,
            SUMMARY_JSON,
        ],
        &[
            "ACTION: TOOL_CALL\nCOMMAND: search for breeders\nREASON: need data",
            r#"{"plan": [{"tool": "web.search", "args": {"query": "syrian hamster breeders"}}]}"#,
            "ACTION: DONE\nREASON: enough",
        ],
    );

    let query = "find syrian hamster breeders online";
    let first = run_turn(
        &state,
        TurnRequest {
            session_id: "s1".into(),
            query: query.into(),
        },
    )
    .await
    .unwrap();
    assert_eq!(first.status, "completed");

    let coordinator_calls_after_first = coordinator.call_count();
    let second = run_turn(
        &state,
        TurnRequest {
            session_id: "s1".into(),
            query: query.into(),
        },
    )
    .await
    .unwrap();

    assert_eq!(second.status, "cached");
    assert!(second.cached);
    assert_eq!(second.answer, first.answer);
    // No planning, no tools on the cached turn.
    assert_eq!(coordinator.call_count(), coordinator_calls_after_first);
    // Reflection + gate + summary only on the cached turn.
    assert_eq!(planner.call_count(), 10);
}

#[tokio::test]
async fn recall_query_bypasses_cache_and_uses_prior_context() {
    let root = tempfile::tempdir().unwrap();
    let (state, _planner, _coordinator) = build_state(
        &root,
        None,
        &[
            REFLECT_PROCEED,
            r#"{"goal": "recap the previous discussion", "micro_plan": ["answer from context"]}"#,
            REFLECT_PROCEED,
            "We were just talking about hamsters — specifically breeder options.",
            SUMMARY_JSON,
        ],
        &["ACTION: DONE\nREASON: context answer"],
    );

    // Seed prior-turn context.
    state.sessions.update("s1", |ctx| {
        ctx.last_turn_summary = Some(json!({
            "short_summary": "Discussed hamster breeders",
            "topic": "hamsters",
            "key_findings": ["HamsterHaus ships EU-wide"]
        }));
    });

    let outcome = run_turn(
        &state,
        TurnRequest {
            session_id: "s1".into(),
            query: "what were we just talking about and could you elaborate?".into(),
        },
    )
    .await
    .unwrap();

    // The gate must bypass without consulting any cache.
    let turn = TurnDirectory::open(&state.config.paths.transcripts_dir, &outcome.trace_id).unwrap();
    let decision = turn.read_json("cache_decision.json").unwrap();
    assert_eq!(decision["decision"], "proceed_to_plan");
    assert!(decision["reasoning"]
        .as_str()
        .unwrap()
        .to_lowercase()
        .contains("recall"));

    // Prior-turn summary made it into the context document.
    let context = turn.read_text("context.md").unwrap();
    assert!(context.contains("Discussed hamster breeders"));
    assert!(outcome.answer.contains("hamsters"));
}

#[tokio::test]
async fn retry_query_sets_is_retry_and_replans() {
    let root = tempfile::tempdir().unwrap();
    let tool_addr = spawn_tool_server().await;
    let (state, _planner, _coordinator) = build_state(
        &root,
        Some(tool_addr),
        &[
            REFLECT_PROCEED,
            PLAN_JSON,
            REFLECT_PROCEED,
            REFLECT_PROCEED,
            VERIFY_JSON,
            "Fresh results: HamsterHaus.",
            SUMMARY_JSON,
        ],
        &[
            "ACTION: TOOL_CALL\nCOMMAND: rerun the breeder search\nREASON: retry requested",
            r#"{"plan": [{"tool": "web.search", "args": {"query": "syrian hamster breeders"}}]}"#,
            "ACTION: DONE\nREASON: done",
        ],
    );

    state.sessions.update("s1", |ctx| {
        ctx.current_topic = Some("hamster breeders".into());
        ctx.record_action("find breeders", vec!["web.search".into()]);
    });

    let outcome = run_turn(
        &state,
        TurnRequest {
            session_id: "s1".into(),
            query: "retry that search".into(),
        },
    )
    .await
    .unwrap();

    let turn = TurnDirectory::open(&state.config.paths.transcripts_dir, &outcome.trace_id).unwrap();
    let decision = turn.read_json("cache_decision.json").unwrap();
    assert_eq!(decision["decision"], "proceed_to_plan");
    assert_eq!(decision["is_retry"], true);
    assert!(decision["reasoning"]
        .as_str()
        .unwrap()
        .contains("hamster breeders"));
    assert_eq!(outcome.status, "completed");
}

#[tokio::test]
async fn clarify_reflection_short_circuits() {
    let root = tempfile::tempdir().unwrap();
    let (state, planner, _coordinator) = build_state(
        &root,
        None,
        &["CONFIDENCE: 0.2\nREASON: far too vague\nDECISION: CLARIFY"],
        &[],
    );

    let outcome = run_turn(
        &state,
        TurnRequest {
            session_id: "s1".into(),
            query: "do the thing".into(),
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.status, "clarification");
    assert!(outcome.clarification.is_some());
    assert!(outcome.answer.contains("one question"));
    // Only the reflection call happened.
    assert_eq!(planner.call_count(), 1);

    // The turn is still sealed with an answer document.
    let turn = TurnDirectory::open(&state.config.paths.transcripts_dir, &outcome.trace_id).unwrap();
    assert!(turn.exists("answer.md"));
    assert!(turn.exists("manifest.json"));
}

#[tokio::test]
async fn tool_failures_open_the_category_circuit() {
    let root = tempfile::tempdir().unwrap();
    // No tool server: every web.* call fails at transport level.
    let (state, _planner, _coordinator) = build_state(
        &root,
        None,
        &[
            REFLECT_PROCEED,
            PLAN_JSON,
            REFLECT_PROCEED,
            REFLECT_PROCEED,
            VERIFY_JSON,
            "Nothing usable came back.",
            SUMMARY_JSON,
        ],
        &[
            "ACTION: TOOL_CALL\nCOMMAND: search 1\nREASON: r",
            r#"{"plan": [{"tool": "web.search", "args": {"query": "a"}}]}"#,
            "ACTION: TOOL_CALL\nCOMMAND: search 2\nREASON: r",
            r#"{"plan": [{"tool": "web.search", "args": {"query": "b"}}]}"#,
            "ACTION: TOOL_CALL\nCOMMAND: search 3\nREASON: r",
            r#"{"plan": [{"tool": "web.search", "args": {"query": "c"}}]}"#,
            "ACTION: TOOL_CALL\nCOMMAND: search 4\nREASON: r",
            r#"{"plan": [{"tool": "web.search", "args": {"query": "d"}}]}"#,
            "ACTION: DONE\nREASON: giving up",
        ],
    );

    let outcome = run_turn(
        &state,
        TurnRequest {
            session_id: "s1".into(),
            query: "find syrian hamster breeders online".into(),
        },
    )
    .await
    .unwrap();

    // Three transport failures open the `web` circuit; the fourth call was
    // skipped with a synthetic failure.
    assert_eq!(state.tool_breaker.state("web"), CircuitState::Open);

    // The pipeline still sealed the turn with an honest degraded answer.
    assert_eq!(outcome.status, "completed");
    let turn = TurnDirectory::open(&state.config.paths.transcripts_dir, &outcome.trace_id).unwrap();
    let bundle: cg_domain::bundle::RawBundle =
        serde_json::from_value(turn.read_json("bundle.json").unwrap()).unwrap();
    assert!(bundle.items.iter().any(|i| i
        .metadata
        .get("success")
        .and_then(|v| v.as_bool())
        == Some(false)));
}

#[tokio::test]
async fn over_budget_doc_pack_aborts_in_planning() {
    let root = tempfile::tempdir().unwrap();
    let (state, planner, _coordinator) = build_state(&root, None, &[REFLECT_PROCEED], &[]);

    // A planner recipe whose input-doc budget cannot hold the query.
    let recipes = root.path().join("recipes");
    let prompts = root.path().join("prompts/planner");
    std::fs::create_dir_all(&recipes).unwrap();
    std::fs::create_dir_all(&prompts).unwrap();
    std::fs::write(prompts.join("common.md"), "plan.\n").unwrap();
    std::fs::write(
        recipes.join("planner_chat.yaml"),
        r#"
name: planner_chat
role: planner
mode: chat
prompt_fragments:
  - planner/common.md
input_docs:
  - user_query.md
token_budget:
  total: 60
  prompt: 10
  input_docs: 20
  output: 20
  buffer: 10
"#,
    )
    .unwrap();

    let long_query = format!("please research {}", "market segment details ".repeat(30));
    let outcome = run_turn(
        &state,
        TurnRequest {
            session_id: "s1".into(),
            query: long_query,
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.status, "aborted");
    assert!(outcome.answer.contains("configuration limit"));
    // Planning never reached the LLM; only the reflection gate ran.
    assert_eq!(planner.call_count(), 1);

    // The abort is on the ledger and the turn is sealed.
    let events = state.ledger.read("s1").unwrap();
    assert!(events.iter().any(|e| e.event == "turn_aborted"));
    let turn = TurnDirectory::open(&state.config.paths.transcripts_dir, &outcome.trace_id).unwrap();
    assert!(turn.is_sealed());
}

#[tokio::test]
async fn second_request_on_same_session_waits_for_first() {
    let root = tempfile::tempdir().unwrap();
    let (state, _planner, _coordinator) = build_state(
        &root,
        None,
        &[
            // Both turns resolve as clarifications to stay tool-free.
            "CONFIDENCE: 0.2\nREASON: vague\nDECISION: CLARIFY",
            "CONFIDENCE: 0.2\nREASON: vague\nDECISION: CLARIFY",
        ],
        &[],
    );

    let state_a = state.clone();
    let state_b = state.clone();
    let first = tokio::spawn(async move {
        run_turn(
            &state_a,
            TurnRequest {
                session_id: "s1".into(),
                query: "do the thing".into(),
            },
        )
        .await
    });
    let second = tokio::spawn(async move {
        run_turn(
            &state_b,
            TurnRequest {
                session_id: "s1".into(),
                query: "do the other thing".into(),
            },
        )
        .await
    });

    let (a, b) = (first.await.unwrap().unwrap(), second.await.unwrap().unwrap());
    // Both completed; they got distinct turn directories.
    assert_ne!(a.trace_id, b.trace_id);
}
