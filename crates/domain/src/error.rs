/// Shared error type used across all coggate crates.
///
/// The pipeline-specific variants map one-to-one onto the failure policies
/// the orchestrator applies at phase boundaries: contract violations abort a
/// phase, `CircuitOpen`/`Timeout` are soft failures the breaker accounts for,
/// `BudgetExceeded` is the single fatal doc-pack condition, and `Stale` cache
/// hits are downgraded to misses.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("LLM endpoint {endpoint}: {message}")]
    Endpoint { endpoint: String, message: String },

    #[error("contract violation in {component}: {detail}")]
    ContractViolation { component: String, detail: String },

    #[error("circuit open for {component} (last error: {})", .last_error.as_deref().unwrap_or("unknown"))]
    CircuitOpen {
        component: String,
        last_error: Option<String>,
    },

    #[error("doc pack over budget for recipe {recipe}: {needed} tokens > {budget} total")]
    BudgetExceeded {
        recipe: String,
        needed: usize,
        budget: usize,
    },

    #[error("blocked pending human intervention: {0}")]
    Blocked(String),

    #[error("stale cache entry: {0}")]
    Stale(String),

    #[error("recipe {0}: {1}")]
    Recipe(String, String),

    #[error("artifact missing: {0}")]
    ArtifactMissing(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("config: {0}")]
    Config(String),

    #[error("session is busy — a turn is already in progress")]
    SessionBusy,

    #[error("turn cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for failures the circuit breaker should count against a
    /// component (timeouts, endpoint errors, transport errors).
    pub fn counts_as_breaker_failure(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::Endpoint { .. } | Error::Http(_) | Error::Io(_)
        )
    }
}
