//! YAML recipe loading, validation, and role-based selection.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use cg_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Budget
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Token budget declared by a recipe. The four parts must sum exactly to
/// `total`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenBudget {
    pub total: usize,
    pub prompt: usize,
    pub input_docs: usize,
    pub output: usize,
    #[serde(default)]
    pub buffer: usize,
}

impl TokenBudget {
    pub fn validate(&self, recipe_name: &str) -> Result<()> {
        let allocated = self.prompt + self.input_docs + self.output + self.buffer;
        if allocated != self.total {
            return Err(Error::Recipe(
                recipe_name.to_owned(),
                format!(
                    "token budget does not add up: total={}, allocated={} \
                     (prompt={} + input_docs={} + output={} + buffer={})",
                    self.total, allocated, self.prompt, self.input_docs, self.output, self.buffer
                ),
            ));
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Doc specs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where a doc path is resolved from.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PathType {
    /// Relative to the current turn directory.
    #[default]
    Turn,
    /// Relative to the repository/deployment root.
    Repo,
    /// Relative to the session's memory directory.
    Session,
    /// Absolute filesystem path.
    Absolute,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrimMethod {
    TruncateEnd,
    TruncateStart,
    DropOldest,
    Summarize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrimStrategy {
    pub method: TrimMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<usize>,
}

/// One input document declared by a recipe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocSpec {
    pub path: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub path_type: PathType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trim_strategy: Option<TrimStrategy>,
}

impl DocSpec {
    /// Parse the legacy string format:
    /// `"context.md"`, `"context.md (optional)"`,
    /// `"context.md (optional, max 400 tokens)"`.
    pub fn from_string(spec: &str) -> Self {
        let mut path = spec.trim().to_owned();
        let mut optional = false;
        let mut max_tokens = None;

        if let Some(open) = path.find('(') {
            let annotation = path[open + 1..].trim_end_matches(')').to_lowercase();
            path = path[..open].trim().to_owned();
            if annotation.contains("optional") {
                optional = true;
            }
            if annotation.contains("max") {
                if let Some(n) = annotation
                    .split(|c: char| !c.is_ascii_digit())
                    .find(|s| !s.is_empty())
                    .and_then(|s| s.parse().ok())
                {
                    max_tokens = Some(n);
                }
            }
        }

        Self {
            path,
            optional,
            max_tokens,
            path_type: PathType::Turn,
            trim_strategy: None,
        }
    }
}

/// Both accepted YAML shapes for an input doc.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDocSpec {
    Legacy(String),
    Structured(DocSpec),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Recipe
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentLoopSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub max_steps: Option<usize>,
    #[serde(default)]
    pub tools_per_step: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recipe {
    pub name: String,
    pub role: String,
    pub phase: Option<String>,
    pub mode: Option<String>,
    pub prompt_fragments: Vec<String>,
    pub input_docs: Vec<DocSpec>,
    pub output_docs: Vec<String>,
    pub token_budget: Option<TokenBudget>,
    pub trimming_strategy: Option<TrimStrategy>,
    pub agent_loop: Option<AgentLoopSpec>,
}

#[derive(Debug, Deserialize)]
struct RawRecipe {
    name: Option<String>,
    role: String,
    phase: Option<String>,
    mode: Option<String>,
    #[serde(default)]
    prompt_fragments: Vec<String>,
    #[serde(default)]
    input_docs: Vec<RawDocSpec>,
    #[serde(default)]
    output_docs: Vec<String>,
    token_budget: Option<TokenBudget>,
    trimming_strategy: Option<TrimStrategy>,
    agent_loop: Option<AgentLoopSpec>,
}

impl Recipe {
    /// Prompt-fragment paths with any trailing token annotation stripped
    /// (`"planner/common.md (290 tokens)"` → `planner/common.md`).
    pub fn prompt_fragment_paths(&self) -> Vec<PathBuf> {
        self.prompt_fragments
            .iter()
            .map(|f| PathBuf::from(f.split('(').next().unwrap_or(f).trim()))
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loader & selection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Roles with one unified recipe (no mode suffix).
const UNIFIED_ROLES: &[&str] = &["context_builder", "reflection", "verifier", "summarizer", "researcher"];
/// Roles with `_chat` / `_code` variants.
const MODE_SPECIFIC_ROLES: &[&str] = &["planner", "executor", "coordinator", "synthesizer"];
/// Roles that may have content-type-specialized variants.
const CONTENT_TYPE_ROLES: &[&str] = &["planner", "synthesizer"];

/// Legacy role aliases kept for compatibility with older recipes.
fn canonical_role(role: &str) -> &str {
    match role {
        "guide" | "guide_strategic" => "planner",
        "guide_synthesis" => "synthesizer",
        "context_manager" => "verifier",
        "turn_summarizer" => "summarizer",
        "research" => "researcher",
        "meta_reflection" => "reflection",
        other => other,
    }
}

pub struct RecipeLoader {
    recipes_dir: PathBuf,
    prompts_dir: PathBuf,
    /// Loaded recipes are immutable; cache them for the process lifetime.
    cache: parking_lot::RwLock<HashMap<String, Recipe>>,
}

impl RecipeLoader {
    pub fn new(recipes_dir: impl Into<PathBuf>, prompts_dir: impl Into<PathBuf>) -> Self {
        Self {
            recipes_dir: recipes_dir.into(),
            prompts_dir: prompts_dir.into(),
            cache: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    pub fn prompts_dir(&self) -> &Path {
        &self.prompts_dir
    }

    /// Load a recipe by file name (without extension), validating budget
    /// sums and prompt-fragment existence.
    pub fn load(&self, name: &str) -> Result<Recipe> {
        if let Some(hit) = self.cache.read().get(name) {
            return Ok(hit.clone());
        }

        let path = self.recipes_dir.join(format!("{name}.yaml"));
        if !path.exists() {
            return Err(Error::Recipe(name.to_owned(), "recipe not found".into()));
        }

        let raw_text = std::fs::read_to_string(&path)?;
        let raw: RawRecipe = serde_yaml::from_str(&raw_text)
            .map_err(|e| Error::Recipe(name.to_owned(), format!("invalid YAML: {e}")))?;

        let input_docs = raw
            .input_docs
            .into_iter()
            .map(|d| match d {
                RawDocSpec::Legacy(s) => DocSpec::from_string(&s),
                RawDocSpec::Structured(spec) => spec,
            })
            .collect();

        let recipe = Recipe {
            name: raw.name.unwrap_or_else(|| name.to_owned()),
            role: raw.role,
            phase: raw.phase,
            mode: raw.mode,
            prompt_fragments: raw.prompt_fragments,
            input_docs,
            output_docs: raw.output_docs,
            token_budget: raw.token_budget,
            trimming_strategy: raw.trimming_strategy,
            agent_loop: raw.agent_loop,
        };

        self.validate(&recipe)?;
        tracing::info!(
            recipe = recipe.name,
            role = recipe.role,
            budget = recipe.token_budget.map(|b| b.total).unwrap_or(0),
            "recipe loaded"
        );
        self.cache.write().insert(name.to_owned(), recipe.clone());
        Ok(recipe)
    }

    fn validate(&self, recipe: &Recipe) -> Result<()> {
        if recipe.role.trim().is_empty() {
            return Err(Error::Recipe(recipe.name.clone(), "missing role".into()));
        }
        if let Some(budget) = &recipe.token_budget {
            budget.validate(&recipe.name)?;
        }
        for fragment in recipe.prompt_fragment_paths() {
            let resolved = self.resolve_fragment(&fragment);
            if !resolved.exists() {
                return Err(Error::Recipe(
                    recipe.name.clone(),
                    format!("prompt fragment not found: {}", resolved.display()),
                ));
            }
        }
        Ok(())
    }

    /// Fragments resolve relative to the prompts dir unless absolute.
    pub fn resolve_fragment(&self, fragment: &Path) -> PathBuf {
        if fragment.is_absolute() {
            fragment.to_path_buf()
        } else {
            self.prompts_dir.join(fragment)
        }
    }

    /// Read and join all prompt fragments of a recipe.
    pub fn prompt_text(&self, recipe: &Recipe) -> Result<String> {
        let mut parts = Vec::new();
        for fragment in recipe.prompt_fragment_paths() {
            parts.push(std::fs::read_to_string(self.resolve_fragment(&fragment))?);
        }
        Ok(parts.join("\n\n"))
    }

    /// Select a recipe by `(role, mode, content_type)`.
    ///
    /// Content-type-specialized variants (`planner_chat_electronics`) are
    /// tried first for the roles that support them, falling back to the
    /// unspecialized `<role>_<mode>`; unified roles ignore the mode.
    pub fn select(&self, role: &str, mode: &str, content_type: Option<&str>) -> Result<Recipe> {
        let role = canonical_role(role);

        if UNIFIED_ROLES.contains(&role) {
            return self.load(role);
        }

        if MODE_SPECIFIC_ROLES.contains(&role) {
            let base = format!("{role}_{mode}");
            if let Some(ct) = content_type.filter(|c| *c != "general") {
                if CONTENT_TYPE_ROLES.contains(&role) {
                    let specialized = format!("{base}_{ct}");
                    match self.load(&specialized) {
                        Ok(recipe) => return Ok(recipe),
                        Err(_) => {
                            tracing::info!(
                                specialized,
                                fallback = base,
                                "content-type recipe not found; falling back"
                            );
                        }
                    }
                }
            }
            return self.load(&base);
        }

        // Unknown role: direct lookup.
        self.load(role)
    }

    pub fn list(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.recipes_dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let path = e.path();
                if path.extension().is_some_and(|ext| ext == "yaml") {
                    path.file_stem().map(|s| s.to_string_lossy().into_owned())
                } else {
                    None
                }
            })
            .filter(|n| n != "README")
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_string_formats() {
        let plain = DocSpec::from_string("user_query.md");
        assert_eq!(plain.path, "user_query.md");
        assert!(!plain.optional);
        assert_eq!(plain.max_tokens, None);

        let optional = DocSpec::from_string("context.md (optional)");
        assert!(optional.optional);

        let full = DocSpec::from_string("context.md (optional, max 400 tokens)");
        assert!(full.optional);
        assert_eq!(full.max_tokens, Some(400));
        assert_eq!(full.path, "context.md");
    }

    #[test]
    fn budget_must_sum_exactly() {
        let good = TokenBudget {
            total: 4000,
            prompt: 1000,
            input_docs: 2000,
            output: 800,
            buffer: 200,
        };
        assert!(good.validate("r").is_ok());

        let bad = TokenBudget {
            total: 4000,
            prompt: 1000,
            input_docs: 2000,
            output: 800,
            buffer: 100,
        };
        assert!(bad.validate("r").is_err());
    }

    #[test]
    fn aliases_resolve_to_canonical_roles() {
        assert_eq!(canonical_role("guide"), "planner");
        assert_eq!(canonical_role("context_manager"), "verifier");
        assert_eq!(canonical_role("planner"), "planner");
    }
}
