//! Token-budgeted assembly of a recipe's prompt fragments and input docs.

use std::path::{Path, PathBuf};

use serde::Serialize;

use cg_contracts::estimate_tokens;
use cg_domain::{Error, Result};

use crate::recipe::{DocSpec, PathType, Recipe, RecipeLoader, TrimMethod};
use crate::trim;

/// One realized input document.
#[derive(Debug, Clone, Serialize)]
pub struct DocPackItem {
    pub path: String,
    pub resolved: PathBuf,
    pub tokens: usize,
    pub raw_tokens: usize,
    pub trimmed: bool,
    pub missing: bool,
}

/// The realized, trimmed, budget-enforced bundle for one LLM call.
#[derive(Debug, Clone, Serialize)]
pub struct DocPack {
    pub recipe_name: String,
    pub prompt_text: String,
    pub prompt_tokens: usize,
    pub items: Vec<DocPackItem>,
    pub doc_tokens: usize,
    pub reserved_output_tokens: usize,
    pub total_budget: usize,
    /// Human-readable trimming log, one line per trimmed doc.
    pub trim_log: Vec<String>,
    /// Items that still exceeded their local cap after trimming.
    pub over_budget: Vec<String>,
    #[serde(skip)]
    doc_sections: Vec<(String, String)>,
}

impl DocPack {
    /// The final LLM input: prompt fragments, then each doc under a header.
    pub fn as_prompt(&self) -> String {
        let mut out = String::with_capacity(self.prompt_text.len() + 256);
        out.push_str(&self.prompt_text);
        for (name, content) in &self.doc_sections {
            out.push_str("\n\n=== INPUT_DOC: ");
            out.push_str(name);
            out.push_str(" ===\n");
            out.push_str(content);
        }
        out
    }

    pub fn total_tokens(&self) -> usize {
        self.prompt_tokens + self.doc_tokens + self.reserved_output_tokens
    }
}

/// Resolves doc specs against the turn/repo/session roots and enforces the
/// recipe budget.
pub struct DocPackBuilder {
    repo_root: PathBuf,
    session_root: PathBuf,
}

impl DocPackBuilder {
    pub fn new(repo_root: impl Into<PathBuf>, session_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            session_root: session_root.into(),
        }
    }

    fn resolve(&self, spec: &DocSpec, turn_dir: &Path) -> PathBuf {
        match spec.path_type {
            PathType::Turn => turn_dir.join(&spec.path),
            PathType::Repo => self.repo_root.join(&spec.path),
            PathType::Session => self.session_root.join(&spec.path),
            PathType::Absolute => PathBuf::from(&spec.path),
        }
    }

    /// Build the doc pack for `recipe` against `turn_dir`.
    ///
    /// Hard invariant: prompt tokens + post-trim doc tokens + reserved
    /// output tokens must not exceed the recipe's total budget. Violation is
    /// a fatal `BudgetExceeded` — callers narrow the recipe rather than
    /// silently truncating the prompt.
    pub fn build(&self, loader: &RecipeLoader, recipe: &Recipe, turn_dir: &Path) -> Result<DocPack> {
        let prompt_text = loader.prompt_text(recipe)?;
        let prompt_tokens = estimate_tokens(&prompt_text);

        let budget = recipe.token_budget.ok_or_else(|| {
            Error::Recipe(recipe.name.clone(), "recipe declares no token budget".into())
        })?;

        let default_trim = recipe
            .trimming_strategy
            .as_ref()
            .map(|t| t.method)
            .unwrap_or(TrimMethod::TruncateEnd);

        let mut items = Vec::new();
        let mut doc_sections = Vec::new();
        let mut trim_log = Vec::new();
        let mut over_budget = Vec::new();
        let mut doc_tokens = 0usize;

        for spec in &recipe.input_docs {
            let resolved = self.resolve(spec, turn_dir);
            let raw = match std::fs::read_to_string(&resolved) {
                Ok(content) => content,
                Err(_) if spec.optional => {
                    items.push(DocPackItem {
                        path: spec.path.clone(),
                        resolved,
                        tokens: 0,
                        raw_tokens: 0,
                        trimmed: false,
                        missing: true,
                    });
                    continue;
                }
                Err(e) => {
                    return Err(Error::Recipe(
                        recipe.name.clone(),
                        format!("required input doc missing: {} ({e})", resolved.display()),
                    ));
                }
            };

            let raw_tokens = estimate_tokens(&raw);
            let method = spec.trim_strategy.as_ref().map(|t| t.method).unwrap_or(default_trim);
            let (content, trimmed) = match spec.max_tokens {
                Some(cap) => trim::apply(method, &raw, cap),
                None => (raw, false),
            };
            let tokens = estimate_tokens(&content);

            if trimmed {
                trim_log.push(format!(
                    "{}: {raw_tokens} -> {tokens} tokens via {method:?}",
                    spec.path
                ));
            }
            if let Some(cap) = spec.max_tokens {
                if tokens > cap {
                    over_budget.push(spec.path.clone());
                }
            }

            doc_tokens += tokens;
            items.push(DocPackItem {
                path: spec.path.clone(),
                resolved,
                tokens,
                raw_tokens,
                trimmed,
                missing: false,
            });
            doc_sections.push((spec.path.clone(), content));
        }

        // Per-section budget checks feed the fatal total check.
        if doc_tokens > budget.input_docs {
            return Err(Error::BudgetExceeded {
                recipe: recipe.name.clone(),
                needed: doc_tokens,
                budget: budget.input_docs,
            });
        }
        let needed = prompt_tokens + doc_tokens + budget.output;
        if needed > budget.total {
            return Err(Error::BudgetExceeded {
                recipe: recipe.name.clone(),
                needed,
                budget: budget.total,
            });
        }

        Ok(DocPack {
            recipe_name: recipe.name.clone(),
            prompt_text,
            prompt_tokens,
            items,
            doc_tokens,
            reserved_output_tokens: budget.output,
            total_budget: budget.total,
            trim_log,
            over_budget,
            doc_sections,
        })
    }
}
