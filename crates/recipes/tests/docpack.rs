//! Recipe loading + doc-pack building against a real temp filesystem.

use std::path::Path;

use cg_domain::Error;
use cg_recipes::{DocPackBuilder, RecipeLoader};

/// Lay down a prompts dir, a recipes dir, and a turn dir.
struct Fixture {
    _root: tempfile::TempDir,
    loader: RecipeLoader,
    builder: DocPackBuilder,
    turn_dir: std::path::PathBuf,
}

fn write(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn fixture(recipe_yaml: &str) -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let recipes = root.path().join("recipes");
    let prompts = root.path().join("prompts");
    let turn_dir = root.path().join("turn");
    std::fs::create_dir_all(&turn_dir).unwrap();

    write(&prompts.join("planner/common.md"), "You are the planner.\n");
    write(&recipes.join("planner_chat.yaml"), recipe_yaml);

    let loader = RecipeLoader::new(&recipes, &prompts);
    let builder = DocPackBuilder::new(root.path(), root.path().join("session"));
    Fixture {
        _root: root,
        loader,
        builder,
        turn_dir,
    }
}

const BASIC_RECIPE: &str = r#"
name: planner_chat
role: planner
mode: chat
prompt_fragments:
  - planner/common.md
input_docs:
  - user_query.md
  - "context.md (optional, max 100 tokens)"
output_docs:
  - plan.json
token_budget:
  total: 4000
  prompt: 1000
  input_docs: 2000
  output: 800
  buffer: 200
"#;

#[test]
fn loads_and_builds_within_budget() {
    let f = fixture(BASIC_RECIPE);
    write(&f.turn_dir.join("user_query.md"), "find hamster breeders");
    write(&f.turn_dir.join("context.md"), "prior context here");

    let recipe = f.loader.select("planner", "chat", None).unwrap();
    assert_eq!(recipe.name, "planner_chat");

    let pack = f.builder.build(&f.loader, &recipe, &f.turn_dir).unwrap();
    assert!(pack.total_tokens() <= 4000);
    let prompt = pack.as_prompt();
    assert!(prompt.contains("You are the planner."));
    assert!(prompt.contains("INPUT_DOC: user_query.md"));
    assert!(prompt.contains("find hamster breeders"));
    assert!(pack.over_budget.is_empty());
}

#[test]
fn missing_required_doc_fails_missing_optional_skips() {
    let f = fixture(BASIC_RECIPE);
    // No user_query.md at all.
    let recipe = f.loader.load("planner_chat").unwrap();
    assert!(f.builder.build(&f.loader, &recipe, &f.turn_dir).is_err());

    // Required present, optional absent: fine.
    write(&f.turn_dir.join("user_query.md"), "query");
    let pack = f.builder.build(&f.loader, &recipe, &f.turn_dir).unwrap();
    let context_item = pack.items.iter().find(|i| i.path == "context.md").unwrap();
    assert!(context_item.missing);
}

#[test]
fn over_cap_doc_is_trimmed_with_log() {
    let f = fixture(BASIC_RECIPE);
    write(&f.turn_dir.join("user_query.md"), "query");
    // 100-token cap = 400 chars; write well past it.
    write(&f.turn_dir.join("context.md"), &"context line.\n".repeat(100));

    let recipe = f.loader.load("planner_chat").unwrap();
    let pack = f.builder.build(&f.loader, &recipe, &f.turn_dir).unwrap();
    let item = pack.items.iter().find(|i| i.path == "context.md").unwrap();
    assert!(item.trimmed);
    assert!(item.tokens <= 110); // cap plus the marker overhead
    assert_eq!(pack.trim_log.len(), 1);
}

const TIGHT_RECIPE: &str = r#"
name: planner_chat
role: planner
mode: chat
prompt_fragments:
  - planner/common.md
input_docs:
  - user_query.md
output_docs:
  - plan.json
token_budget:
  total: 60
  prompt: 10
  input_docs: 20
  output: 20
  buffer: 10
"#;

#[test]
fn over_budget_after_trim_is_fatal() {
    let f = fixture(TIGHT_RECIPE);
    // No per-doc cap, so nothing trims and the doc blows the input_docs
    // section budget.
    write(&f.turn_dir.join("user_query.md"), &"word ".repeat(100));

    let recipe = f.loader.load("planner_chat").unwrap();
    let err = f.builder.build(&f.loader, &recipe, &f.turn_dir).unwrap_err();
    assert!(matches!(err, Error::BudgetExceeded { .. }));
}

const BAD_BUDGET_RECIPE: &str = r#"
name: planner_chat
role: planner
mode: chat
prompt_fragments:
  - planner/common.md
token_budget:
  total: 4000
  prompt: 1000
  input_docs: 2000
  output: 800
  buffer: 100
"#;

#[test]
fn budget_sum_mismatch_rejected_at_load() {
    let f = fixture(BAD_BUDGET_RECIPE);
    assert!(f.loader.load("planner_chat").is_err());
}

#[test]
fn missing_prompt_fragment_rejected_at_load() {
    let f = fixture(
        r#"
name: planner_chat
role: planner
prompt_fragments:
  - planner/does_not_exist.md
token_budget:
  total: 100
  prompt: 50
  input_docs: 0
  output: 50
  buffer: 0
"#,
    );
    assert!(f.loader.load("planner_chat").is_err());
}
