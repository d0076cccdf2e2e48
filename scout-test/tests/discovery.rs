//! End-to-end discovery over real fixture trees.

use std::sync::Arc;
use std::time::Duration;

use scout_core::config::ScoutConfig;
use scout_core::error::FailureKind;
use scout_core::{DiscoveryError, Kind, Signature, SignatureInput};
use scout_lang::TestOptions;
use scout_test::{CALCULATOR_JS, CountingLoader, TestTree, init_tracing};
use tokio_util::sync::CancellationToken;

fn calculator_signature() -> SignatureInput {
    SignatureInput::named("Calculator")
        .kind(Kind::Class)
        .methods(["add", "subtract"])
}

#[tokio::test]
async fn source_file_beats_test_copy() -> anyhow::Result<()> {
    init_tracing();
    let tree = TestTree::calculator();
    let engine = tree.engine();

    let target = engine.discover_target(calculator_signature()).await?;
    assert!(target.metadata.path.ends_with("src/Calculator.js"));
    assert_eq!(target.full_name, "Calculator.Calculator");
    assert_eq!(target.metadata.language, "javascript");
    assert!(target.value.has_method("add"));
    assert!(target.value.has_method("subtract"));
    Ok(())
}

#[tokio::test]
async fn empty_tree_reports_no_match() {
    init_tracing();
    let tree = TestTree::empty();
    let err = tree
        .engine()
        .discover_target(calculator_signature())
        .await
        .unwrap_err();
    let DiscoveryError::NoMatch(report) = err else {
        panic!("expected NoMatch, got {err:?}");
    };
    assert!(report.candidates.is_empty());
    assert!(report.failures.is_empty());
    assert!(report.to_string().contains("Calculator"));
}

#[tokio::test]
async fn repeated_discovery_loads_once() -> anyhow::Result<()> {
    init_tracing();
    let tree = TestTree::calculator();
    let loader = CountingLoader::new();
    let engine = tree.engine_with_loader(ScoutConfig::default(), loader.clone());

    let first = engine.discover_target(calculator_signature()).await?;
    let second = engine.discover_target(calculator_signature()).await?;
    assert_eq!(first.full_name, second.full_name);
    assert_eq!(first.metadata.path, second.metadata.path);
    assert_eq!(loader.loads(), 1);
    Ok(())
}

#[tokio::test]
async fn equivalent_signatures_share_a_cache_entry() -> anyhow::Result<()> {
    init_tracing();
    let tree = TestTree::calculator();
    let loader = CountingLoader::new();
    let engine = tree.engine_with_loader(ScoutConfig::default(), loader.clone());

    engine.discover_target(calculator_signature()).await?;
    engine
        .discover_target(
            SignatureInput::named("Calculator")
                .kind(Kind::Class)
                .methods(["subtract", "add", "add"]),
        )
        .await?;
    assert_eq!(loader.loads(), 1);
    Ok(())
}

#[tokio::test]
async fn edited_file_is_reloaded() -> anyhow::Result<()> {
    init_tracing();
    let tree = TestTree::calculator();
    let loader = CountingLoader::new();
    let engine = tree.engine_with_loader(ScoutConfig::default(), loader.clone());

    engine.discover_target(calculator_signature()).await?;
    assert_eq!(loader.loads(), 1);

    tree.rewrite(
        "src/Calculator.js",
        "export class Calculator {\n  add(a, b) { return a + b; }\n  subtract(a, b) { return a - b; }\n  multiply(a, b) { return a * b; }\n}\n",
    );
    let target = engine.discover_target(calculator_signature()).await?;
    assert_eq!(loader.loads(), 2);
    assert!(target.value.has_method("multiply"));
    Ok(())
}

#[tokio::test]
async fn unsafe_edit_is_rejected_despite_cache() -> anyhow::Result<()> {
    init_tracing();
    let tree = TestTree::empty();
    tree.write("src/Calculator.js", CALCULATOR_JS);
    let loader = CountingLoader::new();
    let engine = tree.engine_with_loader(ScoutConfig::default(), loader.clone());

    engine.discover_target(calculator_signature()).await?;
    engine.flush().await;

    tree.rewrite(
        "src/Calculator.js",
        &format!("{CALCULATOR_JS}\nprocess.exit(1);\n"),
    );
    let err = engine
        .discover_target(calculator_signature())
        .await
        .unwrap_err();
    let DiscoveryError::NoMatch(report) = err else {
        panic!("expected NoMatch, got {err:?}");
    };
    assert!(report.failures.iter().any(|f| f.kind == FailureKind::Unsafe));
    assert_eq!(loader.loads(), 1);
    Ok(())
}

#[tokio::test]
async fn collection_never_loads_or_runs_code() -> anyhow::Result<()> {
    init_tracing();
    let tree = TestTree::calculator();
    tree.write(
        "src/side_effect.js",
        "require('fs').writeFileSync('MARKER', 'ran');\nexport class Calculator {}\n",
    );
    let loader = CountingLoader::new();
    let engine = tree.engine_with_loader(ScoutConfig::default(), loader.clone());

    let report = engine
        .collect_candidates(&Signature::normalize(calculator_signature()))
        .await?;
    assert!(!report.candidates.is_empty());
    assert_eq!(report.files_scanned, 4);
    assert_eq!(loader.loads(), 0);
    assert!(!tree.path().join("MARKER").exists());
    assert!(!tree.path().join("src/MARKER").exists());
    Ok(())
}

#[tokio::test]
async fn persistent_cache_survives_engine_restart() -> anyhow::Result<()> {
    init_tracing();
    let tree = TestTree::calculator();
    let first = tree.engine();
    let target = first.discover_target(calculator_signature()).await?;
    first.flush().await;
    drop(first);
    assert!(tree.path().join(".scout/cache.json").is_file());

    let loader = CountingLoader::new();
    let second = tree.engine_with_loader(ScoutConfig::default(), loader.clone());
    let cached = second.discover_target(calculator_signature()).await?;
    assert_eq!(cached.full_name, target.full_name);
    assert_eq!(cached.metadata.path, target.metadata.path);
    // Revalidation reloads the cached file only.
    assert_eq!(loader.loads(), 1);
    assert!(loader.paths().iter().all(|p| p.ends_with("src/Calculator.js")));

    second.discover_target(calculator_signature()).await?;
    assert_eq!(loader.loads(), 1);
    Ok(())
}

#[tokio::test]
async fn corrupt_cache_file_starts_empty() -> anyhow::Result<()> {
    init_tracing();
    let tree = TestTree::calculator();
    tree.write(".scout/cache.json", "{ not json");

    let engine = tree.engine();
    engine.discover_target(calculator_signature()).await?;
    engine.flush().await;

    let text = std::fs::read_to_string(tree.path().join(".scout/cache.json"))?;
    let saved: serde_json::Value = serde_json::from_str(&text)?;
    let key = Signature::normalize(calculator_signature()).cache_key();
    assert!(saved.get(&key).is_some());
    Ok(())
}

#[tokio::test]
async fn disabled_cache_writes_nothing() -> anyhow::Result<()> {
    init_tracing();
    let tree = TestTree::calculator();
    let mut config = ScoutConfig::default();
    config.cache.enabled = false;

    let engine = tree.engine_with(config);
    engine.discover_target(calculator_signature()).await?;
    engine.flush().await;
    assert!(!tree.path().join(".scout").exists());
    Ok(())
}

#[tokio::test]
async fn disabled_plugin_finds_nothing() {
    init_tracing();
    let tree = TestTree::calculator();
    let mut config = ScoutConfig::default();
    config.discovery.plugins.disabled = vec!["javascript".to_string()];

    let engine = tree.engine_with(config);
    assert!(engine.registry().get("javascript").is_none());
    let err = engine
        .discover_target(calculator_signature())
        .await
        .unwrap_err();
    let DiscoveryError::NoMatch(report) = err else {
        panic!("expected NoMatch, got {err:?}");
    };
    assert!(report.candidates.is_empty());
}

#[tokio::test]
async fn cancelled_discovery_returns_cancelled() {
    init_tracing();
    let tree = TestTree::calculator();
    let engine = tree.engine();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = engine
        .discover_target_with(calculator_signature(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::Cancelled));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_discoveries_load_once() -> anyhow::Result<()> {
    init_tracing();
    let tree = TestTree::calculator();
    let loader = CountingLoader::slow(Duration::from_millis(50));
    let engine = Arc::new(tree.engine_with_loader(ScoutConfig::default(), loader.clone()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.discover_target(calculator_signature()).await })
        })
        .collect();
    let mut names = Vec::new();
    for handle in handles {
        names.push(handle.await??.full_name.clone());
    }
    assert!(names.iter().all(|n| n == "Calculator.Calculator"));
    assert_eq!(loader.loads(), 1);
    Ok(())
}

#[tokio::test]
async fn module_signature_resolves_whole_module() -> anyhow::Result<()> {
    init_tracing();
    let tree = TestTree::empty();
    tree.write(
        "src/math.js",
        "export function add(a, b) { return a + b; }\nexport function subtract(a, b) { return a - b; }\n",
    );
    let engine = tree.engine();

    let target = engine
        .discover_target(SignatureInput::named("math").kind(Kind::Module).methods(["add"]))
        .await?;
    assert_eq!(target.full_name, "math");
    assert!(target.metadata.path.ends_with("src/math.js"));
    Ok(())
}

#[tokio::test]
async fn wrongly_named_class_in_matching_file_is_skipped() -> anyhow::Result<()> {
    init_tracing();
    let tree = TestTree::empty();
    tree.write(
        "src/Calculator.js",
        "export class Helper { add(a, b) { return a + b; } subtract(a, b) { return a - b; } }\n",
    );
    tree.write(
        "src/math.js",
        "export class Calculator { add(a, b) { return a + b; } subtract(a, b) { return a - b; } }\n",
    );

    let target = tree.engine().discover_target(calculator_signature()).await?;
    assert_eq!(target.name(), "Calculator");
    assert!(target.metadata.path.ends_with("src/math.js"));
    assert_eq!(target.full_name, "math.Calculator");
    Ok(())
}

#[tokio::test]
async fn pattern_names_match() -> anyhow::Result<()> {
    init_tracing();
    let tree = TestTree::calculator();
    let target = tree
        .engine()
        .discover_target(SignatureInput::named("/^Calc/").methods(["add"]))
        .await?;
    assert_eq!(target.name(), "Calculator");
    Ok(())
}

#[tokio::test]
async fn commonjs_default_export_resolves() -> anyhow::Result<()> {
    init_tracing();
    let tree = TestTree::empty();
    tree.write(
        "lib/Calculator.js",
        "class Calculator {\n  add(a, b) { return a + b; }\n}\nmodule.exports = Calculator;\n",
    );
    let target = tree
        .engine()
        .discover_target(SignatureInput::named("Calculator").methods(["add"]))
        .await?;
    assert!(target.metadata.path.ends_with("lib/Calculator.js"));
    assert!(target.value.has_method("add"));
    Ok(())
}

#[tokio::test]
async fn each_language_resolves_its_own_file() -> anyhow::Result<()> {
    init_tracing();
    let tree = TestTree::multi_lang();
    let engine = tree.engine();

    let cases = [
        ("typescript", "add", "web/Calculator.ts"),
        ("python", "add", "py/calculator.py"),
        ("rust", "add", "rust/src/calculator.rs"),
        ("go", "Add", "go/calc/calculator.go"),
    ];
    for (language, method, path) in cases {
        let target = engine
            .discover_target(
                SignatureInput::named("Calculator")
                    .methods([method])
                    .language(language),
            )
            .await?;
        assert!(
            target.metadata.path.ends_with(path),
            "{language}: resolved {}",
            target.metadata.path.display()
        );
        assert_eq!(target.metadata.language, language);
        assert!(target.value.has_method(method));
    }
    Ok(())
}

#[tokio::test]
async fn typescript_fields_are_properties() -> anyhow::Result<()> {
    init_tracing();
    let tree = TestTree::multi_lang();
    let target = tree
        .engine()
        .discover_target(
            SignatureInput::named("Calculator")
                .kind(Kind::Class)
                .properties(["total"])
                .language("typescript"),
        )
        .await?;
    assert!(target.value.has_property("total"));
    Ok(())
}

#[tokio::test]
async fn explain_shows_breakdowns_in_rank_order() -> anyhow::Result<()> {
    init_tracing();
    let tree = TestTree::calculator();
    let report = tree.engine().explain(calculator_signature()).await?;

    let scores: Vec<f64> = report.candidates.iter().map(|c| c.score).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    let top = &report.candidates[0];
    assert_eq!(top.relative_path, "src/Calculator.js");
    assert!((top.breakdown.total - top.score).abs() < f64::EPSILON);
    assert!(top.breakdown.methods > 0.0);
    Ok(())
}

#[tokio::test]
async fn invalidate_path_forces_reload() -> anyhow::Result<()> {
    init_tracing();
    let tree = TestTree::calculator();
    let loader = CountingLoader::new();
    let engine = tree.engine_with_loader(ScoutConfig::default(), loader.clone());

    let target = engine.discover_target(calculator_signature()).await?;
    engine.invalidate_path(&target.metadata.path).await;
    engine.discover_target(calculator_signature()).await?;
    assert_eq!(loader.loads(), 2);
    Ok(())
}

#[tokio::test]
async fn clear_cache_removes_cache_file() -> anyhow::Result<()> {
    init_tracing();
    let tree = TestTree::calculator();
    let loader = CountingLoader::new();
    let engine = tree.engine_with_loader(ScoutConfig::default(), loader.clone());

    engine.discover_target(calculator_signature()).await?;
    engine.flush().await;
    assert!(tree.path().join(".scout/cache.json").is_file());

    engine.clear_cache().await;
    assert!(!tree.path().join(".scout/cache.json").exists());
    engine.discover_target(calculator_signature()).await?;
    assert_eq!(loader.loads(), 2);
    Ok(())
}

#[tokio::test]
async fn resolved_target_scaffolds_a_test() -> anyhow::Result<()> {
    init_tracing();
    let tree = TestTree::calculator();
    let engine = tree.engine();
    let target = engine.discover_target(calculator_signature()).await?;

    let plugin = engine
        .registry()
        .get("javascript")
        .ok_or_else(|| anyhow::anyhow!("javascript plugin missing"))?;
    let content = plugin.generate_test_content(&target, &TestOptions::default());
    assert!(content.contains("Calculator"));
    assert!(content.contains("add"));
    Ok(())
}
