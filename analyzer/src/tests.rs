// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fnv::FnvHashMap;
use parking_lot::Mutex;
use python_ast::{Assignment, DottedName, Expr, ImportStmt, ImportedModule, Module as Ast, Stmt};
use task_executor::Executor;

use crate::{
    AnalysisCache, AnalysisError, Analyzer, AnalyzerOptions, Diagnostic, Evaluator, GlobalScope, HostServices,
    ImportResolution, IntrinsicModules, Linter, ModuleAnalysis, ModuleKey, ModuleLoader, ModuleType, PathResolver,
    ProgressReporter, PyModule, ResolvedModule, Severity,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

///
/// Resolves every dotted name to a module under /src, mirroring how test modules are laid out.
///
struct TestResolver;

impl PathResolver for TestResolver {
    fn find_imports(&self, _importer: Option<&Path>, names: &[String], _force_absolute: bool) -> Option<ImportResolution> {
        let full_name = names.join(".");
        Some(ImportResolution::Module(ResolvedModule {
            module_path: Some(PathBuf::from(format!("/src/{full_name}.py"))),
            full_name,
            is_typeshed: false,
        }))
    }
}

#[derive(Default)]
struct TestLoader {
    modules: Mutex<FnvHashMap<String, Arc<PyModule>>>,
}

impl ModuleLoader for TestLoader {
    fn get_or_load(&self, name: &str, _is_typeshed: bool) -> Option<Arc<PyModule>> {
        self.modules.lock().get(name).cloned()
    }
}

///
/// Records every evaluation (in start order) and tracks the peak number of concurrently live
/// evaluations.
///
struct ScriptedEvaluator {
    delay: Mutex<Duration>,
    runs: Mutex<Vec<String>>,
    live: AtomicUsize,
    max_live: AtomicUsize,
}

impl ScriptedEvaluator {
    fn new() -> ScriptedEvaluator {
        ScriptedEvaluator {
            delay: Mutex::new(Duration::ZERO),
            runs: Mutex::new(Vec::new()),
            live: AtomicUsize::new(0),
            max_live: AtomicUsize::new(0),
        }
    }

    fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    fn runs(&self) -> Vec<String> {
        self.runs.lock().clone()
    }

    fn clear_runs(&self) {
        self.runs.lock().clear();
    }
}

#[async_trait]
impl Evaluator for ScriptedEvaluator {
    async fn evaluate(&self, module: &PyModule, _ast: &Ast) -> Result<Arc<GlobalScope>, AnalysisError> {
        self.runs.lock().push(module.name.clone());
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
        Ok(Arc::new(GlobalScope::new(vec![format!("{}_scope", module.name)])))
    }
}

#[derive(Default)]
struct MemoryCache {
    scopes: Mutex<FnvHashMap<String, Arc<GlobalScope>>>,
    stores: AtomicUsize,
}

#[async_trait]
impl AnalysisCache for MemoryCache {
    fn exists(&self, name: &str, _file_path: Option<&Path>) -> bool {
        self.scopes.lock().contains_key(name)
    }

    async fn restore(&self, module: &PyModule) -> Option<Arc<GlobalScope>> {
        self.scopes.lock().get(&module.name).cloned()
    }

    async fn store(&self, analysis: &ModuleAnalysis) {
        self.scopes.lock().insert(analysis.key.name().to_owned(), analysis.scope.clone());
        self.stores.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RecordingProgress {
    reports: Mutex<Vec<usize>>,
}

impl ProgressReporter for RecordingProgress {
    fn report_remaining(&self, remaining: usize) {
        self.reports.lock().push(remaining);
    }
}

struct TestLinter;

impl Linter for TestLinter {
    fn lint(&self, module: &PyModule, _analysis: &ModuleAnalysis) -> Vec<Diagnostic> {
        vec![Diagnostic {
            severity: Severity::Warning,
            message: format!("{} has lint", module.name),
        }]
    }
}

struct Fixture {
    analyzer: Analyzer,
    evaluator: Arc<ScriptedEvaluator>,
    cache: Option<Arc<MemoryCache>>,
    progress: Arc<RecordingProgress>,
    loader: Arc<TestLoader>,
}

impl Fixture {
    fn new(with_cache: bool, max_tasks: usize) -> Fixture {
        Fixture::new_configured(with_cache, max_tasks, |_| {})
    }

    fn new_configured(with_cache: bool, max_tasks: usize, configure: impl FnOnce(&mut AnalyzerOptions)) -> Fixture {
        init_logging();
        let evaluator = Arc::new(ScriptedEvaluator::new());
        let cache = if with_cache { Some(Arc::new(MemoryCache::default())) } else { None };
        let progress = Arc::new(RecordingProgress::default());
        let loader = Arc::new(TestLoader::default());

        let mut options = AnalyzerOptions::new();
        options.max_tasks = max_tasks;
        configure(&mut options);
        let analyzer = Analyzer::new(
            Executor::new(),
            HostServices {
                resolver: Arc::new(TestResolver),
                loader: loader.clone(),
                evaluator: evaluator.clone(),
                cache: cache.clone().map(|c| c as Arc<dyn AnalysisCache>),
                progress: progress.clone(),
                linter: Some(Arc::new(TestLinter)),
            },
            IntrinsicModules::new(),
            options,
        );
        Fixture {
            analyzer,
            evaluator,
            cache,
            progress,
            loader,
        }
    }
}

fn module(name: &str, module_type: ModuleType) -> Arc<PyModule> {
    Arc::new(PyModule::new(name, Some(PathBuf::from(format!("/src/{name}.py"))), module_type))
}

fn key(name: &str) -> ModuleKey {
    ModuleKey::new(name, Some(PathBuf::from(format!("/src/{name}.py"))), false)
}

fn ast_importing(imports: &[&str]) -> Arc<Ast> {
    let mut body: Vec<Stmt> = imports
        .iter()
        .map(|import| {
            Stmt::Import(ImportStmt {
                names: vec![ImportedModule {
                    name: DottedName::parse(import),
                    alias: None,
                }],
            })
        })
        .collect();
    body.push(Stmt::Assignment(Assignment {
        targets: vec![Expr::Name("VALUE".to_owned())],
        value: Expr::Str("v".to_owned()),
    }));
    Arc::new(Ast::new(body))
}

#[tokio::test(flavor = "multi_thread")]
async fn single_module_reaches_steady_state() {
    let fixture = Fixture::new(false, 2);
    let mut events = fixture.analyzer.subscribe_complete();

    fixture.analyzer.enqueue(module("m", ModuleType::User), ast_importing(&[]), 0);
    fixture.analyzer.wait_for_complete().await;

    let analysis = fixture.analyzer.get_analysis(&key("m"), None).await.unwrap();
    assert_eq!(analysis.version, 0);
    assert_eq!(analysis.scope.names, vec!["m_scope".to_owned()]);
    assert!(fixture.evaluator.runs().contains(&"m".to_owned()));

    let event = events.recv().await.unwrap();
    assert_eq!(event.modules, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn edit_reanalyzes_dependents_in_order() {
    // Sequential workers, so the emission order is observable through the evaluator.
    let fixture = Fixture::new(false, 1);

    // Leaves first, so no import is ever missing: c, then b (imports c), then a (imports b).
    fixture.analyzer.enqueue(module("c", ModuleType::Library), ast_importing(&[]), 0);
    fixture.analyzer.enqueue(module("b", ModuleType::Library), ast_importing(&["c"]), 0);
    fixture.analyzer.enqueue(module("a", ModuleType::Library), ast_importing(&["b"]), 0);
    fixture.analyzer.wait_for_complete().await;

    // Editing c re-analyzes exactly the chain, dependencies before dependents.
    fixture.evaluator.clear_runs();
    fixture.analyzer.enqueue(module("c", ModuleType::Library), ast_importing(&[]), 1);
    fixture.analyzer.wait_for_complete().await;
    assert_eq!(fixture.evaluator.runs(), vec!["c".to_owned(), "b".to_owned(), "a".to_owned()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn short_wait_returns_previous_analysis() {
    let fixture = Fixture::new(false, 2);
    fixture.evaluator.set_delay(Duration::from_millis(300));
    fixture.analyzer.enqueue(module("m", ModuleType::User), ast_importing(&[]), 0);

    // The analysis is still pending: a short wait falls back to the empty sentinel.
    let analysis = fixture.analyzer.get_analysis(&key("m"), Some(Duration::from_millis(10))).await.unwrap();
    assert!(analysis.is_empty_sentinel());

    // An unbounded wait observes the completed analysis.
    let analysis = fixture.analyzer.get_analysis(&key("m"), None).await.unwrap();
    assert_eq!(analysis.version, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn the_latest_edit_wins() {
    let fixture = Fixture::new(false, 2);
    fixture.evaluator.set_delay(Duration::from_millis(100));

    let m = module("m", ModuleType::User);
    fixture.analyzer.enqueue(m.clone(), ast_importing(&[]), 1);
    fixture.analyzer.enqueue(m.clone(), ast_importing(&[]), 2);
    fixture.analyzer.wait_for_complete().await;

    // Exactly one write landed, carrying the newer version.
    let entry = fixture.analyzer.entry(&key("m")).unwrap();
    assert_eq!(entry.run_count(), 1);
    let analysis = fixture.analyzer.get_analysis(&key("m"), None).await.unwrap();
    assert_eq!(analysis.version, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_buffer_versions_are_dropped() {
    let fixture = Fixture::new(false, 2);
    let m = module("m", ModuleType::User);
    fixture.analyzer.enqueue(m.clone(), ast_importing(&[]), 5);
    fixture.analyzer.wait_for_complete().await;
    let version_before = fixture.analyzer.graph_version();

    // An older (or equal) buffer version does not touch the graph.
    fixture.analyzer.enqueue(m.clone(), ast_importing(&[]), 5);
    fixture.analyzer.enqueue(m.clone(), ast_importing(&[]), 4);
    assert_eq!(fixture.analyzer.graph_version(), version_before);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_modules_load_and_recover() {
    let fixture = Fixture::new(false, 2);
    let y = module("y", ModuleType::Library);
    fixture.loader.modules.lock().insert("y".to_owned(), y.clone());

    // x imports y before y exists: x still analyzes, and the kicked load materializes y's
    // vertex so the key resolves in a later snapshot.
    fixture.analyzer.enqueue(module("x", ModuleType::Library), ast_importing(&["y"]), 0);
    for _ in 0..100 {
        if fixture.analyzer.entry(&key("y")).is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(fixture.analyzer.entry(&key("y")).is_some(), "the loader was never kicked");
    let x = fixture.analyzer.get_analysis(&key("x"), None).await.unwrap();
    assert_eq!(x.version, 0);

    // The host then enqueues y's AST: y analyzes, x re-analyzes, and the steady state arrives.
    fixture.analyzer.enqueue(y, ast_importing(&[]), 0);
    fixture.analyzer.wait_for_complete().await;
    let runs = fixture.evaluator.runs();
    assert!(runs.contains(&"y".to_owned()));
    assert!(runs.iter().filter(|name| *name == "x").count() >= 2, "x was not re-analyzed: {runs:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn import_cycles_reach_steady_state() {
    let fixture = Fixture::new(false, 2);
    let a = module("a", ModuleType::Library);
    let b = module("b", ModuleType::Library);
    fixture.loader.modules.lock().insert("a".to_owned(), a.clone());
    fixture.loader.modules.lock().insert("b".to_owned(), b.clone());

    fixture.analyzer.enqueue(a, ast_importing(&["b"]), 0);
    fixture.analyzer.enqueue(b, ast_importing(&["a"]), 0);
    fixture.analyzer.wait_for_complete().await;

    let a = fixture.analyzer.get_analysis(&key("a"), None).await.unwrap();
    let b = fixture.analyzer.get_analysis(&key("b"), None).await.unwrap();
    assert_eq!(a.version, 0);
    assert_eq!(b.version, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn library_analyses_round_trip_through_the_cache() {
    let fixture = Fixture::new(true, 2);
    let cache = fixture.cache.as_ref().unwrap();

    fixture.analyzer.enqueue(module("lib", ModuleType::Library), ast_importing(&[]), 0);
    fixture.analyzer.wait_for_complete().await;
    assert_eq!(cache.stores.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.evaluator.runs(), vec!["lib".to_owned()]);

    // The AST was downgraded to an import skeleton once the analysis was safely stored.
    let entry = fixture.analyzer.entry(&key("lib")).unwrap();
    assert!(entry.ast().unwrap().body.is_empty());

    // After a reset, the module restores from the cache without re-evaluating, and the
    // restored scope is observably equal to the original.
    let original = fixture.analyzer.get_analysis(&key("lib"), None).await.unwrap().scope.clone();
    fixture.analyzer.reset();
    fixture.analyzer.enqueue(module("lib", ModuleType::Library), ast_importing(&[]), 0);
    fixture.analyzer.wait_for_complete().await;
    assert_eq!(fixture.evaluator.runs(), vec!["lib".to_owned()], "the evaluator ran again");
    let restored = fixture.analyzer.get_analysis(&key("lib"), None).await.unwrap().scope.clone();
    assert_eq!(restored, original);
}

#[tokio::test(flavor = "multi_thread")]
async fn open_documents_are_not_cached() {
    let fixture = Fixture::new(true, 2);
    let cache = fixture.cache.as_ref().unwrap();
    fixture.evaluator.set_delay(Duration::from_millis(100));

    fixture.analyzer.enqueue(module("lib", ModuleType::Library), ast_importing(&[]), 0);
    fixture.analyzer.open_document(&key("lib"));
    fixture.analyzer.wait_for_complete().await;

    // An open library neither persists nor loses its full AST.
    assert_eq!(cache.stores.load(Ordering::SeqCst), 0);
    let entry = fixture.analyzer.entry(&key("lib")).unwrap();
    assert!(!entry.ast().unwrap().body.is_empty());

    // Once the document closes, the next analysis persists as usual.
    fixture.analyzer.close_document(&key("lib"));
    fixture.analyzer.enqueue(module("lib", ModuleType::Library), ast_importing(&[]), 1);
    fixture.analyzer.wait_for_complete().await;
    assert_eq!(cache.stores.load(Ordering::SeqCst), 1);
    assert!(entry.ast().unwrap().body.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn default_wait_applies_when_no_explicit_timeout() {
    let fixture = Fixture::new_configured(false, 2, |options| {
        options.default_get_analysis_timeout = Some(Duration::from_millis(10));
    });
    fixture.evaluator.set_delay(Duration::from_millis(300));
    fixture.analyzer.enqueue(module("m", ModuleType::User), ast_importing(&[]), 0);

    // No explicit wait: the configured default elapses and falls back to the sentinel.
    let analysis = fixture.analyzer.get_analysis(&key("m"), None).await.unwrap();
    assert!(analysis.is_empty_sentinel());

    // An explicit wait overrides the default.
    let analysis = fixture.analyzer.get_analysis(&key("m"), Some(Duration::from_secs(5))).await.unwrap();
    assert_eq!(analysis.version, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn cycle_members_restore_from_cache_without_evaluation() {
    let fixture = Fixture::new(true, 2);
    let cache = fixture.cache.as_ref().unwrap();
    let seeded = Arc::new(GlobalScope::new(vec!["cached_b".to_owned()]));
    cache.scopes.lock().insert("b".to_owned(), seeded.clone());

    let a = module("a", ModuleType::Library);
    let b = module("b", ModuleType::Library);
    fixture.loader.modules.lock().insert("a".to_owned(), a.clone());
    fixture.loader.modules.lock().insert("b".to_owned(), b.clone());

    fixture.analyzer.enqueue(a, ast_importing(&["b"]), 0);
    fixture.analyzer.enqueue(b, ast_importing(&["a"]), 0);
    fixture.analyzer.wait_for_complete().await;

    // Both of b's passes restored from the cache: the evaluator never saw it.
    assert!(!fixture.evaluator.runs().contains(&"b".to_owned()));
    let restored = fixture.analyzer.get_analysis(&key("b"), None).await.unwrap();
    assert_eq!(restored.scope, seeded);
}

#[tokio::test(flavor = "multi_thread")]
async fn invalidate_resets_the_completion_handle() {
    let fixture = Fixture::new(false, 2);
    fixture.analyzer.enqueue(module("m", ModuleType::User), ast_importing(&[]), 0);
    fixture.analyzer.wait_for_complete().await;

    // After invalidation the handle is pending again, so a short wait falls back to the last
    // completed analysis.
    fixture.analyzer.invalidate(&key("m"));
    let analysis = fixture.analyzer.get_analysis(&key("m"), Some(Duration::from_millis(10))).await.unwrap();
    assert_eq!(analysis.version, 0);

    fixture.analyzer.remove(&key("m"));
    assert!(fixture.analyzer.entry(&key("m")).is_none());
    assert!(fixture.analyzer.get_analysis(&key("m"), None).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn user_modules_are_not_cached() {
    let fixture = Fixture::new(true, 2);
    let cache = fixture.cache.as_ref().unwrap();
    fixture.analyzer.enqueue(module("m", ModuleType::User), ast_importing(&[]), 0);
    fixture.analyzer.wait_for_complete().await;
    assert_eq!(cache.stores.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn workers_respect_the_task_bound() {
    let fixture = Fixture::new(false, 2);
    fixture.evaluator.set_delay(Duration::from_millis(20));

    // Independent libraries, leaves only: a wide ready set from the first emission.
    for i in 0..12 {
        fixture.analyzer.enqueue(module(&format!("m{i}"), ModuleType::Library), ast_importing(&[]), 0);
    }
    fixture.analyzer.wait_for_complete().await;

    assert!(
        fixture.evaluator.max_live.load(Ordering::SeqCst) <= 2,
        "observed more live evaluations than the configured bound"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn lint_is_empty_for_non_user_modules() {
    let fixture = Fixture::new(false, 2);
    fixture.analyzer.enqueue(module("user", ModuleType::User), ast_importing(&[]), 0);
    fixture.analyzer.enqueue(module("lib", ModuleType::Library), ast_importing(&[]), 0);
    fixture.analyzer.wait_for_complete().await;

    assert_eq!(fixture.analyzer.lint(&key("user")).len(), 1);
    assert!(fixture.analyzer.lint(&key("lib")).is_empty());
    assert!(fixture.analyzer.lint(&key("unknown")).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_keeps_typeshed_entries() {
    let fixture = Fixture::new(false, 2);
    let stub = Arc::new(PyModule::new("s", Some(PathBuf::from("/ts/s.pyi")), ModuleType::Stub));
    fixture.analyzer.enqueue(module("m", ModuleType::User), ast_importing(&[]), 0);
    fixture.analyzer.enqueue(stub.clone(), ast_importing(&[]), 0);
    fixture.analyzer.wait_for_complete().await;

    fixture.analyzer.reset();
    assert!(fixture.analyzer.entry(&key("m")).is_none());
    assert!(fixture.analyzer.entry(&ModuleKey::for_module(&stub)).is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn dispose_unblocks_waiters_with_cancellation() {
    let fixture = Fixture::new(false, 2);
    fixture.evaluator.set_delay(Duration::from_secs(5));
    fixture.analyzer.enqueue(module("m", ModuleType::User), ast_importing(&[]), 0);

    let waiter = {
        let analyzer = fixture.analyzer.clone();
        tokio::spawn(async move { analyzer.get_analysis(&key("m"), None).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    fixture.analyzer.dispose();
    assert_eq!(waiter.await.unwrap(), Err(AnalysisError::Cancelled));
}

#[tokio::test(flavor = "multi_thread")]
async fn progress_reports_zero_on_completion() {
    let fixture = Fixture::new(false, 2);
    fixture.analyzer.enqueue(module("a", ModuleType::Library), ast_importing(&[]), 0);
    fixture.analyzer.wait_for_complete().await;

    let reports = fixture.progress.reports.lock().clone();
    assert!(!reports.is_empty());
    assert_eq!(*reports.last().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn explicit_dependency_sets_rewire_the_graph() {
    let fixture = Fixture::new(false, 2);
    fixture.analyzer.enqueue(module("y", ModuleType::Library), ast_importing(&[]), 0);
    fixture.analyzer.enqueue(module("x", ModuleType::Library), ast_importing(&[]), 0);
    fixture.analyzer.wait_for_complete().await;
    fixture.evaluator.clear_runs();

    // x now depends on y without a new AST; an edit to y re-walks x.
    fixture.analyzer.enqueue_with_dependencies(module("x", ModuleType::Library), vec![key("y")]);
    fixture.analyzer.wait_for_complete().await;
    fixture.evaluator.clear_runs();

    fixture.analyzer.enqueue(module("y", ModuleType::Library), ast_importing(&[]), 1);
    fixture.analyzer.wait_for_complete().await;
    assert_eq!(fixture.evaluator.runs(), vec!["y".to_owned(), "x".to_owned()]);
}
