//! 流水线测试
//!
//! 加载器与求值器都是确定性的假实现；`oneshot` 门控用来控制修订的结算顺序。
//! `#[tokio::test]` 使用单线程运行时，`submit` 之后、第一次 `.await` 之前任务不会运行。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::*;
use crate::resolve::{
    CdnConfig, CdnResolver, ImportResolver, LoadedModule, ModuleLoadError, ModuleLoader,
    Resolution, ResolveError, StyleSheetError, StyleSheetSource, DEFAULT_MODULE_CDN,
};

#[derive(Default)]
struct FakeLoader {
    modules: HashMap<String, LoadedModule>,
    sheets: HashMap<String, Result<String, u16>>,
    gates: Mutex<HashMap<String, oneshot::Receiver<()>>>,
    requested: Arc<Mutex<Vec<String>>>,
}

fn url(specifier: &str) -> String {
    format!("{}{}", DEFAULT_MODULE_CDN, specifier)
}

impl FakeLoader {
    fn module(
        mut self,
        specifier: &str,
        source: &str,
    ) -> Self {
        let url = url(specifier);
        let loaded = LoadedModule::from_source(&url, None, source.to_string()).unwrap();
        self.modules.insert(url, loaded);
        self
    }

    fn sheet(
        mut self,
        specifier: &str,
        response: Result<&str, u16>,
    ) -> Self {
        self.sheets
            .insert(url(specifier), response.map(str::to_string));
        self
    }

    /// 该说明符的加载会阻塞到返回的 Sender 被触发
    fn gate(
        self,
        specifier: &str,
    ) -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().insert(url(specifier), rx);
        (self, tx)
    }

    async fn wait_gate(
        &self,
        url: &str,
    ) {
        self.requested.lock().push(url.to_string());
        let gate = self.gates.lock().remove(url);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
    }
}

impl ModuleLoader for FakeLoader {
    async fn load(
        &self,
        url: &str,
    ) -> Result<LoadedModule, ModuleLoadError> {
        self.wait_gate(url).await;
        self.modules
            .get(url)
            .cloned()
            .ok_or_else(|| ModuleLoadError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

impl StyleSheetSource for FakeLoader {
    async fn fetch_text(
        &self,
        url: &str,
    ) -> Result<String, StyleSheetError> {
        self.wait_gate(url).await;
        match self.sheets.get(url) {
            Some(Ok(text)) => Ok(text.clone()),
            Some(Err(status)) => Err(StyleSheetError::Status {
                url: url.to_string(),
                status: *status,
            }),
            None => Err(StyleSheetError::Fetch {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            }),
        }
    }
}

/// 记录每次调用的静态求值器
#[derive(Clone, Default)]
struct Recording {
    calls: Arc<Mutex<Vec<(String, Vec<String>)>>>,
}

impl Recording {
    fn count(&self) -> usize {
        self.calls.lock().len()
    }

    fn last_code(&self) -> Option<String> {
        self.calls.lock().last().map(|(code, _)| code.clone())
    }
}

impl Evaluator for Recording {
    async fn evaluate(
        &self,
        code: &str,
        scope: &ExecutionScope,
    ) -> Result<RenderedNode, EvalError> {
        let keys = scope.keys().into_iter().map(str::to_string).collect();
        self.calls.lock().push((code.to_string(), keys));
        StaticEvaluator.check(code, scope)
    }
}

type TestPipeline = Pipeline<CdnResolver<FakeLoader>, Recording>;

fn pipeline(
    loader: FakeLoader,
    disable_cache: bool,
) -> (TestPipeline, Recording) {
    let evaluator = Recording::default();
    let options = PipelineOptions {
        disable_cache,
        ..PipelineOptions::default()
    };
    let resolver = CdnResolver::new(loader, CdnConfig::default());
    (Pipeline::new(resolver, evaluator.clone(), options), evaluator)
}

const LEFT_PAD: &str = "export const x = 1;\nexport default function leftPad() {}";

#[tokio::test]
async fn test_initial_state_is_idle() {
    let (p, _) = pipeline(FakeLoader::default(), false);
    let state = p.state();
    assert_eq!(state.phase(), Phase::Idle);
    assert_eq!(state.element, None);
    assert!(state.style_sheets.is_empty());
    assert_eq!(p.latest_revision(), 0);
}

#[tokio::test]
async fn test_import_free_code_skips_loading() {
    let (p, evaluator) = pipeline(FakeLoader::default(), false);
    let mut rx = p.subscribe();

    let handle = p.submit("export default () => <div>Hi</div>");
    assert!(!rx.has_changed().unwrap());
    assert_eq!(p.state().phase(), Phase::Idle);

    assert_eq!(handle.await.unwrap(), Settlement::Published(Phase::Rendered));
    let state = p.state();
    assert_eq!(state.error, None);
    assert!(!state.is_loading);
    assert_eq!(state.element.unwrap().entry, RenderEntry::DefaultExport);
    assert_eq!(evaluator.count(), 1);
}

#[tokio::test]
async fn test_module_import_scenario() {
    let loader = FakeLoader::default().module("left-pad", LEFT_PAD);
    let requested = Arc::clone(&loader.requested);
    let (p, _) = pipeline(loader, false);
    let mut rx = p.subscribe();

    let handle = p.submit("import { x } from 'left-pad'\nexport default () => x");
    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().phase(), Phase::Loading);

    assert_eq!(handle.await.unwrap(), Settlement::Published(Phase::Rendered));
    assert_eq!(*requested.lock(), vec!["https://cdn.skypack.dev/left-pad"]);

    let state = p.state();
    assert_eq!(state.error, None);
    let element = state.element.unwrap();
    assert_eq!(element.bindings, vec!["x"]);
    assert_eq!(element.modules, vec!["left-pad"]);
}

#[tokio::test]
async fn test_code_is_trimmed() {
    let loader = FakeLoader::default().module("left-pad", LEFT_PAD);
    let (p, evaluator) = pipeline(loader, false);

    let settlement = p
        .run("\n\n   import leftPad from 'left-pad'\nexport default leftPad   \n")
        .await;
    assert_eq!(settlement, Settlement::Published(Phase::Rendered));
    assert_eq!(
        evaluator.last_code().unwrap(),
        "import leftPad from 'left-pad'\nexport default leftPad"
    );
}

#[tokio::test]
async fn test_module_batch_is_all_or_nothing() {
    let loader = FakeLoader::default().module("left-pad", LEFT_PAD);
    let (p, evaluator) = pipeline(loader, false);

    let code = "import { x } from 'left-pad'\nimport y from 'missing'\nexport default () => x";
    assert_eq!(p.run(code).await, Settlement::Published(Phase::Errored));

    let state = p.state();
    assert_eq!(state.element, None);
    assert!(state.error.is_some());
    assert_eq!(evaluator.count(), 0);
}

#[tokio::test]
async fn test_nonexistent_package_error_has_no_cdn_prefix() {
    let (p, _) = pipeline(FakeLoader::default(), false);

    p.run("import x from 'definitely-not-a-real-package-xyz'").await;

    let state = p.state();
    assert_eq!(state.phase(), Phase::Errored);
    let error = state.error.unwrap();
    assert!(!error.contains(DEFAULT_MODULE_CDN), "{error}");
    assert_eq!(
        error,
        "TypeError: Failed to fetch dynamically imported module: definitely-not-a-real-package-xyz (HTTP 404)"
    );
}

#[tokio::test]
async fn test_failed_stylesheet_still_renders() {
    let loader = FakeLoader::default().sheet("./a.css", Err(404));
    let (p, _) = pipeline(loader, false);

    let settlement = p.run("import './a.css'\nexport default () => <div/>").await;
    assert_eq!(settlement, Settlement::Published(Phase::Rendered));

    let state = p.state();
    assert!(state.style_sheets.is_empty());
    assert!(state.element.is_some());
    assert_eq!(state.error, None);
}

#[tokio::test]
async fn test_stylesheet_batch_keeps_n_minus_one() {
    let loader = FakeLoader::default()
        .sheet("a.css", Ok("a { color: red }"))
        .sheet("b.css", Ok("b {"))
        .sheet("c.css", Ok("c { color: blue }"));
    let (p, _) = pipeline(loader, false);

    let code = "import 'a.css'\nimport 'b.css'\nimport 'c.css'\nexport default () => <p/>";
    assert_eq!(p.run(code).await, Settlement::Published(Phase::Rendered));

    let hrefs: Vec<_> = p
        .state()
        .style_sheets
        .iter()
        .map(|s| s.href().to_string())
        .collect();
    assert_eq!(
        hrefs,
        vec![url("a.css"), url("c.css")]
    );
    assert_eq!(p.adopted_style_sheets().hrefs(), hrefs);
}

#[tokio::test]
async fn test_style_imports_stripped_before_evaluation() {
    let loader = FakeLoader::default().sheet("a.css", Ok("a {}"));
    let (p, evaluator) = pipeline(loader, false);

    p.run("import 'a.css'\nexport default 1").await;
    assert_eq!(evaluator.last_code().unwrap(), "\nexport default 1");
}

#[tokio::test]
async fn test_errors_fall_back_to_retained_snapshot() {
    let loader = FakeLoader::default().sheet("a.css", Ok("a { color: red }"));
    let (p, _) = pipeline(loader, false);

    p.run("import 'a.css'\nexport default () => <a/>").await;
    let rendered = p.state();
    assert_eq!(rendered.phase(), Phase::Rendered);

    // 求值失败
    p.run("export default () => {").await;
    let errored = p.state();
    assert_eq!(errored.phase(), Phase::Errored);
    assert_eq!(errored.element, rendered.element);
    assert_eq!(errored.style_sheets, rendered.style_sheets);
    assert_eq!(
        errored.error.as_deref(),
        Some("SyntaxError: Unexpected end of input (1:23)")
    );

    // 解析失败
    p.run("import x from 'missing'").await;
    let errored = p.state();
    assert_eq!(errored.phase(), Phase::Errored);
    assert_eq!(errored.element, rendered.element);
    assert_eq!(p.adopted_style_sheets().len(), 1);
}

#[tokio::test]
async fn test_disable_cache_clears_placeholders() {
    let loader = FakeLoader::default()
        .module("left-pad", LEFT_PAD)
        .sheet("a.css", Ok("a {}"));
    let (p, _) = pipeline(loader, true);

    p.run("import 'a.css'\nexport default () => <a/>").await;
    assert!(p.state().element.is_some());

    let mut rx = p.subscribe();
    let handle = p.submit("import { x } from 'left-pad'\nexport default () => x(");
    let loading = rx.borrow_and_update().clone();
    assert_eq!(loading.phase(), Phase::Loading);
    assert_eq!(loading.element, None);
    assert!(loading.style_sheets.is_empty());

    assert_eq!(handle.await.unwrap(), Settlement::Published(Phase::Errored));
    let errored = p.state();
    assert_eq!(errored.element, None);
    assert!(errored.style_sheets.is_empty());
    assert!(p.adopted_style_sheets().is_empty());
}

#[tokio::test]
async fn test_loading_keeps_previous_element() {
    let (loader, release) = FakeLoader::default()
        .module("left-pad", LEFT_PAD)
        .gate("left-pad");
    let (p, _) = pipeline(loader, false);

    p.run("export default () => <p/>").await;
    let rendered = p.state().element;

    let handle = p.submit("import { x } from 'left-pad'\nexport default () => x");
    let loading = p.state();
    assert!(loading.is_loading);
    assert_eq!(loading.element, rendered);
    assert_eq!(loading.error, None);

    release.send(()).unwrap();
    assert_eq!(handle.await.unwrap(), Settlement::Published(Phase::Rendered));
}

#[tokio::test]
async fn test_stale_revision_is_discarded() {
    let (loader, release) = FakeLoader::default()
        .module("slow", "export const slow = 1;")
        .gate("slow");
    let (p, evaluator) = pipeline(loader, false);

    let first = p.submit("import { slow } from 'slow'\nexport default () => slow");
    let second = p.submit("export default () => <p>newer</p>");

    assert_eq!(second.await.unwrap(), Settlement::Published(Phase::Rendered));
    release.send(()).unwrap();
    assert_eq!(first.await.unwrap(), Settlement::Discarded);

    let state = p.state();
    assert_eq!(state.revision, 2);
    assert_eq!(state.phase(), Phase::Rendered);
    assert_eq!(evaluator.count(), 1);
    assert_eq!(
        evaluator.last_code().unwrap(),
        "export default () => <p>newer</p>"
    );
}

#[tokio::test]
async fn test_stale_resolution_error_is_discarded() {
    let (loader, release) = FakeLoader::default().gate("gone");
    let (p, _) = pipeline(loader, false);

    let first = p.submit("import gone from 'gone'");
    let second = p.submit("export default 2");

    assert_eq!(second.await.unwrap(), Settlement::Published(Phase::Rendered));
    release.send(()).unwrap();
    assert_eq!(first.await.unwrap(), Settlement::Discarded);
    assert_eq!(p.state().error, None);
}

#[tokio::test]
async fn test_set_disable_cache_reruns_latest() {
    let (p, evaluator) = pipeline(FakeLoader::default(), false);
    assert!(p.set_disable_cache(false).is_none());

    p.run("export default () => <p/>").await;
    p.run("export default () => (").await;
    assert!(p.state().element.is_some());
    assert_eq!(evaluator.count(), 2);

    let rerun = p.set_disable_cache(true).unwrap();
    assert_eq!(rerun.await.unwrap(), Settlement::Published(Phase::Errored));
    assert!(p.disable_cache());
    assert_eq!(p.state().element, None);
    assert_eq!(evaluator.count(), 3);

    assert!(p.set_disable_cache(true).is_none());
}

#[tokio::test]
async fn test_set_base_scope_applies_on_next_settle() {
    let (p, evaluator) = pipeline(FakeLoader::default(), false);

    let mut scope = BaseScope::new();
    scope.insert("title".to_string(), serde_json::json!("Hi"));
    p.set_base_scope(scope);
    assert_eq!(p.latest_revision(), 0);

    p.run("export default title").await;
    let calls = evaluator.calls.lock();
    assert_eq!(calls[0].1, vec!["title", "import"]);
}

#[tokio::test]
async fn test_legacy_render_rewrite() {
    let loader = FakeLoader::default()
        .module("react-dom", "export function render() {}")
        .module("react", "export default {};");
    let (p, evaluator) = pipeline(loader, false);

    let code = "import React from 'react'\nimport ReactDOM from 'react-dom'\nReactDOM.render(<App />, root)";
    assert_eq!(p.run(code).await, Settlement::Published(Phase::Rendered));

    assert!(evaluator
        .last_code()
        .unwrap()
        .ends_with("\nrender(<App />, root)"));
    assert_eq!(p.state().element.unwrap().entry, RenderEntry::RenderCall);
}

/// 覆盖默认解析策略
struct FixedResolver(Result<(), String>);

impl ImportResolver for FixedResolver {
    async fn resolve(
        &self,
        modules: &[String],
        _style_sheets: &[String],
    ) -> Result<Resolution, ResolveError> {
        match &self.0 {
            Ok(()) => Ok(Resolution {
                modules: modules
                    .iter()
                    .map(|m| (m.clone(), crate::resolve::ModuleNamespace::new(m.clone())))
                    .collect(),
                style_sheets: Vec::new(),
            }),
            Err(message) => Err(ResolveError::Custom(message.clone())),
        }
    }
}

#[tokio::test]
async fn test_custom_resolver() {
    let p = Pipeline::new(
        FixedResolver(Ok(())),
        StaticEvaluator,
        PipelineOptions::default(),
    );
    assert_eq!(
        p.run("import anything from 'anything'\nexport default anything").await,
        Settlement::Published(Phase::Rendered)
    );

    let p = Pipeline::new(
        FixedResolver(Err("no route to https://cdn.skypack.dev/pkg".to_string())),
        StaticEvaluator,
        PipelineOptions::default(),
    );
    p.run("import pkg from 'pkg'").await;
    assert_eq!(p.state().error.as_deref(), Some("no route to pkg"));
}

/// 求值时 panic 的求值器
struct Panicking;

impl Evaluator for Panicking {
    async fn evaluate(
        &self,
        _code: &str,
        _scope: &ExecutionScope,
    ) -> Result<RenderedNode, EvalError> {
        panic!("render blew up")
    }
}

#[tokio::test]
async fn test_evaluator_panic_becomes_error_state() {
    let loader = FakeLoader::default().module("left-pad", LEFT_PAD);
    let p = Pipeline::new(
        CdnResolver::new(loader, CdnConfig::default()),
        Panicking,
        PipelineOptions::default(),
    );

    let settlement = p.run("import { x } from 'left-pad'\nexport default () => x").await;
    assert_eq!(settlement, Settlement::Published(Phase::Errored));

    let state = p.state();
    assert!(!state.is_loading);
    assert_eq!(state.error.as_deref(), Some("Error: render blew up"));

    // 评估锁已释放，后续修订照常结算
    assert_eq!(
        p.run("export default 1").await,
        Settlement::Published(Phase::Errored)
    );
    assert_eq!(p.state().revision, 2);
}
