//! Pipeline behaviour through the public API

use std::collections::HashMap;

use yulan::resolve::{
    CdnConfig, CdnResolver, LoadedModule, ModuleLoadError, ModuleLoader, StyleSheetError,
    StyleSheetSource,
};
use yulan::runner::{Phase, Pipeline, PipelineOptions, RenderEntry, Settlement, StaticEvaluator};

const CDN: &str = "https://cdn.test/";

/// In-memory CDN
#[derive(Default)]
struct MemoryCdn {
    files: HashMap<String, String>,
}

impl MemoryCdn {
    fn with(
        mut self,
        specifier: &str,
        body: &str,
    ) -> Self {
        self.files
            .insert(format!("{CDN}{specifier}"), body.to_string());
        self
    }
}

impl ModuleLoader for MemoryCdn {
    async fn load(
        &self,
        url: &str,
    ) -> Result<LoadedModule, ModuleLoadError> {
        let body = self.files.get(url).ok_or_else(|| ModuleLoadError::Status {
            url: url.to_string(),
            status: 404,
        })?;
        LoadedModule::from_source(url, None, body.clone())
    }
}

impl StyleSheetSource for MemoryCdn {
    async fn fetch_text(
        &self,
        url: &str,
    ) -> Result<String, StyleSheetError> {
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| StyleSheetError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

fn pipeline(
    cdn: MemoryCdn,
    disable_cache: bool,
) -> Pipeline<CdnResolver<MemoryCdn>, StaticEvaluator> {
    let options = PipelineOptions {
        cdn: CdnConfig::with_base(CDN),
        disable_cache,
        ..PipelineOptions::default()
    };
    Pipeline::new(
        CdnResolver::new(cdn, options.cdn.clone()),
        StaticEvaluator::new(),
        options,
    )
}

fn memory_cdn() -> MemoryCdn {
    MemoryCdn::default()
        .with("react", "export default {}; export function createElement() {}")
        .with("react-dom", "export function render() {}")
        .with("theme.css", "body { margin: 0 }")
        .with("data.json", r#"{"items": [1, 2, 3]}"#)
}

#[tokio::test]
async fn test_editing_session() {
    let p = pipeline(memory_cdn(), false);
    let mut states = p.subscribe();

    // 1. 完整示例
    let settlement = p
        .run("import React from 'react'\nimport ReactDOM from 'react-dom'\nimport 'theme.css'\n\nReactDOM.render(<h1>Hi</h1>, root)")
        .await;
    assert_eq!(settlement, Settlement::Published(Phase::Rendered));
    let rendered = states.borrow_and_update().clone();
    assert_eq!(rendered.element.as_ref().unwrap().entry, RenderEntry::RenderCall);
    assert_eq!(rendered.style_sheets.len(), 1);
    assert_eq!(p.adopted_style_sheets().hrefs(), vec!["https://cdn.test/theme.css"]);

    // 2. 输入到一半的代码
    p.run("import React from 'react'\nexport default () => <h1>{").await;
    let errored = p.state();
    assert_eq!(errored.phase(), Phase::Errored);
    assert_eq!(errored.element, rendered.element);
    assert_eq!(errored.style_sheets, rendered.style_sheets);

    // 3. 拼错的包名
    p.run("import React from 'raect'").await;
    let errored = p.state();
    assert_eq!(
        errored.error.as_deref(),
        Some("TypeError: Failed to fetch dynamically imported module: raect (HTTP 404)")
    );
    assert_eq!(errored.element, rendered.element);

    // 4. 修好之后
    p.run("import data from 'data.json'\nexport default () => data.items.length").await;
    let fixed = p.state();
    assert_eq!(fixed.phase(), Phase::Rendered);
    assert_eq!(fixed.element.unwrap().bindings, vec!["data"]);
    assert!(fixed.style_sheets.is_empty());
    assert!(p.adopted_style_sheets().is_empty());
}

#[tokio::test]
async fn test_disable_cache_session() {
    let p = pipeline(memory_cdn(), true);

    p.run("import 'theme.css'\nexport default () => <p/>").await;
    assert_eq!(p.state().style_sheets.len(), 1);

    p.run("import { missing } from 'react'").await;
    let state = p.state();
    assert_eq!(
        state.error.as_deref(),
        Some("SyntaxError: The requested module 'react' does not provide an export named 'missing'")
    );
    assert_eq!(state.element, None);
    assert!(state.style_sheets.is_empty());
}

#[tokio::test]
async fn test_rapid_edits_settle_on_latest() {
    let p = pipeline(memory_cdn(), false);

    let handles: Vec<_> = [
        "import React from 'react'\nexport default 1",
        "import React from 'react'\nexport default 12",
        "import React from 'react'\nexport default 123",
    ]
    .iter()
    .map(|code| p.submit(code))
    .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    let state = p.state();
    assert_eq!(state.revision, 3);
    assert_eq!(state.phase(), Phase::Rendered);
    assert_eq!(&*state.element.unwrap().code, "import React from 'react'\nexport default 123");
}
