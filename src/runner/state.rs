//! 流水线状态
//!
//! [`PipelineState`] 是对外可观察的唯一状态；[`Snapshot`] 是最近一次成功渲染的保留值，
//! 只用于在加载中与出错时填充占位内容；[`AdoptedStyleSheets`] 是当前采用的样式表集合。

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use super::evaluate::RenderedNode;
use crate::resolve::StyleSheet;

/// 状态机阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Loading,
    Rendered,
    Errored,
}

impl std::fmt::Display for Phase {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Loading => write!(f, "loading"),
            Phase::Rendered => write!(f, "rendered"),
            Phase::Errored => write!(f, "errored"),
        }
    }
}

/// 对外发布的状态
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineState {
    /// 产生该状态的修订号，0 表示尚未处理任何修订
    pub revision: u64,
    pub is_loading: bool,
    pub element: Option<RenderedNode>,
    pub style_sheets: Vec<StyleSheet>,
    pub error: Option<String>,
}

impl PipelineState {
    /// 加载中，内容为占位值
    pub fn loading(
        revision: u64,
        placeholders: Snapshot,
    ) -> Self {
        Self {
            revision,
            is_loading: true,
            element: placeholders.element,
            style_sheets: placeholders.style_sheets,
            error: None,
        }
    }

    /// 渲染成功
    pub fn rendered(
        revision: u64,
        element: RenderedNode,
        style_sheets: Vec<StyleSheet>,
    ) -> Self {
        Self {
            revision,
            is_loading: false,
            element: Some(element),
            style_sheets,
            error: None,
        }
    }

    /// 出错，内容为占位值
    pub fn errored(
        revision: u64,
        error: String,
        placeholders: Snapshot,
    ) -> Self {
        Self {
            revision,
            is_loading: false,
            element: placeholders.element,
            style_sheets: placeholders.style_sheets,
            error: Some(error),
        }
    }

    /// 当前阶段
    pub fn phase(&self) -> Phase {
        if self.is_loading {
            Phase::Loading
        } else if self.error.is_some() {
            Phase::Errored
        } else if self.revision == 0 {
            Phase::Idle
        } else {
            Phase::Rendered
        }
    }
}

/// 保留快照：最近一次成功渲染的元素与样式表
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub element: Option<RenderedNode>,
    pub style_sheets: Vec<StyleSheet>,
}

impl Snapshot {
    /// 占位内容；关闭保留时为空
    pub fn placeholders(
        &self,
        disable_cache: bool,
    ) -> Snapshot {
        if disable_cache {
            Snapshot::default()
        } else {
            self.clone()
        }
    }
}

/// 当前采用的样式表集合
///
/// 宿主环境通过 [`AdoptedStyleSheets::current`] 读取；只有流水线会调用 `replace`。
#[derive(Debug, Clone, Default)]
pub struct AdoptedStyleSheets {
    inner: Arc<RwLock<Vec<StyleSheet>>>,
}

impl AdoptedStyleSheets {
    pub fn new() -> Self {
        Self::default()
    }

    /// 整体替换
    pub(crate) fn replace(
        &self,
        sheets: Vec<StyleSheet>,
    ) {
        *self.inner.write() = sheets;
    }

    /// 当前集合的拷贝
    pub fn current(&self) -> Vec<StyleSheet> {
        self.inner.read().clone()
    }

    /// 当前集合的 href 列表
    pub fn hrefs(&self) -> Vec<String> {
        self.inner
            .read()
            .iter()
            .map(|sheet| sheet.href().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
