//! 导入解析策略
//!
//! [`ImportResolver`] 是流水线的可替换解析策略：给定一次修订的模块与样式表说明符，
//! 返回模块表和样式表列表。覆盖实现会完全替代默认的 CDN 解析。

use std::future::Future;

use futures_util::future::try_join;
use tracing::debug;

use super::module::{resolve_modules, ModuleLoadError, ModuleLoader, ResolvedModuleMap};
use super::normalize::CdnConfig;
use super::stylesheet::{load_style_sheets, StyleSheet, StyleSheetSource};

/// 一次解析的结果
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// 模块表
    pub modules: ResolvedModuleMap,
    /// 样式表，按声明顺序，失败项已剔除
    pub style_sheets: Vec<StyleSheet>,
}

/// 解析错误
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    /// 模块加载失败（整批失败）
    #[error("{source}")]
    Module {
        specifier: String,
        source: ModuleLoadError,
    },

    /// 自定义解析器报告的错误
    #[error("{0}")]
    Custom(String),
}

/// 导入解析策略
pub trait ImportResolver: Send + Sync + 'static {
    /// 解析一次修订的全部导入
    fn resolve(
        &self,
        modules: &[String],
        style_sheets: &[String],
    ) -> impl Future<Output = Result<Resolution, ResolveError>> + Send;
}

/// 默认解析策略：说明符经 CDN 规范化后交给加载器
///
/// 模块批与样式表批同时开始；模块批失败时立即失败，不等待样式表。
#[derive(Debug, Clone)]
pub struct CdnResolver<L> {
    loader: L,
    cdn: CdnConfig,
}

impl<L> CdnResolver<L> {
    /// 创建解析器
    pub fn new(
        loader: L,
        cdn: CdnConfig,
    ) -> Self {
        Self { loader, cdn }
    }

    pub fn cdn(&self) -> &CdnConfig {
        &self.cdn
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }
}

impl<L> ImportResolver for CdnResolver<L>
where
    L: ModuleLoader + StyleSheetSource + 'static,
{
    async fn resolve(
        &self,
        modules: &[String],
        style_sheets: &[String],
    ) -> Result<Resolution, ResolveError> {
        debug!(
            "resolving {} module(s), {} stylesheet(s)",
            modules.len(),
            style_sheets.len()
        );

        let (modules, style_sheets) = try_join(
            resolve_modules(&self.loader, &self.cdn, modules),
            async {
                Ok::<_, ResolveError>(load_style_sheets(&self.loader, &self.cdn, style_sheets).await)
            },
        )
        .await?;

        Ok(Resolution {
            modules,
            style_sheets,
        })
    }
}
