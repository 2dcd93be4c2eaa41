//! 依赖解析
//!
//! 从用户源码中扫描 import 声明，把说明符映射到 CDN 地址，并发加载模块与样式表。
//!
//! # 模块结构
//!
//! - [`extract`] - 逐行词法扫描 import 声明
//! - [`normalize`] - 说明符 → 可加载 URL
//! - [`module`] - 模块加载与 interop 规范化
//! - [`stylesheet`] - 样式表加载（CSS 模块导入 + fetch 回退）
//! - [`http`] - 基于 reqwest 的默认加载器
//! - [`resolver`] - 组合以上步骤的 [`ImportResolver`]
//!
//! # 数据流
//!
//! ```text
//! SourceText → extract → normalize → (module ∥ stylesheet) → Resolution
//! ```

pub mod extract;
pub mod http;
pub mod module;
pub mod normalize;
pub mod resolver;
pub mod stylesheet;

pub use extract::{extract_declarations, extract_imports, ExtractedImports};
pub use http::HttpLoader;
pub use module::{
    interop, resolve_modules, Export, LoadedModule, ModuleLoadError, ModuleLoader,
    ModuleNamespace, OpaqueValue, ResolvedModuleMap,
};
pub use normalize::{CdnConfig, DEFAULT_MODULE_CDN, DEFAULT_STYLE_CDN};
pub use resolver::{CdnResolver, ImportResolver, Resolution, ResolveError};
pub use stylesheet::{
    load_style_sheet, load_style_sheets, CssImportError, StyleSheet, StyleSheetError,
    StyleSheetSource,
};

use serde::Serialize;

/// import 声明类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportKind {
    /// `import x from 'pkg'`
    Module,
    /// `import './style.css'`（仅副作用）
    Stylesheet,
}

impl std::fmt::Display for ImportKind {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            ImportKind::Module => f.pad("module"),
            ImportKind::Stylesheet => f.pad("stylesheet"),
        }
    }
}

/// 从源码中提取的一条 import 声明
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportDeclaration {
    /// 声明类型
    pub kind: ImportKind,
    /// 源码中原样书写的说明符
    pub specifier: String,
}
