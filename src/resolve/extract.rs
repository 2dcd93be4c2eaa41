//! import 声明提取
//!
//! 纯词法、按行锚定的扫描，不构建 AST。只识别两种形式：
//!
//! - `import <绑定> from '<说明符>'`（模块）
//! - `import '<说明符>.css'`（样式表，仅副作用）
//!
//! 动态 `import()`、`export ... from` 重导出和跨多行的导入列表都不会被识别，
//! 也不会报错。语法错误交给求值器报告。

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::{ImportDeclaration, ImportKind};

/// 模块导入：`import ... from '...'`
pub(crate) static IMPORT_MODULE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^import [^'"]* from ['"]([^'"\n ]+)['"]"#).expect("valid module import regex")
});

/// 样式表导入：`import './a.css'`
pub(crate) static IMPORT_CSS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^import +['"]([^'"\n ]+\.css)['"]"#).expect("valid stylesheet import regex")
});

/// 一次提取的结果，两个列表都保持源码中的首次匹配顺序（保留重复项）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractedImports {
    /// 模块说明符
    pub modules: Vec<String>,
    /// 样式表说明符
    pub stylesheets: Vec<String>,
}

impl ExtractedImports {
    /// 是否没有任何 import
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty() && self.stylesheets.is_empty()
    }

    /// 声明总数
    pub fn len(&self) -> usize {
        self.modules.len() + self.stylesheets.len()
    }
}

/// 提取模块与样式表说明符
pub fn extract_imports(source: &str) -> ExtractedImports {
    ExtractedImports {
        modules: captures(&IMPORT_MODULE_RE, source),
        stylesheets: captures(&IMPORT_CSS_RE, source),
    }
}

/// 按源码位置顺序提取所有 import 声明
pub fn extract_declarations(source: &str) -> Vec<ImportDeclaration> {
    let modules = IMPORT_MODULE_RE
        .captures_iter(source)
        .filter_map(|c| c.get(1))
        .map(|m| (m.start(), ImportKind::Module, m.as_str()));
    let stylesheets = IMPORT_CSS_RE
        .captures_iter(source)
        .filter_map(|c| c.get(1))
        .map(|m| (m.start(), ImportKind::Stylesheet, m.as_str()));

    let mut found: Vec<_> = modules.chain(stylesheets).collect();
    found.sort_by_key(|(offset, _, _)| *offset);

    found
        .into_iter()
        .map(|(_, kind, specifier)| ImportDeclaration {
            kind,
            specifier: specifier.to_string(),
        })
        .collect()
}

fn captures(
    re: &Regex,
    source: &str,
) -> Vec<String> {
    re.captures_iter(source)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}
