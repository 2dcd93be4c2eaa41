//! 执行作用域构建
//!
//! 移除样式表 import 行（它们已被预先加载），在需要时改写旧式的渲染调用，
//! 再把模块表以 `import` 键合并进调用方提供的基础作用域。

use indexmap::IndexMap;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::resolve::extract::IMPORT_CSS_RE;
use crate::resolve::ResolvedModuleMap;

/// 模块表在作用域中的键
pub const IMPORT_KEY: &str = "import";

/// 调用方提供的基础作用域
pub type BaseScope = IndexMap<String, serde_json::Value>;

/// 渲染库绑定
///
/// 模块表中出现 `package` 时，把源码中第一个 `legacy_call`（不区分大小写）改写为
/// `replacement`，让按旧式手动挂载 API 写的示例直接在预览中运行。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderBinding {
    /// 渲染库的说明符
    #[serde(default = "default_package")]
    pub package: String,
    /// 旧式渲染调用
    #[serde(default = "default_legacy_call")]
    pub legacy_call: String,
    /// 改写后的调用
    #[serde(default = "default_replacement")]
    pub replacement: String,
}

fn default_package() -> String {
    "react-dom".to_string()
}

fn default_legacy_call() -> String {
    "ReactDOM.render(".to_string()
}

fn default_replacement() -> String {
    "render(".to_string()
}

impl Default for RenderBinding {
    fn default() -> Self {
        Self {
            package: default_package(),
            legacy_call: default_legacy_call(),
            replacement: default_replacement(),
        }
    }
}

impl RenderBinding {
    /// 改写第一个旧式渲染调用
    pub fn rewrite(
        &self,
        code: &str,
    ) -> String {
        if self.legacy_call.is_empty() {
            return code.to_string();
        }

        match RegexBuilder::new(&regex::escape(&self.legacy_call))
            .case_insensitive(true)
            .build()
        {
            Ok(re) => re
                .replace(code, regex::NoExpand(&self.replacement))
                .into_owned(),
            Err(e) => {
                warn!("cannot match legacy render call '{}': {}", self.legacy_call, e);
                code.to_string()
            }
        }
    }
}

/// 作用域中的一个值
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScopeValue<'a> {
    /// 基础作用域的值
    Value(&'a serde_json::Value),
    /// `import` 键绑定的模块表
    Modules(&'a ResolvedModuleMap),
}

/// 求值器使用的最终作用域（只读）
#[derive(Debug, Clone, Default)]
pub struct ExecutionScope {
    base: BaseScope,
    imports: ResolvedModuleMap,
}

impl ExecutionScope {
    /// 合并基础作用域与模块表，基础作用域中的 `import` 键被覆盖
    pub fn new(
        base: &BaseScope,
        imports: ResolvedModuleMap,
    ) -> Self {
        let mut base = base.clone();
        if base.shift_remove(IMPORT_KEY).is_some() {
            debug!("base scope key '{}' replaced by module map", IMPORT_KEY);
        }
        Self { base, imports }
    }

    /// 查找作用域中的键
    pub fn get(
        &self,
        key: &str,
    ) -> Option<ScopeValue<'_>> {
        if key == IMPORT_KEY {
            return Some(ScopeValue::Modules(&self.imports));
        }
        self.base.get(key).map(ScopeValue::Value)
    }

    /// 模块表
    pub fn imports(&self) -> &ResolvedModuleMap {
        &self.imports
    }

    /// 所有键（基础作用域在前，`import` 最后）
    pub fn keys(&self) -> Vec<&str> {
        self.base
            .keys()
            .map(|k| k.as_str())
            .chain(std::iter::once(IMPORT_KEY))
            .collect()
    }
}

/// 移除所有样式表 import
pub fn strip_style_imports(code: &str) -> String {
    IMPORT_CSS_RE.replace_all(code, "").into_owned()
}

/// 生成变换后的源码与最终作用域
pub fn build_scope(
    code: &str,
    modules: ResolvedModuleMap,
    base: &BaseScope,
    binding: &RenderBinding,
) -> (String, ExecutionScope) {
    let mut code = strip_style_imports(code);
    if modules.contains_key(&binding.package) {
        code = binding.rewrite(&code);
    }
    (code, ExecutionScope::new(base, modules))
}
