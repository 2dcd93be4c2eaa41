//! 模块加载与 interop 规范化
//!
//! 每个模块说明符先经过 [`CdnConfig::normalize`]，再由 [`ModuleLoader`] 并发加载。
//! 任何一个加载失败都会使整批失败（全有或全无）。
//!
//! 加载结果是一个带标签的变体：
//!
//! | 变体 | 判定 | interop 结果 |
//! |------|------|-------------|
//! | [`LoadedModule::Namespace`] | 源码含 ESM 语法 | 原样保留，`es_module = true` |
//! | [`LoadedModule::Opaque`] | JSON 或经典脚本 | 包装为只有 `default` 导出的命名空间 |

use std::future::Future;
use std::sync::Arc;

use futures_util::future::try_join_all;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::normalize::CdnConfig;
use super::resolver::ResolveError;
use super::ImportKind;

/// 已解析的模块表：源码中原样书写的说明符 → 规范化后的命名空间
pub type ResolvedModuleMap = IndexMap<String, ModuleNamespace>;

/// 标识符（JS 风格）
const IDENT: &str = r"[A-Za-z_$][\w$]*";

/// 语句边界：行首或分号、括号、空白之后（兼容压缩后的单行输出）
const BOUNDARY: &str = r"(?:^|[;})\s])";

static ESM_SYNTAX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r#"(?m){BOUNDARY}(?:export\s*(?:\{{|\*|default\b|const\b|let\b|var\b|function\b|class\b|async\b)|import\s*(?:\{{|\*|['"]|{IDENT}\s*(?:,|from\b)))"#
    ))
    .expect("valid ESM syntax regex")
});

static EXPORT_FUNCTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?m){BOUNDARY}export\s+(?:async\s+)?function\s*\*?\s*({IDENT})"
    ))
    .expect("valid export function regex")
});

static EXPORT_CLASS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?m){BOUNDARY}export\s+class\s+({IDENT})"))
        .expect("valid export class regex")
});

static EXPORT_BINDING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?m){BOUNDARY}export\s+(?:const|let|var)\s+({IDENT})"))
        .expect("valid export binding regex")
});

static EXPORT_DEFAULT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?m){BOUNDARY}export\s+default\b")).expect("valid export default regex")
});

static EXPORT_LIST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?m){BOUNDARY}export\s*\{{([^}}]*)\}}")).expect("valid export list regex")
});

static EXPORT_STAR_AS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?m){BOUNDARY}export\s*\*\s*as\s+({IDENT})"))
        .expect("valid export star-as regex")
});

static EXPORT_STAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r#"(?m){BOUNDARY}export\s*\*\s*from\s*['"]"#))
        .expect("valid export star regex")
});

/// 非 ESM 的加载结果
#[derive(Debug, Clone, PartialEq)]
pub enum OpaqueValue {
    /// JSON 文档
    Json(serde_json::Value),
    /// 经典脚本（CommonJS / UMD 等）源码
    Script(Arc<str>),
}

/// 导出项
#[derive(Debug, Clone, PartialEq)]
pub enum Export {
    /// `export function f`
    Function,
    /// `export class C`
    Class,
    /// `export const|let|var x` 或 `export { x }`
    Binding,
    /// `export default ...`
    Default,
    /// interop 包装的非 ESM 值
    Value(OpaqueValue),
}

/// 模块命名空间
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleNamespace {
    /// 实际加载的 URL
    url: String,
    /// 是否为原生 ES 模块（对应 `__esModule`）
    es_module: bool,
    /// 导出项（name -> Export）
    exports: IndexMap<String, Export>,
    /// 含 `export * from`，导出列表不完整
    star_reexports: bool,
}

impl ModuleNamespace {
    /// 创建空的 ES 模块命名空间
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            es_module: true,
            exports: IndexMap::new(),
            star_reexports: false,
        }
    }

    /// 从 ESM 源码词法收集导出项
    pub fn from_source(
        url: impl Into<String>,
        source: &str,
    ) -> Self {
        let mut namespace = Self::new(url);

        for (re, export) in [
            (&*EXPORT_FUNCTION_RE, Export::Function),
            (&*EXPORT_CLASS_RE, Export::Class),
            (&*EXPORT_BINDING_RE, Export::Binding),
            (&*EXPORT_STAR_AS_RE, Export::Binding),
        ] {
            for name in re.captures_iter(source).filter_map(|c| c.get(1)) {
                namespace.add_export(name.as_str(), export.clone());
            }
        }

        if EXPORT_DEFAULT_RE.is_match(source) {
            namespace.add_export("default", Export::Default);
        }

        for list in EXPORT_LIST_RE.captures_iter(source).filter_map(|c| c.get(1)) {
            for item in list.as_str().split(',') {
                let exported = match item.split_once(" as ") {
                    Some((_, alias)) => alias.trim(),
                    None => item.trim(),
                };
                if exported.is_empty() {
                    continue;
                }
                let export = if exported == "default" {
                    Export::Default
                } else {
                    Export::Binding
                };
                namespace.add_export(exported, export);
            }
        }

        namespace.star_reexports = EXPORT_STAR_RE.is_match(source);
        namespace
    }

    /// 把非 ESM 值包装为 `default` 导出
    pub fn wrap_default(
        url: impl Into<String>,
        value: OpaqueValue,
    ) -> Self {
        let mut namespace = Self::new(url);
        namespace.es_module = false;
        namespace.add_export("default", Export::Value(value));
        namespace
    }

    /// 添加导出项
    pub fn add_export(
        &mut self,
        name: &str,
        export: Export,
    ) {
        self.exports.insert(name.to_string(), export);
    }

    /// 标记含有 `export * from`
    pub fn with_star_reexports(mut self) -> Self {
        self.star_reexports = true;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_es_module(&self) -> bool {
        self.es_module
    }

    pub fn has_star_reexports(&self) -> bool {
        self.star_reexports
    }

    /// 获取导出项
    pub fn get_export(
        &self,
        name: &str,
    ) -> Option<&Export> {
        self.exports.get(name)
    }

    /// 检查是否有指定的导出项
    pub fn has_export(
        &self,
        name: &str,
    ) -> bool {
        self.exports.contains_key(name)
    }

    /// 获取所有导出项名称
    pub fn export_names(&self) -> Vec<&str> {
        self.exports.keys().map(|s| s.as_str()).collect()
    }

    /// 导出列表是否完整，可以用来校验具名导入
    pub fn exports_are_known(&self) -> bool {
        self.es_module && !self.star_reexports
    }
}

/// 加载器返回的原始模块
#[derive(Debug, Clone, PartialEq)]
pub enum LoadedModule {
    /// 原生 ES 模块
    Namespace(ModuleNamespace),
    /// 非 ESM 值
    Opaque { url: String, value: OpaqueValue },
}

impl LoadedModule {
    /// 根据响应内容判定模块形态
    ///
    /// - `Content-Type` 含 `json` 或 URL 以 `.json` 结尾 → JSON
    /// - 源码含 ESM 语法 → 命名空间
    /// - 其他 → 经典脚本
    pub fn from_source(
        url: &str,
        content_type: Option<&str>,
        body: String,
    ) -> Result<Self, ModuleLoadError> {
        let is_json = content_type.is_some_and(|ct| ct.contains("json")) || url.ends_with(".json");
        if is_json {
            let value =
                serde_json::from_str(&body).map_err(|e| ModuleLoadError::InvalidJson {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
            return Ok(LoadedModule::Opaque {
                url: url.to_string(),
                value: OpaqueValue::Json(value),
            });
        }

        if ESM_SYNTAX_RE.is_match(&body) {
            Ok(LoadedModule::Namespace(ModuleNamespace::from_source(url, &body)))
        } else {
            Ok(LoadedModule::Opaque {
                url: url.to_string(),
                value: OpaqueValue::Script(Arc::from(body)),
            })
        }
    }
}

/// interop 规范化
pub fn interop(loaded: LoadedModule) -> ModuleNamespace {
    match loaded {
        LoadedModule::Namespace(namespace) => namespace,
        LoadedModule::Opaque { url, value } => ModuleNamespace::wrap_default(url, value),
    }
}

/// 模块加载错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModuleLoadError {
    /// 网络错误
    #[error("TypeError: Failed to fetch dynamically imported module: {url} ({reason})")]
    Fetch { url: String, reason: String },

    /// 非成功响应
    #[error("TypeError: Failed to fetch dynamically imported module: {url} (HTTP {status})")]
    Status { url: String, status: u16 },

    /// JSON 模块解析失败
    #[error("SyntaxError: Failed to parse JSON module {url}: {reason}")]
    InvalidJson { url: String, reason: String },
}

/// 动态模块加载器
///
/// 默认实现见 [`HttpLoader`](super::HttpLoader)，测试中可替换为确定性的假实现。
pub trait ModuleLoader: Send + Sync {
    /// 加载一个已规范化的 URL
    fn load(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<LoadedModule, ModuleLoadError>> + Send;
}

/// 并发加载所有模块说明符
///
/// 结果以源码中原样书写的说明符为键，任何一个失败则整体失败。
pub async fn resolve_modules<L: ModuleLoader>(
    loader: &L,
    cdn: &CdnConfig,
    specifiers: &[String],
) -> Result<ResolvedModuleMap, ResolveError> {
    let loads = specifiers.iter().map(|specifier| async move {
        let url = cdn.normalize(specifier, ImportKind::Module);
        debug!("loading module '{}' from {}", specifier, url);
        let loaded = loader
            .load(&url)
            .await
            .map_err(|source| ResolveError::Module {
                specifier: specifier.clone(),
                source,
            })?;
        Ok::<_, ResolveError>((specifier.clone(), interop(loaded)))
    });

    let loaded = try_join_all(loads).await?;
    Ok(loaded.into_iter().collect())
}
