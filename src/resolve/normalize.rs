//! 说明符规范化
//!
//! 把源码中的说明符映射为可请求的 URL。绝对 `http(s)://` 地址原样返回，
//! 其余说明符拼接配置的 CDN 前缀。该函数对任意输入都有且只有一个输出。

use serde::{Deserialize, Serialize};

use super::ImportKind;

/// 默认的模块 CDN
pub const DEFAULT_MODULE_CDN: &str = "https://cdn.skypack.dev/";

/// 默认的样式表 CDN（与模块 CDN 相同）
pub const DEFAULT_STYLE_CDN: &str = "https://cdn.skypack.dev/";

/// 是否为绝对远程地址
pub fn is_remote(specifier: &str) -> bool {
    specifier.starts_with("http://") || specifier.starts_with("https://")
}

/// CDN 配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdnConfig {
    /// 模块说明符前缀
    pub module_base: String,
    /// 样式表说明符前缀
    pub style_base: String,
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            module_base: DEFAULT_MODULE_CDN.to_string(),
            style_base: DEFAULT_STYLE_CDN.to_string(),
        }
    }
}

impl CdnConfig {
    /// 使用同一个前缀创建配置
    pub fn with_base(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            module_base: base.clone(),
            style_base: base,
        }
    }

    /// 规范化说明符
    pub fn normalize(
        &self,
        specifier: &str,
        kind: ImportKind,
    ) -> String {
        if is_remote(specifier) {
            return specifier.to_string();
        }

        let base = match kind {
            ImportKind::Module => &self.module_base,
            ImportKind::Stylesheet => &self.style_base,
        };
        format!("{}{}", base, specifier)
    }

    /// 从错误消息中移除 CDN 前缀，方便阅读
    pub fn strip(
        &self,
        message: &str,
    ) -> String {
        let mut stripped = message.to_string();
        for base in [&self.module_base, &self.style_base] {
            if !base.is_empty() {
                stripped = stripped.replace(base.as_str(), "");
            }
        }
        stripped
    }
}
