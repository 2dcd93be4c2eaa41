//! 样式表加载
//!
//! 每个说明符先尝试 CSS 模块导入；运行时不支持时回退到 fetch：
//! 请求 URL、检查成功状态、读取文本、构造 [`StyleSheet`] 并载入文本。
//!
//! 单个样式表失败只会让它从结果中消失，不影响同批的其他样式表。
//! 结果保持输入顺序。把样式表应用到文档是调用方（流水线）的职责。

use std::future::Future;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use super::normalize::CdnConfig;
use super::ImportKind;

/// 已载入的样式表
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StyleSheet {
    /// 来源 URL
    href: String,
    /// 样式表文本
    #[serde(skip)]
    text: Arc<str>,
    /// 顶层规则的前导部分（选择器或 @ 规则）
    rules: Vec<String>,
}

impl StyleSheet {
    /// 创建空样式表
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            text: Arc::from(""),
            rules: Vec::new(),
        }
    }

    /// 创建并载入文本
    pub fn parse(
        href: impl Into<String>,
        text: &str,
    ) -> Result<Self, StyleSheetError> {
        let mut sheet = Self::new(href);
        sheet.replace(text)?;
        Ok(sheet)
    }

    /// 用新文本替换样式表内容
    ///
    /// 解析失败时样式表保持原样。
    pub fn replace(
        &mut self,
        text: &str,
    ) -> Result<(), StyleSheetError> {
        let rules = parse_rules(text).map_err(|message| StyleSheetError::Parse {
            url: self.href.clone(),
            message,
        })?;
        self.text = Arc::from(text);
        self.rules = rules;
        Ok(())
    }

    pub fn href(&self) -> &str {
        &self.href
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn rules(&self) -> &[String] {
        &self.rules
    }
}

/// 收集顶层规则前导，检查注释、字符串与块是否闭合
fn parse_rules(text: &str) -> Result<Vec<String>, String> {
    let mut rules = Vec::new();
    let mut prelude = String::new();
    let mut depth = 0usize;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                let mut closed = false;
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        closed = true;
                        break;
                    }
                    prev = c;
                }
                if !closed {
                    return Err("unterminated comment".to_string());
                }
            }
            '"' | '\'' => {
                let quote = c;
                let mut closed = false;
                if depth == 0 {
                    prelude.push(c);
                }
                while let Some(c) = chars.next() {
                    if depth == 0 {
                        prelude.push(c);
                    }
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                if depth == 0 {
                                    prelude.push(escaped);
                                }
                            }
                        }
                        '\n' => break,
                        c if c == quote => {
                            closed = true;
                            break;
                        }
                        _ => {}
                    }
                }
                if !closed {
                    return Err("unterminated string".to_string());
                }
            }
            '{' => {
                if depth == 0 {
                    rules.push(prelude.trim().to_string());
                    prelude.clear();
                }
                depth += 1;
            }
            '}' => {
                if depth == 0 {
                    return Err("unexpected '}'".to_string());
                }
                depth -= 1;
            }
            ';' if depth == 0 => {
                let statement = prelude.trim();
                if !statement.is_empty() {
                    rules.push(statement.to_string());
                }
                prelude.clear();
            }
            c if depth == 0 => prelude.push(c),
            _ => {}
        }
    }

    if depth > 0 {
        return Err("unclosed block".to_string());
    }
    Ok(rules)
}

/// 样式表错误（只影响单个样式表）
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StyleSheetError {
    /// 网络错误
    #[error("Failed to fetch stylesheet: {url} ({reason})")]
    Fetch { url: String, reason: String },

    /// 非成功响应
    #[error("Failed to fetch stylesheet: {url} (HTTP {status})")]
    Status { url: String, status: u16 },

    /// 文本无法解析
    #[error("Failed to parse stylesheet {url}: {message}")]
    Parse { url: String, message: String },

    /// CSS 模块导入失败
    #[error("Failed to import stylesheet module {url}: {reason}")]
    Import { url: String, reason: String },
}

/// CSS 模块导入结果
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CssImportError {
    /// 运行时不支持 CSS 模块导入，应回退到 fetch
    #[error("CSS module imports are not supported by this runtime")]
    Unsupported,

    /// 导入失败
    #[error(transparent)]
    Failed(#[from] StyleSheetError),
}

/// 样式表来源
pub trait StyleSheetSource: Send + Sync {
    /// CSS 模块导入（`import(url, { assert: { type: 'css' } })` 的对应物）
    ///
    /// 默认不支持，总是触发 fetch 回退。
    fn import_module(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<StyleSheet, CssImportError>> + Send {
        let _ = url;
        std::future::ready(Err(CssImportError::Unsupported))
    }

    /// 获取样式表文本，非成功状态必须返回错误
    fn fetch_text(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<String, StyleSheetError>> + Send;
}

/// 加载单个样式表
pub async fn load_style_sheet<S: StyleSheetSource>(
    source: &S,
    url: &str,
) -> Result<StyleSheet, StyleSheetError> {
    match source.import_module(url).await {
        Ok(sheet) => Ok(sheet),
        Err(CssImportError::Unsupported) => {
            debug!("css module import unsupported, fetching {}", url);
            let text = source.fetch_text(url).await?;
            StyleSheet::parse(url, &text)
        }
        Err(CssImportError::Failed(e)) => Err(e),
    }
}

/// 并发加载所有样式表，失败项被丢弃
pub async fn load_style_sheets<S: StyleSheetSource>(
    source: &S,
    cdn: &CdnConfig,
    specifiers: &[String],
) -> Vec<StyleSheet> {
    let loads = specifiers.iter().map(|specifier| async move {
        let url = cdn.normalize(specifier, ImportKind::Stylesheet);
        debug!("loading stylesheet '{}' from {}", specifier, url);
        load_style_sheet(source, &url).await
    });

    join_all(loads)
        .await
        .into_iter()
        .filter_map(|result| match result {
            Ok(sheet) => Some(sheet),
            Err(e) => {
                warn!("dropping stylesheet: {}", e);
                None
            }
        })
        .collect()
}
