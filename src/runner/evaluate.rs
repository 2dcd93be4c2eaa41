//! 代码求值
//!
//! [`Evaluator`] 把变换后的源码与作用域编译并渲染，每次尝试恰好得到一个结果：
//! 渲染出的 [`RenderedNode`] 或一个 [`EvalError`]。错误只会变成状态，不会中断流水线。
//!
//! 默认的 [`StaticEvaluator`] 不执行代码，只做本地能完成的检查：
//!
//! 1. 词法检查：字符串、模板字符串、注释、正则字面量是否闭合，`()[]{}` 与 JSX 标签是否配对
//!    （JSX 子节点文本中的括号不计入）
//! 2. 模块绑定：每条模块 import 的说明符都在作用域的模块表中
//! 3. 具名导入：导出列表完整的 ES 模块必须提供被导入的名称
//! 4. 渲染入口：`render(...)` 调用 > `export default` > 表达式

use std::future::Future;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use super::scope::ExecutionScope;

static IMPORT_CLAUSE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^import ([^'"]*) from ['"]([^'"\n ]+)['"]"#).expect("valid import clause regex")
});

static RENDER_CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*render\s*\(").expect("valid render call regex"));

static DEFAULT_EXPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*export\s+default\b").expect("valid default export regex"));

/// 渲染入口
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderEntry {
    /// 空代码
    Empty,
    /// 顶层表达式
    Expression,
    /// `export default`
    DefaultExport,
    /// 直接调用作用域中的 `render(...)`
    RenderCall,
}

impl std::fmt::Display for RenderEntry {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            RenderEntry::Empty => write!(f, "empty"),
            RenderEntry::Expression => write!(f, "expression"),
            RenderEntry::DefaultExport => write!(f, "default export"),
            RenderEntry::RenderCall => write!(f, "render call"),
        }
    }
}

/// 渲染结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedNode {
    /// 渲染入口
    pub entry: RenderEntry,
    /// import 引入的本地绑定
    pub bindings: Vec<String>,
    /// 使用到的模块说明符
    pub modules: Vec<String>,
    /// 被渲染的源码
    #[serde(skip)]
    pub code: Arc<str>,
}

impl RenderedNode {
    /// 创建渲染结果
    pub fn new(
        entry: RenderEntry,
        code: &str,
    ) -> Self {
        Self {
            entry,
            bindings: Vec::new(),
            modules: Vec::new(),
            code: Arc::from(code),
        }
    }
}

impl std::fmt::Display for RenderedNode {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "<{}>", self.entry)?;
        if !self.bindings.is_empty() {
            write!(f, " bindings: {}", self.bindings.join(", "))?;
        }
        if !self.modules.is_empty() {
            write!(f, " modules: {}", self.modules.join(", "))?;
        }
        Ok(())
    }
}

/// 求值错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    /// 语法错误
    #[error("SyntaxError: {message} ({line}:{column})")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
    },

    /// 作用域模块表中没有该说明符
    #[error("Error: Cannot find module '{specifier}'")]
    MissingModule { specifier: String },

    /// 具名导入在模块中不存在
    #[error("SyntaxError: The requested module '{specifier}' does not provide an export named '{name}'")]
    MissingExport { specifier: String, name: String },

    /// 其他求值器报告的错误
    #[error("{0}")]
    Runtime(String),
}

/// 求值器
pub trait Evaluator: Send + Sync + 'static {
    /// 编译并渲染，返回的 future 只完成一次
    fn evaluate(
        &self,
        code: &str,
        scope: &ExecutionScope,
    ) -> impl Future<Output = Result<RenderedNode, EvalError>> + Send;
}

/// 默认求值器（本地静态检查）
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticEvaluator;

impl StaticEvaluator {
    pub fn new() -> Self {
        StaticEvaluator
    }

    /// 同步执行全部检查
    pub fn check(
        &self,
        code: &str,
        scope: &ExecutionScope,
    ) -> Result<RenderedNode, EvalError> {
        check_syntax(code)?;

        let mut node = RenderedNode::new(render_entry(code), code);

        for captures in IMPORT_CLAUSE_RE.captures_iter(code) {
            let (Some(clause), Some(specifier)) = (captures.get(1), captures.get(2)) else {
                continue;
            };
            let specifier = specifier.as_str();
            let namespace =
                scope
                    .imports()
                    .get(specifier)
                    .ok_or_else(|| EvalError::MissingModule {
                        specifier: specifier.to_string(),
                    })?;

            let clause = ImportClause::parse(clause.as_str());
            if namespace.exports_are_known() {
                if let Some((imported, _)) = clause
                    .named
                    .iter()
                    .find(|(imported, _)| !namespace.has_export(imported))
                {
                    return Err(EvalError::MissingExport {
                        specifier: specifier.to_string(),
                        name: imported.clone(),
                    });
                }
            }

            node.bindings.extend(clause.locals());
            if !node.modules.iter().any(|m| m == specifier) {
                node.modules.push(specifier.to_string());
            }
        }

        debug!("rendered {}", node);
        Ok(node)
    }
}

impl Evaluator for StaticEvaluator {
    async fn evaluate(
        &self,
        code: &str,
        scope: &ExecutionScope,
    ) -> Result<RenderedNode, EvalError> {
        self.check(code, scope)
    }
}

/// 判定渲染入口
fn render_entry(code: &str) -> RenderEntry {
    if RENDER_CALL_RE.is_match(code) {
        RenderEntry::RenderCall
    } else if DEFAULT_EXPORT_RE.is_match(code) {
        RenderEntry::DefaultExport
    } else if code.trim().is_empty() {
        RenderEntry::Empty
    } else {
        RenderEntry::Expression
    }
}

/// import 子句：`Default, * as ns, { a, b as c }`
#[derive(Debug, Default, PartialEq, Eq)]
struct ImportClause {
    default: Option<String>,
    namespace: Option<String>,
    /// (导入名, 本地名)
    named: Vec<(String, String)>,
}

impl ImportClause {
    fn parse(clause: &str) -> Self {
        let clause = clause.trim();
        let mut result = ImportClause::default();

        let (head, named) = match (clause.find('{'), clause.rfind('}')) {
            (Some(open), Some(close)) if open < close => (
                format!("{} {}", &clause[..open], &clause[close + 1..]),
                Some(&clause[open + 1..close]),
            ),
            _ => (clause.to_string(), None),
        };

        for part in head.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if let Some(rest) = part.strip_prefix('*') {
                let local = rest.trim().trim_start_matches("as").trim();
                result.namespace = Some(local.to_string());
            } else {
                result.default = Some(part.to_string());
            }
        }

        for item in named
            .into_iter()
            .flat_map(|n| n.split(','))
            .map(str::trim)
            .filter(|i| !i.is_empty())
        {
            let item = item.strip_prefix("type ").unwrap_or(item).trim();
            let (imported, local) = match item.split_once(" as ") {
                Some((imported, local)) => (imported.trim(), local.trim()),
                None => (item, item),
            };
            result.named.push((imported.to_string(), local.to_string()));
        }

        result
    }

    fn locals(&self) -> impl Iterator<Item = String> + '_ {
        self.default
            .iter()
            .chain(self.namespace.iter())
            .cloned()
            .chain(self.named.iter().map(|(_, local)| local.clone()))
    }
}

/// 扫描栈上的上下文
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delimiter {
    Paren,
    Bracket,
    Brace,
    /// 模板字符串中的 `${`
    TemplateExpr,
    /// JSX 中的 `{`
    JsxExpr,
    /// JSX 开始标签内部，记录标签名的下标范围
    JsxTag { name: (usize, usize) },
    /// JSX 子节点文本，记录所属元素的标签名
    JsxChildren { name: (usize, usize) },
}

impl Delimiter {
    fn closing(self) -> Option<char> {
        match self {
            Delimiter::Paren => Some(')'),
            Delimiter::Bracket => Some(']'),
            Delimiter::Brace | Delimiter::TemplateExpr | Delimiter::JsxExpr => Some('}'),
            Delimiter::JsxTag { .. } | Delimiter::JsxChildren { .. } => None,
        }
    }
}

/// 其后出现的 `<` 或 `/` 开始一个表达式（JSX 或正则字面量）的关键字
const EXPRESSION_KEYWORDS: &[&str] = &[
    "return", "typeof", "case", "do", "else", "in", "of", "new", "void", "delete", "throw",
    "yield", "await",
];

/// 下标对应的行列号（从 1 开始）
fn position(
    chars: &[char],
    index: usize,
) -> (usize, usize) {
    let mut line = 1;
    let mut column = 1;
    for &c in &chars[..index.min(chars.len())] {
        if c == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}

fn syntax_error(
    chars: &[char],
    index: usize,
    message: impl Into<String>,
) -> EvalError {
    let (line, column) = position(chars, index);
    EvalError::Syntax {
        message: message.into(),
        line,
        column,
    }
}

/// 扫描模板字符串，返回结束位置以及是否进入了 `${`
fn scan_template(
    chars: &[char],
    mut i: usize,
) -> Result<(usize, bool), EvalError> {
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '`' => return Ok((i + 1, false)),
            '$' if chars.get(i + 1) == Some(&'{') => return Ok((i + 2, true)),
            _ => i += 1,
        }
    }
    Err(syntax_error(chars, chars.len(), "Unterminated template literal"))
}

/// 查找同一行内的闭合引号
///
/// 找不到时该引号按普通字符处理（JSX 文本中的撇号，如 `<p>Don't</p>`）。
fn find_closing_quote(
    chars: &[char],
    start: usize,
    quote: char,
) -> Option<usize> {
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '\n' => return None,
            c if c == quote => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// 词法扫描器
///
/// 不构建 AST，只跟踪字符串、注释、正则字面量、JSX 与括号的嵌套。
struct Scanner {
    chars: Vec<char>,
    stack: Vec<Delimiter>,
    i: usize,
}

impl Scanner {
    fn new(code: &str) -> Self {
        Self {
            chars: code.chars().collect(),
            stack: Vec::new(),
            i: 0,
        }
    }

    fn peek(
        &self,
        offset: usize,
    ) -> Option<char> {
        self.chars.get(self.i + offset).copied()
    }

    fn error(
        &self,
        index: usize,
        message: impl Into<String>,
    ) -> EvalError {
        syntax_error(&self.chars, index, message)
    }

    fn run(mut self) -> Result<(), EvalError> {
        while self.i < self.chars.len() {
            match self.stack.last().copied() {
                Some(Delimiter::JsxTag { .. }) => self.tag_step()?,
                Some(Delimiter::JsxChildren { name }) => self.children_step(name)?,
                _ => self.code_step()?,
            }
        }

        if self.stack.is_empty() {
            Ok(())
        } else {
            Err(self.error(self.chars.len(), "Unexpected end of input"))
        }
    }

    /// 当前位置是否期待一个表达式（决定 `<` 与 `/` 的含义）
    fn expects_expression(&self) -> bool {
        let mut j = self.i;
        while j > 0 && self.chars[j - 1].is_whitespace() {
            j -= 1;
        }
        if j == 0 {
            return true;
        }

        match self.chars[j - 1] {
            '(' | ',' | '=' | ':' | '[' | '!' | '&' | '|' | '?' | '{' | '}' | ';' => true,
            '>' => j >= 2 && self.chars[j - 2] == '=',
            c if is_ident_char(c) => {
                let end = j;
                while j > 0 && is_ident_char(self.chars[j - 1]) {
                    j -= 1;
                }
                let word: String = self.chars[j..end].iter().collect();
                EXPRESSION_KEYWORDS.contains(&word.as_str())
            }
            _ => false,
        }
    }

    /// 普通代码
    fn code_step(&mut self) -> Result<(), EvalError> {
        let c = self.chars[self.i];
        match c {
            '/' if self.peek(1) == Some('/') => {
                while self.i < self.chars.len() && self.chars[self.i] != '\n' {
                    self.i += 1;
                }
            }
            '/' if self.peek(1) == Some('*') => {
                let start = self.i;
                self.i += 2;
                loop {
                    if self.i + 1 >= self.chars.len() {
                        return Err(self.error(start, "Unterminated comment"));
                    }
                    if self.chars[self.i] == '*' && self.chars[self.i + 1] == '/' {
                        self.i += 2;
                        break;
                    }
                    self.i += 1;
                }
            }
            '/' if self.expects_expression() => self.scan_regex()?,
            '<' if self.expects_expression()
                && matches!(self.peek(1), Some(n) if n == '>' || n.is_alphabetic()) =>
            {
                self.open_element();
            }
            '\'' | '"' => {
                self.i = match find_closing_quote(&self.chars, self.i, c) {
                    Some(end) => end + 1,
                    None => self.i + 1,
                };
            }
            '`' => {
                let (next, entered) = scan_template(&self.chars, self.i + 1)?;
                if entered {
                    self.stack.push(Delimiter::TemplateExpr);
                }
                self.i = next;
            }
            '(' | '[' | '{' => {
                self.stack.push(match c {
                    '(' => Delimiter::Paren,
                    '[' => Delimiter::Bracket,
                    _ => Delimiter::Brace,
                });
                self.i += 1;
            }
            ')' | ']' | '}' => {
                match self.stack.pop() {
                    Some(open) if open.closing() == Some(c) => {
                        if open == Delimiter::TemplateExpr {
                            let (next, entered) = scan_template(&self.chars, self.i + 1)?;
                            if entered {
                                self.stack.push(Delimiter::TemplateExpr);
                            }
                            self.i = next;
                            return Ok(());
                        }
                    }
                    _ => return Err(self.error(self.i, format!("Unexpected token '{}'", c))),
                }
                self.i += 1;
            }
            _ => self.i += 1,
        }
        Ok(())
    }

    /// 正则字面量 `/.../flags`，不跨行
    fn scan_regex(&mut self) -> Result<(), EvalError> {
        let start = self.i;
        let mut j = start + 1;
        let mut in_class = false;
        while j < self.chars.len() {
            match self.chars[j] {
                '\\' => j += 1,
                '\n' => break,
                '[' => in_class = true,
                ']' => in_class = false,
                '/' if !in_class => {
                    j += 1;
                    while j < self.chars.len() && is_ident_char(self.chars[j]) {
                        j += 1;
                    }
                    self.i = j;
                    return Ok(());
                }
                _ => {}
            }
            j += 1;
        }
        Err(self.error(start, "Invalid regular expression: missing /"))
    }

    /// 在 `<` 处开始一个元素或片段
    fn open_element(&mut self) {
        self.i += 1;
        if self.peek(0) == Some('>') {
            self.i += 1;
            let here = self.i;
            self.stack.push(Delimiter::JsxChildren { name: (here, here) });
        } else {
            let name = self.scan_tag_name();
            self.stack.push(Delimiter::JsxTag { name });
        }
    }

    fn scan_tag_name(&mut self) -> (usize, usize) {
        while self.peek(0).is_some_and(char::is_whitespace) {
            self.i += 1;
        }
        let start = self.i;
        while self
            .peek(0)
            .is_some_and(|c| is_ident_char(c) || matches!(c, '.' | '-' | ':'))
        {
            self.i += 1;
        }
        (start, self.i)
    }

    /// 开始标签内部：属性、字符串属性值、`{...}` 属性值
    fn tag_step(&mut self) -> Result<(), EvalError> {
        let c = self.chars[self.i];
        match c {
            '/' if self.peek(1) == Some('>') => {
                self.stack.pop();
                self.i += 2;
            }
            '>' => {
                if let Some(Delimiter::JsxTag { name }) = self.stack.pop() {
                    self.stack.push(Delimiter::JsxChildren { name });
                }
                self.i += 1;
            }
            '{' => {
                self.stack.push(Delimiter::JsxExpr);
                self.i += 1;
            }
            '\'' | '"' => match find_closing_quote(&self.chars, self.i, c) {
                Some(end) => self.i = end + 1,
                None => return Err(self.error(self.i, "Unterminated string constant")),
            },
            _ => self.i += 1,
        }
        Ok(())
    }

    /// 子节点文本：只有 `<` 与 `{` 有意义
    fn children_step(
        &mut self,
        name: (usize, usize),
    ) -> Result<(), EvalError> {
        match self.chars[self.i] {
            '{' => {
                self.stack.push(Delimiter::JsxExpr);
                self.i += 1;
            }
            '}' => return Err(self.error(self.i, "Unexpected token '}'")),
            '<' if self.peek(1) == Some('/') => {
                let start = self.i;
                self.i += 2;
                let closing = self.scan_tag_name();
                while self.peek(0).is_some_and(char::is_whitespace) {
                    self.i += 1;
                }
                if self.peek(0) != Some('>') {
                    return Err(self.error(self.i, "Unexpected end of input"));
                }
                if self.chars[closing.0..closing.1] != self.chars[name.0..name.1] {
                    let opening: String = self.chars[name.0..name.1].iter().collect();
                    return Err(self.error(
                        start,
                        format!("Expected corresponding JSX closing tag for <{}>", opening),
                    ));
                }
                self.stack.pop();
                self.i += 1;
            }
            '<' => self.open_element(),
            _ => self.i += 1,
        }
        Ok(())
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// 词法检查
fn check_syntax(code: &str) -> Result<(), EvalError> {
    Scanner::new(code).run()
}
