//! 执行层
//!
//! 在解析结果之上构建执行作用域、求值源码，并由 [`Pipeline`] 管理每个修订的可观察状态。

pub mod evaluate;
pub mod pipeline;
pub mod scope;
pub mod state;

pub use evaluate::{EvalError, Evaluator, RenderEntry, RenderedNode, StaticEvaluator};
pub use pipeline::{Pipeline, PipelineOptions, Settlement};
pub use scope::{
    build_scope, strip_style_imports, BaseScope, ExecutionScope, RenderBinding, ScopeValue,
    IMPORT_KEY,
};
pub use state::{AdoptedStyleSheets, Phase, PipelineState, Snapshot};

#[cfg(test)]
mod tests;
