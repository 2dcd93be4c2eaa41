//! Yulan (预览)
//!
//! An async dependency resolution and execution pipeline for live-coding
//! previews: scan source text for imports, load modules and stylesheets from
//! a CDN concurrently, build an execution scope, evaluate, and publish an
//! observable state for every revision.
//!
//! # Example
//!
//! ```no_run
//! use yulan::runner::{Pipeline, PipelineOptions};
//!
//! # async fn demo() -> yulan::Result<()> {
//! let pipeline = Pipeline::http(PipelineOptions::default(), None)?;
//! pipeline
//!     .run("import { x } from 'left-pad'\nexport default () => x")
//!     .await;
//! println!("{:?}", pipeline.state().phase());
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/yulan")]
#![warn(rust_2018_idioms)]

pub mod resolve;
pub mod runner;
pub mod watch;

// Utility modules
pub mod util;

// Re-exports
pub use anyhow::{Context, Result};
pub use thiserror::Error;

use std::fs;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::runner::{Pipeline, PipelineOptions, PipelineState};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "Yulan (预览)";

/// Run one revision of `source` through an HTTP-backed pipeline
pub async fn run_source(
    source: &str,
    options: PipelineOptions,
    timeout: Option<Duration>,
) -> Result<PipelineState> {
    let pipeline = Pipeline::http(options, timeout).context("Failed to create HTTP client")?;
    let settlement = pipeline.run(source).await;
    debug!("settled: {:?}", settlement);
    Ok(pipeline.state())
}

/// Run one revision of the file at `path`
pub async fn run_file(
    path: &Path,
    options: PipelineOptions,
    timeout: Option<Duration>,
) -> Result<PipelineState> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    run_source(&source, options, timeout).await
}
