//! 源文件监听
//!
//! 编辑器事件流的本地对应物：监听一个源文件，防抖后把新的文件内容作为修订发出。
//!
//! ```text
//! notify → 过滤目标文件 → 防抖（默认 300ms）→ 读取内容 → 与上次内容比较 → channel
//! ```
//!
//! 监听的是文件所在目录（非递归），以便兼容“写临时文件再重命名”的编辑器。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// 源文件监听器
pub struct SourceWatcher {
    /// 被监听的文件
    path: PathBuf,
    /// 防抖时间
    debounce: Duration,
    /// 文件监听器
    _watcher: Option<RecommendedWatcher>,
    /// 是否正在运行
    running: Arc<Mutex<bool>>,
}

impl std::fmt::Debug for SourceWatcher {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SourceWatcher")
            .field("path", &self.path)
            .field("debounce", &self.debounce)
            .field("running", &*self.running.lock())
            .finish()
    }
}

impl SourceWatcher {
    /// 创建监听器（不启动）
    pub fn new(
        path: PathBuf,
        debounce: Duration,
    ) -> Self {
        Self {
            path,
            debounce,
            _watcher: None,
            running: Arc::new(Mutex::new(false)),
        }
    }

    /// 启动监听
    ///
    /// 返回接收新源码的 channel。启动时的文件内容视为已提交，不会再次发出。
    pub fn start(&mut self) -> Result<mpsc::UnboundedReceiver<String>, WatchError> {
        if *self.running.lock() {
            return Err(WatchError::AlreadyRunning);
        }

        let dir = watch_dir(&self.path)?;
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<Event>();
        let (source_tx, source_rx) = mpsc::unbounded_channel::<String>();

        let mut watcher = notify::recommended_watcher(move |result: Result<Event, notify::Error>| {
            match result {
                Ok(event) => {
                    let _ = raw_tx.send(event);
                }
                Err(e) => warn!("watch error: {}", e),
            }
        })
        .map_err(|e| WatchError::WatcherInit(e.to_string()))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::WatcherInit(e.to_string()))?;
        self._watcher = Some(watcher);

        *self.running.lock() = true;
        debug!("watching {} (debounce {:?})", self.path.display(), self.debounce);

        let debounce = self.debounce;
        let path = self.path.clone();
        let running = self.running.clone();
        let mut last = std::fs::read_to_string(&path).ok();

        tokio::spawn(async move {
            let mut dirty = false;

            loop {
                if !*running.lock() {
                    break;
                }

                let timeout = tokio::time::sleep(debounce);
                tokio::pin!(timeout);

                tokio::select! {
                    event = raw_rx.recv() => {
                        match event {
                            Some(e) => {
                                dirty |= is_relevant(&e, &path);
                                // 防抖窗口内继续收集
                                continue;
                            }
                            None => break,
                        }
                    }
                    _ = &mut timeout => {
                        if !dirty {
                            continue;
                        }
                        dirty = false;

                        let source = match tokio::fs::read_to_string(&path).await {
                            Ok(source) => source,
                            Err(e) => {
                                warn!("cannot read {}: {}", path.display(), e);
                                continue;
                            }
                        };
                        if last.as_deref() == Some(source.as_str()) {
                            continue;
                        }
                        last = Some(source.clone());

                        if source_tx.send(source).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(source_rx)
    }

    /// 停止监听
    pub fn stop(&mut self) {
        *self.running.lock() = false;
        self._watcher = None;
    }

    /// 是否正在运行
    pub fn is_running(&self) -> bool {
        *self.running.lock()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// 监听错误
#[derive(Debug, Clone, thiserror::Error)]
pub enum WatchError {
    /// Watcher 初始化失败
    #[error("failed to initialize file watcher: {0}")]
    WatcherInit(String),
    /// 已在运行
    #[error("watcher is already running")]
    AlreadyRunning,
    /// 路径没有文件名
    #[error("cannot watch {0}: not a file path")]
    InvalidPath(PathBuf),
}

/// 被监听的目录
fn watch_dir(path: &Path) -> Result<PathBuf, WatchError> {
    if path.file_name().is_none() {
        return Err(WatchError::InvalidPath(path.to_path_buf()));
    }
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(parent.to_path_buf()),
        _ => Ok(PathBuf::from(".")),
    }
}

/// 事件是否涉及目标文件的内容
fn is_relevant(
    event: &Event,
    target: &Path,
) -> bool {
    let touches_content = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
    );
    touches_content
        && event
            .paths
            .iter()
            .any(|p| p.file_name().is_some() && p.file_name() == target.file_name())
}
