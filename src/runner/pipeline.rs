//! 流水线状态机
//!
//! 每个修订依次经过：提取导入 → 解析（模块与样式表并发）→ 构建作用域 → 求值 → 发布状态。
//!
//! 修订在分发时获得单调递增的修订号。结算时只有修订号不小于最近接受的修订号的结果
//! 才会被发布，较晚到达的旧结果被丢弃。求值由异步互斥锁串行化，解析完成时已经过期的
//! 修订不会进入求值器。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::evaluate::{Evaluator, StaticEvaluator};
use super::scope::{build_scope, BaseScope, RenderBinding};
use super::state::{AdoptedStyleSheets, Phase, PipelineState, Snapshot};
use crate::resolve::{extract_imports, CdnConfig, CdnResolver, HttpLoader, ImportResolver};

/// 流水线选项
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// CDN 配置，同时用于从错误消息中移除前缀
    pub cdn: CdnConfig,
    /// 关闭保留：加载中与出错时不显示上一次的渲染结果
    pub disable_cache: bool,
    /// 基础作用域
    pub base_scope: BaseScope,
    /// 渲染库绑定
    pub render_binding: RenderBinding,
}

/// 一个修订的结算结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// 状态已发布
    Published(Phase),
    /// 已被更新的修订取代，结果被丢弃
    Discarded,
}

/// 已分发的修订
#[derive(Debug, Clone)]
struct Revision {
    id: u64,
    code: String,
    modules: Vec<String>,
    style_sheets: Vec<String>,
}

struct Shared<R, E> {
    resolver: R,
    evaluator: E,
    cdn: CdnConfig,
    render_binding: RenderBinding,
    base_scope: RwLock<BaseScope>,
    disable_cache: AtomicBool,
    /// 保留快照，只在发布时读写
    retained: Mutex<Snapshot>,
    adopted: AdoptedStyleSheets,
    state: watch::Sender<PipelineState>,
    next_revision: AtomicU64,
    /// 最近接受的修订号
    accepted: Mutex<u64>,
    latest_code: Mutex<Option<String>>,
    eval_lock: tokio::sync::Mutex<()>,
}

/// 异步依赖解析与执行流水线
pub struct Pipeline<R, E> {
    shared: Arc<Shared<R, E>>,
}

impl<R, E> Clone for Pipeline<R, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Pipeline<CdnResolver<HttpLoader>, StaticEvaluator> {
    /// 使用 HTTP 加载器与静态求值器创建流水线
    pub fn http(
        options: PipelineOptions,
        timeout: Option<Duration>,
    ) -> reqwest::Result<Self> {
        let loader = HttpLoader::new(timeout)?;
        let resolver = CdnResolver::new(loader, options.cdn.clone());
        Ok(Self::new(resolver, StaticEvaluator::new(), options))
    }
}

impl<R, E> Pipeline<R, E>
where
    R: ImportResolver,
    E: Evaluator,
{
    /// 创建流水线，初始状态为 Idle
    pub fn new(
        resolver: R,
        evaluator: E,
        options: PipelineOptions,
    ) -> Self {
        let (state, _) = watch::channel(PipelineState::default());
        Self {
            shared: Arc::new(Shared {
                resolver,
                evaluator,
                cdn: options.cdn,
                render_binding: options.render_binding,
                base_scope: RwLock::new(options.base_scope),
                disable_cache: AtomicBool::new(options.disable_cache),
                retained: Mutex::new(Snapshot::default()),
                adopted: AdoptedStyleSheets::new(),
                state,
                next_revision: AtomicU64::new(0),
                accepted: Mutex::new(0),
                latest_code: Mutex::new(None),
                eval_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// 分发一个修订，不等待结算
    ///
    /// 提取到导入时立即发布 Loading。必须在 tokio 运行时中调用。
    /// 解析器或求值器 panic 时该修订以 Errored 结算。
    pub fn submit(
        &self,
        code: &str,
    ) -> JoinHandle<Settlement> {
        let revision = self.shared.dispatch(code);
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let id = revision.id;
            let outcome = AssertUnwindSafe(shared.settle(revision))
                .catch_unwind()
                .await;
            match outcome {
                Ok(settlement) => settlement,
                Err(payload) => {
                    let message = panic_message(&*payload);
                    error!("revision {}: panicked: {}", id, message);
                    shared.publish_error(id, format!("Error: {}", message))
                }
            }
        })
    }

    /// 分发一个修订并等待结算
    pub async fn run(
        &self,
        code: &str,
    ) -> Settlement {
        match self.submit(code).await {
            Ok(settlement) => settlement,
            Err(e) => {
                error!("revision task failed: {}", e);
                Settlement::Discarded
            }
        }
    }

    /// 修改保留策略；值变化且已有修订时重新运行最近的修订
    pub fn set_disable_cache(
        &self,
        disable_cache: bool,
    ) -> Option<JoinHandle<Settlement>> {
        let previous = self
            .shared
            .disable_cache
            .swap(disable_cache, Ordering::SeqCst);
        if previous == disable_cache {
            return None;
        }

        let latest = self.shared.latest_code.lock().clone();
        latest.map(|code| {
            debug!("disable_cache -> {}, re-running latest revision", disable_cache);
            self.submit(&code)
        })
    }

    /// 替换基础作用域，在下一次结算时生效，不触发重新运行
    pub fn set_base_scope(
        &self,
        base_scope: BaseScope,
    ) {
        *self.shared.base_scope.write() = base_scope;
    }

    pub fn disable_cache(&self) -> bool {
        self.shared.disable_cache.load(Ordering::SeqCst)
    }

    /// 当前状态
    pub fn state(&self) -> PipelineState {
        self.shared.state.borrow().clone()
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.shared.state.subscribe()
    }

    /// 当前采用的样式表
    pub fn adopted_style_sheets(&self) -> AdoptedStyleSheets {
        self.shared.adopted.clone()
    }

    /// 最近分发的修订号
    pub fn latest_revision(&self) -> u64 {
        self.shared.next_revision.load(Ordering::SeqCst)
    }
}

/// panic 负载中的消息
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "revision panicked".to_string()
    }
}

impl<R, E> Shared<R, E>
where
    R: ImportResolver,
    E: Evaluator,
{
    fn dispatch(
        &self,
        code: &str,
    ) -> Revision {
        let code = code.trim().to_string();
        let id = self.next_revision.fetch_add(1, Ordering::SeqCst) + 1;
        *self.latest_code.lock() = Some(code.clone());

        let imports = extract_imports(&code);
        debug!(
            "revision {}: {} module(s), {} stylesheet(s)",
            id,
            imports.modules.len(),
            imports.stylesheets.len()
        );

        if !imports.is_empty() {
            self.publish(id, |retained, disable_cache| {
                PipelineState::loading(id, retained.placeholders(disable_cache))
            });
        }

        Revision {
            id,
            code,
            modules: imports.modules,
            style_sheets: imports.stylesheets,
        }
    }

    async fn settle(
        &self,
        revision: Revision,
    ) -> Settlement {
        let id = revision.id;

        let resolution = match self
            .resolver
            .resolve(&revision.modules, &revision.style_sheets)
            .await
        {
            Ok(resolution) => resolution,
            Err(e) => {
                let message = self.cdn.strip(&e.to_string());
                debug!("revision {}: resolution failed: {}", id, message);
                return self.publish_error(id, message);
            }
        };

        let _guard = self.eval_lock.lock().await;
        if self.is_stale(id) {
            debug!("revision {}: stale before evaluation, skipped", id);
            return Settlement::Discarded;
        }

        let base_scope = self.base_scope.read().clone();
        let (code, scope) = build_scope(
            &revision.code,
            resolution.modules,
            &base_scope,
            &self.render_binding,
        );

        match self.evaluator.evaluate(&code, &scope).await {
            Ok(element) => {
                let style_sheets = resolution.style_sheets;
                self.publish(id, |retained, _| {
                    *retained = Snapshot {
                        element: Some(element.clone()),
                        style_sheets: style_sheets.clone(),
                    };
                    PipelineState::rendered(id, element, style_sheets)
                })
            }
            Err(e) => self.publish_error(id, e.to_string()),
        }
    }

    fn publish_error(
        &self,
        id: u64,
        message: String,
    ) -> Settlement {
        self.publish(id, |retained, disable_cache| {
            PipelineState::errored(id, message, retained.placeholders(disable_cache))
        })
    }

    fn is_stale(
        &self,
        id: u64,
    ) -> bool {
        id < *self.accepted.lock()
    }

    /// 在接受检查通过时构造并发布状态
    fn publish(
        &self,
        id: u64,
        build: impl FnOnce(&mut Snapshot, bool) -> PipelineState,
    ) -> Settlement {
        let mut accepted = self.accepted.lock();
        if id < *accepted {
            debug!("revision {}: superseded by {}, result discarded", id, *accepted);
            return Settlement::Discarded;
        }
        *accepted = id;

        let disable_cache = self.disable_cache.load(Ordering::SeqCst);
        let state = {
            let mut retained = self.retained.lock();
            build(&mut retained, disable_cache)
        };

        let phase = state.phase();
        if phase != Phase::Loading {
            self.adopted.replace(state.style_sheets.clone());
        }
        match &state.error {
            Some(message) => info!("revision {}: {}: {}", id, phase, message),
            None => info!("revision {}: {}", id, phase),
        }

        self.state.send_replace(state);
        Settlement::Published(phase)
    }
}
