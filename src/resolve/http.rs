//! HTTP 加载器
//!
//! 默认的 [`ModuleLoader`] 与 [`StyleSheetSource`] 实现：对规范化后的 URL 发起 GET。
//! 不做认证、不重试，也不管理缓存头。

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::debug;

use super::module::{LoadedModule, ModuleLoadError, ModuleLoader};
use super::stylesheet::{StyleSheetError, StyleSheetSource};

/// User-Agent
const USER_AGENT: &str = concat!("yulan/", env!("CARGO_PKG_VERSION"));

/// 基于 reqwest 的加载器
#[derive(Debug, Clone)]
pub struct HttpLoader {
    client: Client,
}

impl HttpLoader {
    /// 创建加载器，`timeout` 为 `None` 时不设超时
    pub fn new(timeout: Option<Duration>) -> reqwest::Result<Self> {
        let mut builder = Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    /// 使用已有的 client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl ModuleLoader for HttpLoader {
    async fn load(
        &self,
        url: &str,
    ) -> Result<LoadedModule, ModuleLoadError> {
        let fetch_error = |e: reqwest::Error| ModuleLoadError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(fetch_error)?;
        let status = response.status();
        debug!("GET {} -> {}", url, status);
        if !status.is_success() {
            return Err(ModuleLoadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.text().await.map_err(fetch_error)?;

        LoadedModule::from_source(url, content_type.as_deref(), body)
    }
}

impl StyleSheetSource for HttpLoader {
    async fn fetch_text(
        &self,
        url: &str,
    ) -> Result<String, StyleSheetError> {
        let fetch_error = |e: reqwest::Error| StyleSheetError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(fetch_error)?;
        let status = response.status();
        debug!("GET {} -> {}", url, status);
        if !status.is_success() {
            return Err(StyleSheetError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(fetch_error)
    }
}
