//! 원격 메타데이터 API
//!
//! 오케스트레이터는 [`MetadataSource`] 트레이트만 알고, 실제 HTTP 호출은 [`ApiClient`]가 한다.
//! 응답은 `{"status", "message", "payload"}`로 감싸져 온다.

use async_trait::async_trait;
use le7el_launcher_updater::{EntityPage, ReleaseDescriptor};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("metadata request failed: {0}")]
    Transport(String),

    #[error("malformed metadata response: {0}")]
    Decode(String),

    #[error("launcher id is not configured")]
    MissingLauncherId,
}

/// 런처 디스크립터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LauncherDescriptor {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub releases: EntityPage<ReleaseDescriptor>,
}

/// 앱 디스크립터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDescriptor {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub releases: EntityPage<ReleaseDescriptor>,
}

/// API 공통 응답 래퍼
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    pub payload: Option<T>,
}

#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch_launcher(&self, launcher_id: &str) -> Result<LauncherDescriptor, MetadataError>;

    async fn fetch_app(&self, app_id: Uuid) -> Result<AppDescriptor, MetadataError>;

    async fn fetch_apps_page(
        &self,
        launcher_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<EntityPage<AppDescriptor>, MetadataError>;
}

/// reqwest 기반 메타데이터 클라이언트
pub struct ApiClient {
    http: reqwest::Client,
    /// API 베이스 URL. 로컬 mock 서버 테스트 시 "http://127.0.0.1:9876" 등으로 오버라이드
    base_url: String,
    platform: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, platform: &str) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("le7el-launcher/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            platform: platform.to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.trim().is_empty());
        self
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, what: &str) -> Result<T, MetadataError> {
        if self.base_url.is_empty() {
            return Err(MetadataError::Transport("api_url is not configured".to_string()));
        }

        let mut request = self.http.get(url);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MetadataError::Transport(e.to_string()))?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => return Err(MetadataError::NotFound(what.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(MetadataError::Unauthorized),
            s if !s.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(MetadataError::Transport(format!("HTTP {}: {}", status, body)));
            }
            _ => {}
        }

        let wrapped: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| MetadataError::Decode(e.to_string()))?;
        wrapped
            .payload
            .ok_or_else(|| MetadataError::Decode(format!("empty payload for {}", what)))
    }
}

#[async_trait]
impl MetadataSource for ApiClient {
    async fn fetch_launcher(&self, launcher_id: &str) -> Result<LauncherDescriptor, MetadataError> {
        let url = format!(
            "{}/launchers/public/{}?platform={}",
            self.base_url, launcher_id, self.platform
        );
        self.get(&url, &format!("launcher {}", launcher_id)).await
    }

    async fn fetch_app(&self, app_id: Uuid) -> Result<AppDescriptor, MetadataError> {
        let url = format!("{}/apps/public/{}?platform={}", self.base_url, app_id, self.platform);
        self.get(&url, &format!("app {}", app_id)).await
    }

    async fn fetch_apps_page(
        &self,
        launcher_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<EntityPage<AppDescriptor>, MetadataError> {
        let url = format!(
            "{}/launchers/public/{}/apps?platform={}&offset={}&limit={}",
            self.base_url, launcher_id, self.platform, offset, limit
        );
        self.get(&url, &format!("apps of launcher {}", launcher_id)).await
    }
}
