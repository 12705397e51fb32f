//! 다운로드/설치 계층의 에러 처리 및 복구 로직
//!
//! ## 지원하는 에러 상황
//! - 네트워크 끊김 (연결 실패, 본문 수신 중단)
//! - 비정상 HTTP 응답 (본문 포함)
//! - 파일 시스템 오류
//! - 압축 해제 중 경로 탈출 시도
//! - 버전 마커 누락 / 파싱 실패

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// 업데이터 에러 타입
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum UpdaterError {
    /// 네트워크 연결 실패
    NetworkError {
        url: String,
        message: String,
        recoverable: bool,
    },
    /// 2xx 이외의 응답. `message`에는 응답 본문이 들어간다
    ApiError {
        url: String,
        status_code: u16,
        message: String,
    },
    /// 파일 시스템 오류
    FileSystemError {
        operation: String,
        path: String,
        message: String,
    },
    /// 아카이브 엔트리가 대상 디렉터리 밖을 가리킴
    PathTraversal { entry: String },
    /// 아카이브를 열거나 읽지 못함
    ArchiveError { path: String, message: String },
    /// 버전 문자열 파싱 실패
    VersionParse { input: String },
    /// 버전 마커 파일 없음 (설치된 적 없음)
    VersionNotFound { path: String },
    /// 릴리스 목록이 비어 있음
    NoReleases,
    /// 플랫폼/타입에 맞는 파일이 없음
    NoReleaseFiles { kind: String, platform: String },
}

impl fmt::Display for UpdaterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdaterError::NetworkError { url, message, .. } => {
                write!(f, "Network error for {}: {}", url, message)
            }
            UpdaterError::ApiError { url, status_code, message } => {
                write!(f, "HTTP {} from {}: {}", status_code, url, message)
            }
            UpdaterError::FileSystemError { operation, path, message } => {
                write!(f, "File system error during {} on '{}': {}", operation, path, message)
            }
            UpdaterError::PathTraversal { entry } => {
                write!(f, "illegal file path in archive: {}", entry)
            }
            UpdaterError::ArchiveError { path, message } => {
                write!(f, "Archive error in '{}': {}", path, message)
            }
            UpdaterError::VersionParse { input } => {
                write!(f, "Invalid semantic version: '{}'", input)
            }
            UpdaterError::VersionNotFound { path } => {
                write!(f, "Version marker not found: {}", path)
            }
            UpdaterError::NoReleases => write!(f, "no releases"),
            UpdaterError::NoReleaseFiles { kind, platform } => {
                write!(f, "no release files of type '{}' for platform '{}'", kind, platform)
            }
        }
    }
}

impl std::error::Error for UpdaterError {}

impl UpdaterError {
    /// 복구 가능한 에러인지 확인
    pub fn is_recoverable(&self) -> bool {
        match self {
            UpdaterError::NetworkError { recoverable, .. } => *recoverable,
            // 5xx, 429만 재시도 대상
            UpdaterError::ApiError { status_code, .. } => *status_code >= 500 || *status_code == 429,
            _ => false,
        }
    }

    /// 버전 마커가 없어서 발생한 에러인지
    pub fn is_not_found(&self) -> bool {
        matches!(self, UpdaterError::VersionNotFound { .. })
    }

    /// reqwest 에러를 UpdaterError로 변환
    pub fn from_reqwest(err: &reqwest::Error, url: &str) -> Self {
        if let Some(status) = err.status() {
            UpdaterError::ApiError {
                url: url.to_string(),
                status_code: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            UpdaterError::NetworkError {
                url: url.to_string(),
                message: err.to_string(),
                recoverable: err.is_timeout() || err.is_connect() || err.is_request() || err.is_body(),
            }
        }
    }

    /// IO 에러를 UpdaterError로 변환
    pub fn from_io(err: &std::io::Error, operation: &str, path: &Path) -> Self {
        UpdaterError::FileSystemError {
            operation: operation.to_string(),
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

/// 고정 간격 재시도 카운터
#[derive(Debug, Clone)]
pub struct RecoveryStrategy {
    /// 최대 시도 횟수
    pub max_retries: u32,
    /// 현재 시도 횟수
    pub current_attempt: u32,
    delay: Duration,
}

impl RecoveryStrategy {
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            current_attempt: 0,
            delay,
        }
    }

    pub fn next_delay(&self) -> Duration {
        self.delay
    }

    /// 재시도 가능한지 확인
    pub fn can_retry(&self) -> bool {
        self.current_attempt < self.max_retries
    }

    /// 시도 횟수 증가
    pub fn increment(&mut self) {
        self.current_attempt += 1;
    }
}

/// 에러 컨텍스트 (디버깅/로깅용)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub timestamp: String,
    pub operation: String,
    pub component: Option<String>,
    pub error: UpdaterError,
}

impl ErrorContext {
    pub fn new(operation: &str, error: UpdaterError) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            operation: operation.to_string(),
            component: None,
            error,
        }
    }

    pub fn with_component(mut self, component: &str) -> Self {
        self.component = Some(component.to_string());
        self
    }

    /// 로그 출력
    pub fn log(&self) {
        if self.error.is_recoverable() {
            tracing::warn!(
                "[Error] {} - {} (recoverable): {}",
                self.operation,
                self.component.as_deref().unwrap_or("N/A"),
                self.error
            );
        } else {
            tracing::error!(
                "[Error] {} - {} (fatal): {}",
                self.operation,
                self.component.as_deref().unwrap_or("N/A"),
                self.error
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_recoverable() {
        let err = UpdaterError::ApiError {
            url: "http://x".into(),
            status_code: 503,
            message: "busy".into(),
        };
        assert!(err.is_recoverable());

        let err = UpdaterError::ApiError {
            url: "http://x".into(),
            status_code: 404,
            message: "missing".into(),
        };
        assert!(!err.is_recoverable());
        assert!(!UpdaterError::PathTraversal { entry: "../a".into() }.is_recoverable());
    }

    #[test]
    fn fixed_strategy_counts_attempts() {
        let mut strategy = RecoveryStrategy::fixed(2, Duration::from_millis(5));
        assert!(strategy.can_retry());
        strategy.increment();
        assert_eq!(strategy.next_delay(), Duration::from_millis(5));
        strategy.increment();
        assert!(!strategy.can_retry());
        assert_eq!(strategy.current_attempt, 2);
    }

    #[test]
    fn dropped_body_is_recoverable_network_error() {
        let err = UpdaterError::NetworkError {
            url: "http://x".into(),
            message: "connection reset".into(),
            recoverable: true,
        };
        assert!(err.is_recoverable());
        assert!(!err.is_not_found());
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(UpdaterError::VersionParse { input: "x.y".into() }).unwrap();
        assert_eq!(json["type"], "VersionParse");
        assert_eq!(json["details"]["input"], "x.y");
    }
}
