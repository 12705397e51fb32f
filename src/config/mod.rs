use le7el_launcher_updater::LatestVersionPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 설정 파일 경로를 덮어쓰는 환경 변수
pub const CONFIG_ENV: &str = "LE7EL_LAUNCHER_CONFIG";
pub const CONFIG_FILE: &str = "launcher.toml";

/// 런처가 다른 런처 프로세스와 통신하는 포트
pub const DEFAULT_LAUNCHER_PORT: u16 = 13730;
/// 게임 클라이언트가 런처에 접속하는 포트
pub const DEFAULT_GAME_PORT: u16 = 13731;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LauncherConfig {
    /// 원격 API에서 이 런처를 식별하는 id
    pub launcher_id: Option<String>,
    /// 메타데이터 API 베이스 URL
    pub api_url: String,
    /// 세션 토큰 (있으면 Bearer 헤더로 전송)
    pub api_token: Option<String>,
    /// 릴리스 파일 선택에 쓰는 플랫폼 이름 (기본: 실행 중인 OS)
    pub platform: String,
    pub launcher_port: u16,
    pub game_port: u16,
    /// 첫 인스턴스 판별용 접속 타임아웃
    pub claim_timeout_ms: u64,
    /// 파일 로깅 (`launcher.log`, 헬퍼의 `updater.log`)
    pub logging: bool,
    pub metadata_retries: u32,
    pub metadata_retry_delay_ms: u64,
    /// 셀프 업데이트 다운로드 완료 후 종료까지 대기
    pub handoff_delay_ms: u64,
    pub latest_version_policy: LatestVersionPolicy,
    /// 셀프 업데이트 헬퍼 원본 경로 (기본: `<exe-dir>/resources/updater[.exe]`)
    pub updater_payload: Option<PathBuf>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            launcher_id: None,
            api_url: String::new(),
            api_token: None,
            platform: le7el_launcher_updater::current_platform().to_string(),
            launcher_port: DEFAULT_LAUNCHER_PORT,
            game_port: DEFAULT_GAME_PORT,
            claim_timeout_ms: 1000,
            logging: false,
            metadata_retries: 10,
            metadata_retry_delay_ms: 1000,
            handoff_delay_ms: 1000,
            latest_version_policy: LatestVersionPolicy::default(),
            updater_payload: None,
        }
    }
}

impl LauncherConfig {
    /// 환경 변수 → 실행 파일 옆 → `config/launcher.toml` 순으로 찾는다.
    /// 파일이 없으면 기본값, 내용이 깨졌으면 에러.
    pub fn load() -> anyhow::Result<Self> {
        let candidates = Self::candidate_paths();
        for path in &candidates {
            if path.is_file() {
                return Self::load_from(path);
            }
        }
        tracing::debug!("[Config] No config file found, using defaults");
        Ok(Self::default())
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(p) = std::env::var(CONFIG_ENV) {
            if !p.trim().is_empty() {
                paths.push(PathBuf::from(p));
            }
        }
        if let Some(dir) = std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf)) {
            paths.push(dir.join(CONFIG_FILE));
        }
        paths.push(PathBuf::from("config").join(CONFIG_FILE));
        paths
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path).unwrap_or_default();
        let cfg = Self::from_toml_str(&s)
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {}", path.display(), e))?;
        tracing::info!("[Config] Loaded {}", path.display());
        Ok(cfg)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn claim_timeout(&self) -> Duration {
        Duration::from_millis(self.claim_timeout_ms)
    }

    pub fn metadata_retry_delay(&self) -> Duration {
        Duration::from_millis(self.metadata_retry_delay_ms)
    }

    pub fn handoff_delay(&self) -> Duration {
        Duration::from_millis(self.handoff_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = LauncherConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, LauncherConfig::default());
        assert_eq!(cfg.launcher_port, 13730);
        assert_eq!(cfg.game_port, 13731);
        assert_eq!(cfg.claim_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.metadata_retries, 10);
    }

    #[test]
    fn partial_file_overrides_fields() {
        let cfg = LauncherConfig::from_toml_str(
            r#"
            launcher_id = "0b5d0c4e-6a43-4a3a-9f6e-3f7c0f0c1a11"
            api_url = "http://127.0.0.1:9000"
            platform = "Win64"
            logging = true
            latest_version_policy = "legacy_lowest"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.platform, "Win64");
        assert!(cfg.logging);
        assert_eq!(cfg.latest_version_policy, LatestVersionPolicy::LegacyLowest);
        assert_eq!(cfg.launcher_port, DEFAULT_LAUNCHER_PORT);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "launcher_port = \"not a number\"").unwrap();
        assert!(LauncherConfig::load_from(&path).is_err());
    }
}
