//! 런처 오케스트레이터 에러 타입. UI로 보낼 때는 `error_code()`로 종류를 구분한다.

use crate::metadata::MetadataError;
use le7el_launcher_updater::UpdaterError;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum LauncherError {
    #[error("no releases")]
    NoReleases,

    #[error("no release files")]
    NoReleaseFiles,

    #[error("no release file size")]
    NoReleaseFileSize,

    #[error("no release file url")]
    NoReleaseFileUrl,

    #[error("invalid release file url: {0}")]
    InvalidUrl(String),

    #[error("app installed")]
    AppInstalled,

    #[error("app not installed")]
    AppNotInstalled,

    #[error("launcher is updating")]
    LauncherIsUpdating,

    #[error("app is updating")]
    AppIsUpdating,

    #[error("no update available")]
    NoUpdateAvailable,

    #[error("invalid version '{0}'")]
    VersionParse(String),

    #[error("executable not found in {0}")]
    ExecutableNotFound(PathBuf),

    #[error("failed to start {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} failed on {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Updater(UpdaterError),
}

impl From<UpdaterError> for LauncherError {
    fn from(err: UpdaterError) -> Self {
        match err {
            UpdaterError::NoReleases => Self::NoReleases,
            UpdaterError::NoReleaseFiles { .. } => Self::NoReleaseFiles,
            UpdaterError::VersionParse { input } => Self::VersionParse(input),
            other => Self::Updater(other),
        }
    }
}

impl LauncherError {
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { operation, path: path.into(), source }
    }

    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NoReleases => "NO_RELEASES",
            Self::NoReleaseFiles => "NO_RELEASE_FILES",
            Self::NoReleaseFileSize => "NO_RELEASE_FILE_SIZE",
            Self::NoReleaseFileUrl => "NO_RELEASE_FILE_URL",
            Self::InvalidUrl(_) => "INVALID_URL",
            Self::AppInstalled => "APP_INSTALLED",
            Self::AppNotInstalled => "APP_NOT_INSTALLED",
            Self::LauncherIsUpdating => "LAUNCHER_IS_UPDATING",
            Self::AppIsUpdating => "APP_IS_UPDATING",
            Self::NoUpdateAvailable => "NO_UPDATE_AVAILABLE",
            Self::VersionParse(_) => "VERSION_PARSE",
            Self::ExecutableNotFound(_) => "EXECUTABLE_NOT_FOUND",
            Self::Spawn { .. } => "SPAWN_FAILED",
            Self::Io { .. } => "FILESYSTEM_ERROR",
            Self::Metadata(MetadataError::NotFound(_)) => "METADATA_NOT_FOUND",
            Self::Metadata(MetadataError::Unauthorized) => "UNAUTHORIZED",
            Self::Metadata(_) => "METADATA_ERROR",
            Self::Updater(UpdaterError::PathTraversal { .. }) => "PATH_TRAVERSAL",
            Self::Updater(UpdaterError::FileSystemError { .. }) => "FILESYSTEM_ERROR",
            Self::Updater(_) => "NETWORK_ERROR",
        }
    }

    /// UI 실패 이벤트용 JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "error_code": self.error_code(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updater_errors_map_to_launcher_taxonomy() {
        let err: LauncherError = UpdaterError::NoReleases.into();
        assert!(matches!(err, LauncherError::NoReleases));

        let err: LauncherError = UpdaterError::VersionParse { input: "x".into() }.into();
        assert_eq!(err.error_code(), "VERSION_PARSE");

        let err: LauncherError = UpdaterError::ApiError {
            url: "http://cdn/a".into(),
            status_code: 500,
            message: "boom".into(),
        }
        .into();
        assert_eq!(err.error_code(), "NETWORK_ERROR");
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn json_payload_carries_code() {
        let json = LauncherError::AppIsUpdating.to_json();
        assert_eq!(json["error"], "app is updating");
        assert_eq!(json["error_code"], "APP_IS_UPDATING");
        assert_eq!(json["success"], false);
    }
}
