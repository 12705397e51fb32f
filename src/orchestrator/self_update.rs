//! 런처 셀프 업데이트
//!
//! 1. 최신 릴리스 확인 (없으면 이전 업데이트 잔여물 정리)
//! 2. 플랫폼에 맞는 `launcher` 파일을 `.tmp/`로 다운로드
//! 3. 헬퍼(`updater`)를 실행 파일 옆에 설치하고 분리 실행
//! 4. 버전 마커 기록 후 종료 → 헬퍼가 바이너리를 교체하고 재실행

use super::{Launcher, UpdateAvailability, UpdatePhase, UpdateTarget};
use crate::error::LauncherError;
use crate::events;
use crate::metadata::LauncherDescriptor;
use le7el_launcher_updater::archive::enclosed_path;
use le7el_launcher_updater::release::{is_update_available, latest_version, resolve_applicable_file};
use le7el_launcher_updater::{read_version_opt, write_version, FileDescriptor, FileKind, SemVer, UpdaterError};
use serde_json::json;
use std::convert::Infallible;
use std::path::{Path, PathBuf};

/// 헬퍼에 넘긴 교체 작업
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfUpdateHandoff {
    pub version: SemVer,
    /// 새로 받은 런처 바이너리
    pub source: PathBuf,
    /// 교체될 현재 런처 바이너리
    pub destination: PathBuf,
    /// 설치된 헬퍼
    pub updater: PathBuf,
}

/// 다운로드 전에 파일 디스크립터를 검증
pub(crate) fn validate_release_file(file: &FileDescriptor) -> Result<u64, LauncherError> {
    if file.url.trim().is_empty() {
        return Err(LauncherError::NoReleaseFileUrl);
    }
    if !file.url.starts_with("http") {
        return Err(LauncherError::InvalidUrl(file.url.clone()));
    }
    file.size.ok_or(LauncherError::NoReleaseFileSize)
}

async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("[SelfUpdate] Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("[SelfUpdate] Failed to remove {}: {}", path.display(), e),
    }
}

impl Launcher {
    /// 런처 업데이트 여부 확인. `launcher-update-available` 이벤트로도 알린다
    pub async fn check_for_updates(&self) -> Result<UpdateAvailability, LauncherError> {
        self.evaluate_launcher().await.map(|(availability, _, _)| availability)
    }

    async fn evaluate_launcher(&self) -> Result<(UpdateAvailability, LauncherDescriptor, SemVer), LauncherError> {
        let target = UpdateTarget::Launcher;
        self.set_phase(target, UpdatePhase::CheckingForUpdate);

        let result = async {
            let current = read_version_opt(&self.paths.exe_dir)?;
            let descriptor = match self.cached_launcher_metadata().await {
                Some(d) => d,
                None => self.get_launcher_metadata().await?,
            };
            let latest = latest_version(&descriptor.releases.entities, self.config.latest_version_policy)?;
            let available = is_update_available(&latest, current.as_ref());
            tracing::info!(
                "[SelfUpdate] current={} latest={} available={}",
                current.as_ref().map(ToString::to_string).unwrap_or_else(|| "none".into()),
                latest,
                available
            );
            Ok::<_, LauncherError>((available, descriptor, latest))
        }
        .await;

        match result {
            Ok((available, descriptor, latest)) => {
                let availability = if available {
                    self.set_phase(target, UpdatePhase::UpdateAvailable);
                    UpdateAvailability::Available
                } else {
                    self.set_phase(target, UpdatePhase::UpToDate);
                    UpdateAvailability::UpToDate
                };
                self.emit(events::LAUNCHER_UPDATE_AVAILABLE, vec![json!(availability.code())]);
                Ok((availability, descriptor, latest))
            }
            Err(e) => {
                self.record_failure(target, "check launcher update", &e);
                self.emit(
                    events::LAUNCHER_UPDATE_AVAILABLE,
                    vec![json!(UpdateAvailability::Unknown.code())],
                );
                Err(e)
            }
        }
    }

    /// 이전 셀프 업데이트의 잔여물 정리 (헬퍼, 빈 로그, 다운로드 스크래치)
    async fn cleanup_self_update(&self) {
        remove_if_exists(&self.paths.updater_path).await;

        if let Ok(meta) = tokio::fs::metadata(&self.paths.updater_log).await {
            if meta.len() == 0 {
                remove_if_exists(&self.paths.updater_log).await;
            }
        }

        // 앱 설치와 같은 디렉터리를 쓰므로 앱 쪽 플래그를 잡은 채로 지운다
        let Some(_app_guard) = self.app_busy.try_acquire() else {
            tracing::debug!("[SelfUpdate] App update in progress, keeping {}", self.paths.tmp_dir.display());
            return;
        };
        match tokio::fs::remove_dir_all(&self.paths.tmp_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("[SelfUpdate] Failed to remove {}: {}", self.paths.tmp_dir.display(), e),
        }
    }

    /// 헬퍼 원본을 실행 파일 옆으로 복사
    async fn install_helper(&self) -> Result<PathBuf, LauncherError> {
        let payload = &self.paths.updater_payload;
        let target = &self.paths.updater_path;
        tokio::fs::copy(payload, target)
            .await
            .map_err(|e| LauncherError::io("install updater", payload, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(target, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|e| LauncherError::io("chmod", target, e))?;
        }
        Ok(target.clone())
    }

    /// 종료 직전까지의 셀프 업데이트 전 과정.
    ///
    /// 업데이트가 없으면 잔여물을 정리하고 [`LauncherError::NoUpdateAvailable`]을 돌려준다.
    pub async fn stage_launcher_update(&self) -> Result<SelfUpdateHandoff, LauncherError> {
        let _guard = self
            .launcher_busy
            .try_acquire()
            .ok_or(LauncherError::LauncherIsUpdating)?;

        let result = self.stage_inner().await;
        if let Err(ref e) = result {
            if !matches!(e, LauncherError::NoUpdateAvailable) {
                self.record_failure(UpdateTarget::Launcher, "update launcher", e);
                self.emit(events::LAUNCHER_UPDATE_FAILED, vec![e.to_json()]);
            }
        }
        result
    }

    async fn stage_inner(&self) -> Result<SelfUpdateHandoff, LauncherError> {
        let target = UpdateTarget::Launcher;
        let (availability, descriptor, _) = self.evaluate_launcher().await?;
        if availability != UpdateAvailability::Available {
            tracing::info!("[SelfUpdate] Launcher is up to date");
            self.cleanup_self_update().await;
            return Err(LauncherError::NoUpdateAvailable);
        }

        let release = descriptor.releases.entities.first().ok_or(LauncherError::NoReleases)?;
        let file = resolve_applicable_file(release, &self.config.platform, FileKind::Launcher)?;
        let size = validate_release_file(file)?;
        let version = release.semver()?;

        let name = file.file_name();
        let source = enclosed_path(&self.paths.tmp_dir, &name).ok_or(UpdaterError::PathTraversal { entry: name })?;

        self.set_phase(target, UpdatePhase::Downloading);
        self.emit(events::LAUNCHER_UPDATE_PROGRESS, vec![json!(0), json!(size)]);

        tracing::info!("[SelfUpdate] Downloading launcher {} to {}", version, source.display());
        self.downloader
            .download(&source, &file.url, Some(size), |done, total| {
                self.emit(events::LAUNCHER_UPDATE_PROGRESS, vec![json!(done), json!(total)]);
            })
            .await?;

        self.set_phase(target, UpdatePhase::Installing);
        let updater = self.install_helper().await?;

        let mut args = vec![
            source.display().to_string(),
            self.paths.exe_path.display().to_string(),
        ];
        if self.config.logging {
            args.push("true".to_string());
        }
        self.spawner
            .spawn(&updater, &args, Some(&self.paths.exe_dir))
            .map_err(|e| LauncherError::Spawn { path: updater.clone(), source: e })?;

        write_version(&self.paths.exe_dir, &version)?;
        self.set_phase(target, UpdatePhase::VersionCommitted);
        self.emit(events::LAUNCHER_UPDATE_DOWNLOADED, vec![]);

        Ok(SelfUpdateHandoff {
            version,
            source,
            destination: self.paths.exe_path.clone(),
            updater,
        })
    }

    /// 셀프 업데이트 후 프로세스를 종료한다. 성공하면 반환하지 않는다
    pub async fn update_launcher(&self) -> Result<Infallible, LauncherError> {
        let handoff = self.stage_launcher_update().await?;
        self.set_phase(UpdateTarget::Launcher, UpdatePhase::Relaunching);
        tracing::info!(
            "[SelfUpdate] Handing off to {} for version {}",
            handoff.updater.display(),
            handoff.version
        );
        tokio::time::sleep(self.config.handoff_delay()).await;
        std::process::exit(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LauncherConfig;
    use crate::events::LogSink;
    use crate::metadata::ApiClient;
    use crate::orchestrator::LauncherPaths;
    use std::sync::Arc;
    use uuid::Uuid;

    fn launcher(root: &Path) -> Launcher {
        Launcher::new(
            LauncherConfig::default(),
            LauncherPaths::from_exe(root.join("le7el-launcher")),
            Arc::new(ApiClient::new("http://127.0.0.1:9", "Win64")),
            Arc::new(LogSink),
        )
    }

    fn file(url: &str, size: Option<u64>) -> FileDescriptor {
        FileDescriptor {
            id: Uuid::new_v4(),
            kind: FileKind::Launcher,
            url: url.to_string(),
            size,
            platform: String::new(),
            original_path: None,
            mime: None,
            hash: None,
        }
    }

    #[test]
    fn release_file_validation() {
        assert_eq!(validate_release_file(&file("https://cdn/l", Some(5))).unwrap(), 5);
        assert!(matches!(
            validate_release_file(&file("", Some(5))),
            Err(LauncherError::NoReleaseFileUrl)
        ));
        assert!(matches!(
            validate_release_file(&file("ftp://cdn/l", Some(5))),
            Err(LauncherError::InvalidUrl(_))
        ));
        assert!(matches!(
            validate_release_file(&file("http://cdn/l", None)),
            Err(LauncherError::NoReleaseFileSize)
        ));
    }

    #[tokio::test]
    async fn cleanup_keeps_scratch_while_app_update_runs() {
        let root = tempfile::tempdir().unwrap();
        let launcher = launcher(root.path());
        let staged = launcher.paths.app_tmp_dir(Uuid::new_v4()).join("Game.exe");
        std::fs::create_dir_all(staged.parent().unwrap()).unwrap();
        std::fs::write(&staged, b"MZ").unwrap();

        let guard = launcher.app_busy.try_acquire().unwrap();
        launcher.cleanup_self_update().await;
        assert!(staged.exists());
        drop(guard);

        launcher.cleanup_self_update().await;
        assert!(!launcher.paths.tmp_dir.exists());
        assert!(!launcher.is_updating_app());
    }
}
