//! 앱 설치/업데이트/삭제/실행
//!
//! 설치 디렉터리는 `<exe-dir>/apps/<app-id>/`, 다운로드 스크래치는 `<exe-dir>/.tmp/<app-id>/`.
//! 릴리스가 `archive`이면 `release-archive` 파일 하나를 받아 풀고,
//! 아니면 `release` 파일 전부를 받아 원래 상대 경로대로 배치한다.

use super::self_update::validate_release_file;
use super::{run_blocking, Launcher, UpdateAvailability, UpdatePhase, UpdateTarget};
use crate::error::LauncherError;
use crate::events;
use crate::metadata::AppDescriptor;
use le7el_launcher_updater::archive::enclosed_path;
use le7el_launcher_updater::release::{is_update_available, latest_version, release_files, resolve_applicable_file};
use le7el_launcher_updater::{
    extract_archive, read_version_opt, write_version, EntityPage, FileDescriptor, FileKind, ReleaseDescriptor,
    SemVer, UpdaterError,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use uuid::Uuid;

impl Launcher {
    // ─── 메타데이터 ───

    /// 앱 메타데이터를 가져와 `launcher-app` 이벤트로 보낸다
    pub async fn get_app_metadata(&self, id: Uuid) -> Result<AppDescriptor, LauncherError> {
        let app = self.metadata.fetch_app(id).await?;
        self.emit(events::LAUNCHER_APP, vec![json!(app)]);
        Ok(app)
    }

    /// 런처에 등록된 앱 목록 한 페이지
    pub async fn index_launcher_apps(&self, offset: u64, limit: u64) -> Result<EntityPage<AppDescriptor>, LauncherError> {
        let launcher_id = self.launcher_id()?;
        let page = self.metadata.fetch_apps_page(launcher_id, offset, limit).await?;
        tracing::debug!("[Launcher] Indexed {} apps (total {})", page.entities.len(), page.total);
        self.emit(events::LAUNCHER_APPS, vec![json!(page)]);
        Ok(page)
    }

    // ─── 상태 조회 ───

    pub async fn check_for_app_updates(&self, id: Uuid) -> Result<UpdateAvailability, LauncherError> {
        let target = UpdateTarget::App(id);
        self.set_phase(target, UpdatePhase::CheckingForUpdate);

        let result = async {
            let app = self.metadata.fetch_app(id).await?;
            let current = read_version_opt(&self.paths.app_dir(id))?;
            let latest = latest_version(&app.releases.entities, self.config.latest_version_policy)?;
            Ok::<_, LauncherError>(is_update_available(&latest, current.as_ref()))
        }
        .await;

        match result {
            Ok(available) => {
                let availability = if available {
                    self.set_phase(target, UpdatePhase::UpdateAvailable);
                    UpdateAvailability::Available
                } else {
                    self.set_phase(target, UpdatePhase::UpToDate);
                    UpdateAvailability::UpToDate
                };
                self.emit(events::APP_UPDATE_AVAILABLE, vec![json!(id), json!(availability.code())]);
                Ok(availability)
            }
            Err(e) => {
                self.record_failure(target, "check app update", &e);
                self.emit(
                    events::APP_UPDATE_AVAILABLE,
                    vec![json!(id), json!(UpdateAvailability::Unknown.code())],
                );
                Err(e)
            }
        }
    }

    async fn locate_executable(&self, app: &AppDescriptor) -> Result<PathBuf, LauncherError> {
        let locator = self.locator.clone();
        let dir = self.paths.app_dir(app.id);
        let id = app.id.to_string();
        let name = app.name.clone();
        run_blocking(move || locator.locate(&dir, &id, &name)).await
    }

    async fn installed(&self, app: &AppDescriptor) -> Result<bool, LauncherError> {
        match self.locate_executable(app).await {
            Ok(_) => Ok(true),
            Err(LauncherError::ExecutableNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// 설치 디렉터리와 실행 파일이 모두 있으면 설치된 것으로 본다
    pub async fn is_app_installed(&self, id: Uuid) -> Result<bool, LauncherError> {
        let app = self.metadata.fetch_app(id).await?;
        self.installed(&app).await
    }

    // ─── 설치/업데이트 ───

    pub async fn install_app(&self, id: Uuid) -> Result<(), LauncherError> {
        self.install_or_update(id, true).await
    }

    /// 설치 여부와 관계없이 최신 릴리스를 받아 덮어쓴다
    pub async fn update_app(&self, id: Uuid) -> Result<(), LauncherError> {
        self.install_or_update(id, false).await
    }

    async fn install_or_update(&self, id: Uuid, fresh_install: bool) -> Result<(), LauncherError> {
        let _guard = self.app_busy.try_acquire().ok_or(LauncherError::AppIsUpdating)?;
        let target = UpdateTarget::App(id);
        let operation = if fresh_install { "install app" } else { "update app" };

        let app = match self.metadata.fetch_app(id).await {
            Ok(app) => app,
            Err(e) => {
                let e = LauncherError::from(e);
                self.record_failure(target, operation, &e);
                self.emit_app_failed(json!({ "id": id }), &e);
                return Err(e);
            }
        };

        let result = self.install_latest_release(&app, fresh_install).await;
        if let Err(ref e) = result {
            self.record_failure(target, operation, e);
            self.emit_app_failed(json!(app), e);
        }
        result
    }

    /// `app-update-failed (app, message)`. 메타데이터가 없으면 `app`은 `{ "id": ... }`만 담는다
    fn emit_app_failed(&self, app: Value, err: &LauncherError) {
        self.emit(events::APP_UPDATE_FAILED, vec![app, json!(err.to_string())]);
    }

    async fn install_latest_release(&self, app: &AppDescriptor, fresh_install: bool) -> Result<(), LauncherError> {
        let release = app.releases.entities.first().ok_or(LauncherError::NoReleases)?;
        if fresh_install && self.installed(app).await? {
            return Err(LauncherError::AppInstalled);
        }

        tracing::info!(
            "[Launcher] {} {} ({}) release {}",
            if fresh_install { "Installing" } else { "Updating" },
            app.name,
            app.id,
            release.version
        );

        if release.archive {
            self.install_archive(app, release).await
        } else {
            self.install_loose_files(app, release).await
        }
    }

    /// 플랫폼이 맞는 압축 파일을 우선하고, 없으면 플랫폼과 무관하게 첫 압축 파일
    fn archive_file<'a>(&self, release: &'a ReleaseDescriptor) -> Result<&'a FileDescriptor, LauncherError> {
        resolve_applicable_file(release, &self.config.platform, FileKind::ReleaseArchive)
            .or_else(|_| {
                release
                    .files
                    .entities
                    .iter()
                    .find(|f| f.kind == FileKind::ReleaseArchive)
                    .ok_or(LauncherError::NoReleaseFiles)
            })
    }

    async fn finish_install(&self, app: &AppDescriptor, version: &SemVer) -> Result<(), LauncherError> {
        let target = UpdateTarget::App(app.id);
        write_version(&self.paths.app_dir(app.id), version)?;
        self.set_phase(target, UpdatePhase::VersionCommitted);

        let tmp = self.paths.app_tmp_dir(app.id);
        match tokio::fs::remove_dir_all(&tmp).await {
            Ok(()) => self.emit(events::APP_UPDATE_COMPLETED, vec![json!(app)]),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.emit(events::APP_UPDATE_COMPLETED, vec![json!(app)])
            }
            Err(e) => {
                tracing::warn!("[Launcher] Failed to remove {}: {}", tmp.display(), e);
                self.emit(
                    events::APP_UPDATE_COMPLETED,
                    vec![json!(app), json!("failed to remove temporary download directory")],
                );
            }
        }
        tracing::info!("[Launcher] {} ({}) is now at {}", app.name, app.id, version);
        Ok(())
    }

    async fn install_archive(&self, app: &AppDescriptor, release: &ReleaseDescriptor) -> Result<(), LauncherError> {
        let target = UpdateTarget::App(app.id);
        let file = self.archive_file(release)?;
        let size = validate_release_file(file)?;
        let version = release.semver()?;

        self.set_phase(target, UpdatePhase::Downloading);
        let archive_path = self.paths.app_tmp_dir(app.id).join(file.id.to_string());
        let app_json = json!(app);
        self.downloader
            .download(&archive_path, &file.url, Some(size), |done, total| {
                self.emit(
                    events::APP_UPDATE_PROGRESS,
                    vec![app_json.clone(), json!(done), json!(total)],
                );
            })
            .await?;

        self.set_phase(target, UpdatePhase::Installing);
        self.emit(events::APP_UPDATE_EXTRACTING, vec![app_json.clone()]);
        let install_dir = self.paths.app_dir(app.id);
        let count = run_blocking(move || extract_archive(&archive_path, &install_dir).map_err(LauncherError::from)).await?;
        tracing::debug!("[Launcher] Extracted {} files for {}", count, app.id);

        self.finish_install(app, &version).await
    }

    async fn install_loose_files(&self, app: &AppDescriptor, release: &ReleaseDescriptor) -> Result<(), LauncherError> {
        let target = UpdateTarget::App(app.id);
        let files = release_files(release, &self.config.platform, FileKind::Release);
        if files.is_empty() {
            return Err(LauncherError::NoReleaseFiles);
        }
        let version = release.semver()?;

        let tmp_dir = self.paths.app_tmp_dir(app.id);
        let install_dir = self.paths.app_dir(app.id);
        let mut plan = Vec::with_capacity(files.len());
        for file in &files {
            let size = validate_release_file(file)?;
            let name = file.file_name();
            let staged = enclosed_path(&tmp_dir, &name);
            let placed = enclosed_path(&install_dir, &name);
            let (Some(staged), Some(placed)) = (staged, placed) else {
                return Err(UpdaterError::PathTraversal { entry: name }.into());
            };
            plan.push((*file, size, staged, placed));
        }
        let total: u64 = plan.iter().map(|(_, size, _, _)| *size).sum();

        self.set_phase(target, UpdatePhase::Downloading);
        let app_json = json!(app);
        // 완료된 파일 크기 합 + 현재 파일 진행률. 감소하지 않고, 마지막 파일이 끝나야 total에 도달
        let mut completed = 0u64;
        for (file, size, staged, _) in &plan {
            let base = completed;
            let size = *size;
            self.downloader
                .download(staged, &file.url, Some(size), |done, _| {
                    self.emit(
                        events::APP_UPDATE_PROGRESS,
                        vec![app_json.clone(), json!(base + done.min(size)), json!(total)],
                    );
                })
                .await?;
            completed += size;
        }

        self.set_phase(target, UpdatePhase::Installing);
        for (_, _, staged, placed) in &plan {
            if let Some(parent) = placed.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| LauncherError::io("create directory", parent, e))?;
            }
            tokio::fs::rename(staged, placed)
                .await
                .map_err(|e| LauncherError::io("move", staged, e))?;
        }

        self.finish_install(app, &version).await
    }

    // ─── 삭제/실행 ───

    pub async fn delete_app(&self, id: Uuid) -> Result<(), LauncherError> {
        let _guard = self.app_busy.try_acquire().ok_or(LauncherError::AppIsUpdating)?;
        let app = self.metadata.fetch_app(id).await?;
        tracing::warn!("[Launcher] Deleting app {} ({})", app.name, app.id);

        if !self.installed(&app).await? {
            return Err(LauncherError::AppNotInstalled);
        }

        let dir = self.paths.app_dir(id);
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            let err = LauncherError::io("remove app directory", &dir, e);
            tracing::error!("[Launcher] {}", err);
            self.emit_app_failed(json!(app), &err);
            return Err(err);
        }
        self.reset_phase(UpdateTarget::App(id));
        Ok(())
    }

    /// 실행 파일을 찾아 그 디렉터리를 작업 디렉터리로 실행
    pub async fn launch_app(&self, id: Uuid) -> Result<PathBuf, LauncherError> {
        let app = self.metadata.fetch_app(id).await?;
        let exe = self.locate_executable(&app).await?;
        let no_args: [String; 0] = [];
        self.spawner
            .spawn(&exe, &no_args, exe.parent())
            .map_err(|e| LauncherError::Spawn { path: exe.clone(), source: e })?;
        tracing::info!("[Launcher] Launched {} ({})", app.name, exe.display());
        Ok(exe)
    }
}
