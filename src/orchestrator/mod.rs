//! 업데이트 오케스트레이터
//!
//! 런처 셀프 업데이트와 앱 설치/업데이트/삭제/실행을 조율한다.
//!
//! ## 동시성
//! - 런처 업데이트와 앱 작업은 각각 하나의 busy 플래그로 보호된다 (CAS로 획득, 가드 drop 시 해제)
//! - 같은 종류의 작업이 이미 진행 중이면 즉시 실패한다
//! - 두 플래그는 서로 독립적이다
//!
//! ## 디렉터리
//! 모든 경로는 실행 파일 디렉터리 기준이다. [`LauncherPaths`] 참고.

mod apps;
mod self_update;
pub mod state;

pub use self_update::SelfUpdateHandoff;
pub use state::{StateMachine, TransitionError, UpdatePhase, UpdateTarget};

use crate::config::LauncherConfig;
use crate::error::LauncherError;
use crate::events::{self, EventSink, LauncherEvent};
use crate::locator::ExecutableLocator;
use crate::metadata::{LauncherDescriptor, MetadataError, MetadataSource};
use le7el_launcher_updater::{Downloader, ErrorContext, RecoveryStrategy};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use uuid::Uuid;

/// 업데이트 가능 여부 (UI에는 정수로 전달)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAvailability {
    Unknown,
    UpToDate,
    Available,
}

impl UpdateAvailability {
    pub fn code(&self) -> i8 {
        match self {
            UpdateAvailability::Unknown => -1,
            UpdateAvailability::UpToDate => 0,
            UpdateAvailability::Available => 1,
        }
    }
}

// ═══════════════════════════════════════════════════════
// 경로
// ═══════════════════════════════════════════════════════

pub const APPS_DIR: &str = "apps";
pub const TMP_DIR: &str = ".tmp";
pub const UPDATER_LOG: &str = "updater.log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherPaths {
    /// 현재 실행 중인 런처 바이너리
    pub exe_path: PathBuf,
    pub exe_dir: PathBuf,
    pub apps_dir: PathBuf,
    pub tmp_dir: PathBuf,
    /// 셀프 업데이트 헬퍼가 설치될 위치
    pub updater_path: PathBuf,
    pub updater_log: PathBuf,
    /// 헬퍼 원본
    pub updater_payload: PathBuf,
}

impl LauncherPaths {
    pub fn from_exe(exe_path: PathBuf) -> Self {
        let exe_dir = exe_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let updater_name = format!("updater{}", std::env::consts::EXE_SUFFIX);
        Self {
            apps_dir: exe_dir.join(APPS_DIR),
            tmp_dir: exe_dir.join(TMP_DIR),
            updater_path: exe_dir.join(&updater_name),
            updater_log: exe_dir.join(UPDATER_LOG),
            updater_payload: exe_dir.join("resources").join(&updater_name),
            exe_dir,
            exe_path,
        }
    }

    pub fn current() -> Result<Self, LauncherError> {
        let exe = std::env::current_exe().map_err(|e| LauncherError::io("locate executable", ".", e))?;
        Ok(Self::from_exe(exe))
    }

    pub fn with_updater_payload(mut self, payload: Option<PathBuf>) -> Self {
        if let Some(p) = payload {
            self.updater_payload = p;
        }
        self
    }

    pub fn app_dir(&self, id: Uuid) -> PathBuf {
        self.apps_dir.join(id.to_string())
    }

    pub fn app_tmp_dir(&self, id: Uuid) -> PathBuf {
        self.tmp_dir.join(id.to_string())
    }
}

// ═══════════════════════════════════════════════════════
// 프로세스 실행
// ═══════════════════════════════════════════════════════

/// 분리된 프로세스를 띄우는 수단. 테스트에서는 기록용 구현으로 바꾼다
pub trait Spawner: Send + Sync {
    fn spawn(&self, program: &Path, args: &[String], cwd: Option<&Path>) -> std::io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedSpawner;

impl Spawner for DetachedSpawner {
    fn spawn(&self, program: &Path, args: &[String], cwd: Option<&Path>) -> std::io::Result<()> {
        let child = le7el_launcher_updater::spawn_detached(program, args, cwd)?;
        tracing::info!("[Launcher] Started {} (pid {})", program.display(), child.id());
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════
// busy 플래그
// ═══════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct BusyFlag(AtomicBool);

/// drop 시 플래그를 내린다
#[derive(Debug)]
pub struct BusyGuard<'a>(&'a AtomicBool);

impl BusyFlag {
    pub fn try_acquire(&self) -> Option<BusyGuard<'_>> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(&self.0))
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ═══════════════════════════════════════════════════════
// Launcher
// ═══════════════════════════════════════════════════════

pub struct Launcher {
    config: LauncherConfig,
    paths: LauncherPaths,
    metadata: Arc<dyn MetadataSource>,
    events: Arc<dyn EventSink>,
    spawner: Arc<dyn Spawner>,
    downloader: Downloader,
    locator: ExecutableLocator,
    launcher_busy: BusyFlag,
    app_busy: BusyFlag,
    launcher_metadata: RwLock<Option<LauncherDescriptor>>,
    phases: Mutex<HashMap<UpdateTarget, StateMachine>>,
    last_event: Mutex<Option<LauncherEvent>>,
}

impl Launcher {
    pub fn new(
        config: LauncherConfig,
        paths: LauncherPaths,
        metadata: Arc<dyn MetadataSource>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            paths,
            metadata,
            events,
            spawner: Arc::new(DetachedSpawner),
            downloader: Downloader::default(),
            locator: ExecutableLocator::for_current_platform(),
            launcher_busy: BusyFlag::default(),
            app_busy: BusyFlag::default(),
            launcher_metadata: RwLock::new(None),
            phases: Mutex::new(HashMap::new()),
            last_event: Mutex::new(None),
        }
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn with_locator(mut self, locator: ExecutableLocator) -> Self {
        self.locator = locator;
        self
    }

    pub fn with_downloader(mut self, downloader: Downloader) -> Self {
        self.downloader = downloader;
        self
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    pub fn paths(&self) -> &LauncherPaths {
        &self.paths
    }

    pub fn is_updating_launcher(&self) -> bool {
        self.launcher_busy.is_set()
    }

    pub fn is_updating_app(&self) -> bool {
        self.app_busy.is_set()
    }

    /// 마지막으로 보낸 이벤트
    pub fn last_event(&self) -> Option<LauncherEvent> {
        self.last_event.lock().ok().and_then(|e| e.clone())
    }

    pub fn phase(&self, target: UpdateTarget) -> UpdatePhase {
        self.phases
            .lock()
            .ok()
            .and_then(|p| p.get(&target).map(|sm| sm.phase))
            .unwrap_or(UpdatePhase::Idle)
    }

    pub(crate) fn emit(&self, event: &str, args: Vec<serde_json::Value>) {
        if let Ok(mut last) = self.last_event.lock() {
            *last = Some(LauncherEvent::new(event, args.clone()));
        }
        self.events.emit(event, args);
    }

    pub(crate) fn set_phase(&self, target: UpdateTarget, phase: UpdatePhase) {
        let Ok(mut phases) = self.phases.lock() else {
            return;
        };
        let sm = phases.entry(target).or_insert_with(|| StateMachine::new(target));
        if let Err(e) = sm.transition(phase) {
            tracing::warn!("[Launcher] {}", e);
        }
    }

    pub(crate) fn reset_phase(&self, target: UpdateTarget) {
        if let Ok(mut phases) = self.phases.lock() {
            if let Some(sm) = phases.get_mut(&target) {
                sm.reset();
            }
        }
    }

    /// 실패 기록: 로그, 진행 중이던 단계는 Failed로
    pub(crate) fn record_failure(&self, target: UpdateTarget, operation: &str, err: &LauncherError) {
        match err {
            LauncherError::Updater(e) => ErrorContext::new(operation, e.clone())
                .with_component(&target.to_string())
                .log(),
            other => tracing::error!("[Launcher] {} ({}) failed: {}", operation, target, other),
        }
        if self.phase(target).is_busy() {
            self.set_phase(target, UpdatePhase::Failed);
        }
    }

    // ─── 메타데이터 ───

    fn launcher_id(&self) -> Result<&str, LauncherError> {
        self.config
            .launcher_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or(LauncherError::Metadata(MetadataError::MissingLauncherId))
    }

    /// 런처 메타데이터를 가져와 캐시한다. 일시적 오류는 설정된 횟수만큼 재시도
    pub async fn get_launcher_metadata(&self) -> Result<LauncherDescriptor, LauncherError> {
        let launcher_id = self.launcher_id()?;
        let mut strategy =
            RecoveryStrategy::fixed(self.config.metadata_retries.max(1), self.config.metadata_retry_delay());

        let descriptor = loop {
            strategy.increment();
            match self.metadata.fetch_launcher(launcher_id).await {
                Ok(d) => break d,
                Err(e @ (MetadataError::Transport(_) | MetadataError::Decode(_))) if strategy.can_retry() => {
                    tracing::warn!(
                        "[Launcher] Metadata fetch failed (attempt {}/{}): {}",
                        strategy.current_attempt,
                        strategy.max_retries,
                        e
                    );
                    tokio::time::sleep(strategy.next_delay()).await;
                }
                Err(e) => return Err(e.into()),
            }
        };

        *self.launcher_metadata.write().await = Some(descriptor.clone());
        self.emit(events::LAUNCHER_METADATA, vec![json!(descriptor)]);
        Ok(descriptor)
    }

    pub async fn cached_launcher_metadata(&self) -> Option<LauncherDescriptor> {
        self.launcher_metadata.read().await.clone()
    }
}

/// 블로킹 파일 작업(압축 해제, 디렉터리 탐색)을 별도 스레드에서 실행
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, LauncherError>
where
    F: FnOnce() -> Result<T, LauncherError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        LauncherError::io("blocking task", PathBuf::new(), std::io::Error::new(std::io::ErrorKind::Other, e))
    })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_flag_is_exclusive_until_guard_drops() {
        let flag = BusyFlag::default();
        let guard = flag.try_acquire().expect("first acquire");
        assert!(flag.is_set());
        assert!(flag.try_acquire().is_none());
        drop(guard);
        assert!(!flag.is_set());
        assert!(flag.try_acquire().is_some());
    }

    #[test]
    fn paths_are_relative_to_executable() {
        let paths = LauncherPaths::from_exe(PathBuf::from("/opt/le7el/launcher"));
        let id = Uuid::nil();
        assert_eq!(paths.exe_dir, PathBuf::from("/opt/le7el"));
        assert_eq!(paths.app_dir(id), PathBuf::from("/opt/le7el/apps").join(id.to_string()));
        assert_eq!(paths.app_tmp_dir(id), PathBuf::from("/opt/le7el/.tmp").join(id.to_string()));
        assert_eq!(paths.updater_log, PathBuf::from("/opt/le7el/updater.log"));

        let paths = paths.with_updater_payload(Some(PathBuf::from("/srv/updater")));
        assert_eq!(paths.updater_payload, PathBuf::from("/srv/updater"));
    }

    #[test]
    fn availability_codes() {
        assert_eq!(UpdateAvailability::Unknown.code(), -1);
        assert_eq!(UpdateAvailability::UpToDate.code(), 0);
        assert_eq!(UpdateAvailability::Available.code(), 1);
    }
}
