//! 셀프 업데이트 핸드오프
//!
//! 런처는 새 바이너리를 받은 뒤 `updater <new> <old> [enable-logging]`를 띄우고 종료한다.
//! 업데이터는 구 바이너리가 풀릴 때까지 삭제를 재시도하고, 새 바이너리를 그 자리로 옮긴 뒤
//! 실행한다.

use anyhow::{bail, Context, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// 구 바이너리 삭제 최대 시도 횟수
pub const REMOVE_ATTEMPTS: u32 = 42;
/// 삭제 재시도 간격
pub const REMOVE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// 콘솔 창 없이 부모와 분리된 프로세스를 띄운다
pub fn spawn_detached<S: AsRef<OsStr>>(program: &Path, args: &[S], cwd: Option<&Path>) -> std::io::Result<Child> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        // DETACHED_PROCESS | CREATE_BREAKAWAY_FROM_JOB | CREATE_NEW_PROCESS_GROUP
        cmd.creation_flags(0x00000008 | 0x01000000 | 0x00000200);
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
}

/// 바이너리 교체 작업 한 건
#[derive(Debug, Clone)]
pub struct Handoff {
    /// 새로 받은 바이너리
    pub source: PathBuf,
    /// 교체할 (현재 실행 중이던) 바이너리
    pub destination: PathBuf,
    pub logging: bool,
    pub attempts: u32,
    pub retry_delay: Duration,
}

impl Handoff {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>, logging: bool) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            logging,
            attempts: REMOVE_ATTEMPTS,
            retry_delay: REMOVE_RETRY_DELAY,
        }
    }

    /// 프로그램 이름을 뺀 인자 목록에서 생성
    pub fn from_args(args: &[String]) -> Result<Self> {
        match args {
            [source, destination] => Ok(Self::new(source, destination, false)),
            [source, destination, flag] => Ok(Self::new(source, destination, flag == "true")),
            _ => bail!("usage: updater <new-binary-path> <old-binary-path> [enable-logging]"),
        }
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    /// 구 바이너리를 삭제한다. 실행 중이던 프로세스가 파일을 놓을 때까지 재시도
    pub fn remove_destination(&self) -> Result<()> {
        let mut last_err = None;
        for attempt in 1..=self.attempts {
            match std::fs::remove_file(&self.destination) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => {
                    if self.logging {
                        tracing::warn!(
                            "[Handoff] remove {} failed (attempt {}/{}): {}",
                            self.destination.display(), attempt, self.attempts, e
                        );
                    }
                    last_err = Some(e);
                    if attempt < self.attempts {
                        std::thread::sleep(self.retry_delay);
                    }
                }
            }
        }
        match last_err {
            Some(e) => Err(e).with_context(|| {
                format!(
                    "Failed to remove {} after {} attempts",
                    self.destination.display(),
                    self.attempts
                )
            }),
            None => Ok(()),
        }
    }

    /// 구 바이너리 삭제 후 새 바이너리를 그 자리로 옮긴다.
    /// 새 바이너리가 없으면 로그만 남긴다.
    pub fn replace(&self) -> Result<()> {
        self.remove_destination()?;
        match std::fs::rename(&self.source, &self.destination) {
            Ok(()) => {
                if self.logging {
                    tracing::info!(
                        "[Handoff] {} -> {}",
                        self.source.display(),
                        self.destination.display()
                    );
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("[Handoff] New binary {} not found: {}", self.source.display(), e);
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!(
                        "Failed to move {} -> {}",
                        self.source.display(),
                        self.destination.display()
                    )
                });
            }
        }
        Ok(())
    }

    fn absolute_destination(&self) -> Result<PathBuf> {
        if self.destination.is_absolute() {
            return Ok(self.destination.clone());
        }
        let cwd = std::env::current_dir().context("Failed to resolve working directory")?;
        Ok(cwd.join(&self.destination))
    }

    /// 교체된 바이너리를 실행
    pub fn relaunch(&self) -> Result<Child> {
        let exe = self.absolute_destination()?;
        let no_args: [&str; 0] = [];
        let child = spawn_detached(&exe, &no_args, exe.parent())
            .with_context(|| format!("Failed to start {}", exe.display()))?;
        if self.logging {
            tracing::info!("[Handoff] Started {} (pid {})", exe.display(), child.id());
        }
        Ok(child)
    }

    pub fn run(&self) -> Result<()> {
        self.replace()?;
        self.relaunch()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(handoff: Handoff) -> Handoff {
        handoff.with_retry(3, Duration::from_millis(1))
    }

    #[test]
    fn parses_cli_arguments() {
        let args = vec!["new.bin".to_string(), "old.bin".to_string()];
        let h = Handoff::from_args(&args).unwrap();
        assert_eq!(h.source, PathBuf::from("new.bin"));
        assert_eq!(h.destination, PathBuf::from("old.bin"));
        assert!(!h.logging);
        assert_eq!(h.attempts, REMOVE_ATTEMPTS);

        let args = vec!["a".to_string(), "b".to_string(), "true".to_string()];
        assert!(Handoff::from_args(&args).unwrap().logging);
        assert!(Handoff::from_args(&["only-one".to_string()]).is_err());
    }

    #[test]
    fn replaces_destination_with_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("launcher.new");
        let dst = dir.path().join("launcher");
        std::fs::write(&src, b"v2").unwrap();
        std::fs::write(&dst, b"v1").unwrap();

        fast(Handoff::new(&src, &dst, false)).replace().unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"v2");
        assert!(!src.exists());
    }

    #[test]
    fn missing_source_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("launcher");
        std::fs::write(&dst, b"v1").unwrap();

        fast(Handoff::new(dir.path().join("absent"), &dst, true)).replace().unwrap();
        assert!(!dst.exists());
    }

    #[test]
    fn gives_up_after_bounded_attempts() {
        let dir = tempfile::tempdir().unwrap();
        // 디렉터리는 remove_file로 지울 수 없다
        let dst = dir.path().join("locked");
        std::fs::create_dir(&dst).unwrap();

        let err = fast(Handoff::new(dir.path().join("new"), &dst, false))
            .remove_destination()
            .unwrap_err();
        assert!(err.to_string().contains("after 3 attempts"));
        assert!(dst.exists());
    }

    #[test]
    fn relaunch_fails_for_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let h = Handoff::new(dir.path().join("a"), dir.path().join("gone"), false);
        assert!(h.relaunch().is_err());
    }
}
