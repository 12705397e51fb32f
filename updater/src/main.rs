//! 셀프 업데이트 헬퍼 실행 파일
//!
//! 사용법: `updater <new-binary-path> <old-binary-path> [enable-logging]`

use le7el_launcher_updater::handoff::Handoff;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "updater.log";

/// 교체 대상 옆 `updater.log`에 로그를 남긴다. 파일을 못 열면 stderr
fn init_logging(destination: &Path, verbose: bool) {
    let level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let log_dir = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(LOG_FILE));

    match file {
        Ok(file) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init(),
        Err(_) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let handoff = match Handoff::from_args(&args) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    init_logging(&handoff.destination, handoff.logging);
    tracing::info!(
        "[Handoff] Replacing {} with {}",
        handoff.destination.display(),
        handoff.source.display()
    );

    if let Err(e) = handoff.run() {
        tracing::error!("[Handoff] {:#}", e);
        std::process::exit(1);
    }
}
