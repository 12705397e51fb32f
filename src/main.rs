use le7el_launcher::config::LauncherConfig;
use le7el_launcher::events::{self, BroadcastSink, EventSink};
use le7el_launcher::instance::{self, InstanceCoordinator, InstanceRole};
use le7el_launcher::metadata::ApiClient;
use le7el_launcher::orchestrator::{Launcher, LauncherPaths};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "launcher.log";

/// 로그 파일 위치. 실행 파일 옆에 쓸 수 없으면 Windows에서는 `%APPDATA%\LE7EL\logs`
fn log_candidates(exe_dir: &Path) -> Vec<PathBuf> {
    let mut dirs = vec![exe_dir.to_path_buf()];
    if cfg!(windows) {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            dirs.push(PathBuf::from(appdata).join("LE7EL").join("logs"));
        }
    }
    dirs
}

fn init_logging(config: &LauncherConfig, exe_dir: &Path) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging {
        for dir in log_candidates(exe_dir) {
            if std::fs::create_dir_all(&dir).is_err() {
                continue;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(LOG_FILE));
            if let Ok(file) = file {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .init();
                return;
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = LauncherConfig::load()?;
    let paths = LauncherPaths::current()?.with_updater_payload(config.updater_payload.clone());
    init_logging(&config, &paths.exe_dir);
    tracing::info!("[Launcher] Starting from {}", paths.exe_path.display());

    let deep_link = std::env::args().nth(1);

    // 이미 실행 중인 런처가 있으면 딥링크만 넘기고 종료
    match instance::claim_instance(config.launcher_port, config.claim_timeout()).await {
        InstanceRole::Subsequent(stream) => {
            if let Err(e) = instance::forward_deep_link(stream, deep_link.as_deref()).await {
                tracing::error!("[Instance] Error sending deep link: {}", e);
            }
            return Ok(());
        }
        InstanceRole::First => {}
    }

    let metadata = ApiClient::new(&config.api_url, &config.platform).with_token(config.api_token.clone());
    let sink = Arc::new(BroadcastSink::new(256));
    let mut receiver = sink.subscribe();
    let events: Arc<dyn EventSink> = sink.clone();
    let launcher = Arc::new(Launcher::new(config.clone(), paths, Arc::new(metadata), events));

    // 셸 대신 이벤트를 로그로 흘린다
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => tracing::debug!("[Launcher] event {} {:?}", event.name, event.args),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("[Launcher] Event log lagged by {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let coordinator = Arc::new(InstanceCoordinator::new(launcher.clone()));
    let instance_listener = TcpListener::bind(instance::loopback(config.launcher_port)).await?;
    let game_listener = TcpListener::bind(instance::loopback(config.game_port)).await?;
    tokio::spawn(Arc::clone(&coordinator).serve_instances(instance_listener));
    tokio::spawn(Arc::clone(&coordinator).serve_game_clients(game_listener));

    if let Some(link) = deep_link.as_deref().filter(|l| !l.trim().is_empty()) {
        let outcome = coordinator.route_deep_link(link).await;
        tracing::info!("[Launcher] Startup deep link: {:?}", outcome);
    }

    sink.emit(events::LAUNCHER_READY, vec![]);

    if let Err(e) = launcher.check_for_updates().await {
        tracing::warn!("[Launcher] Update check failed: {}", e);
    }

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("[Launcher] Shutdown signal received, exiting");
    Ok(())
}
