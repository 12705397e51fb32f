//! 단일 인스턴스 조정
//!
//! 런처 포트(기본 13730)에 먼저 접속해 보고, 성공하면 후속 인스턴스로서
//! 딥링크만 넘기고 종료한다. 실패하면 첫 인스턴스가 되어 두 개의 루프백
//! 리스너를 연다.
//!
//! - 런처 포트: 후속 인스턴스가 EOF까지 보낸 바이트 = 딥링크
//! - 게임 포트: 실행된 앱이 `{"appId": "..."}` 한 줄을 보내고 연결을 유지
//!
//! 딥링크의 `appId`가 등록된 연결이 있으면 그쪽으로 그대로 전달하고,
//! 없으면 앱을 실행한다.

use crate::error::LauncherError;
use crate::orchestrator::Launcher;
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use uuid::Uuid;

pub const APP_ID_PARAM: &str = "appId";

/// 루프백 주소
pub fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

// ═══════════════════════════════════════════════════════
// 인스턴스 선점
// ═══════════════════════════════════════════════════════

#[derive(Debug)]
pub enum InstanceRole {
    /// 리스너를 열어야 하는 첫 인스턴스
    First,
    /// 이미 실행 중인 런처에 연결됨
    Subsequent(TcpStream),
}

pub async fn claim_instance(port: u16, timeout: Duration) -> InstanceRole {
    match tokio::time::timeout(timeout, TcpStream::connect(loopback(port))).await {
        Ok(Ok(stream)) => {
            tracing::info!("[Instance] Another launcher is listening on port {}", port);
            InstanceRole::Subsequent(stream)
        }
        Ok(Err(e)) => {
            tracing::info!("[Instance] No other instance found, starting main instance: {}", e);
            InstanceRole::First
        }
        Err(_) => {
            tracing::info!("[Instance] Claim timed out after {:?}, starting main instance", timeout);
            InstanceRole::First
        }
    }
}

/// 첫 인스턴스에 딥링크를 넘긴다. 보낼 것이 없으면 false
pub async fn forward_deep_link(mut stream: TcpStream, deep_link: Option<&str>) -> io::Result<bool> {
    let link = match deep_link.map(str::trim).filter(|l| !l.is_empty()) {
        Some(l) => l,
        None => {
            tracing::info!("[Instance] No deep link found, exiting subsequent instance");
            return Ok(false);
        }
    };
    tracing::info!("[Instance] Forwarding deep link to main instance: {}", link);
    stream.write_all(link.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(true)
}

// ═══════════════════════════════════════════════════════
// 연결 레지스트리
// ═══════════════════════════════════════════════════════

/// 앱이 딥링크를 읽지 않을 때 쓰기를 기다리는 최대 시간
pub const FORWARD_TIMEOUT: Duration = Duration::from_secs(5);

struct Registration {
    generation: u64,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

/// 앱 id → 실행 중인 앱 프로세스와의 연결.
///
/// 같은 id로 다시 등록하면 이전 연결을 대체한다. 각 등록은 세대 번호를
/// 가지며, 제거는 세대가 일치할 때만 일어난다.
/// 쓰기는 연결별 잠금 아래에서 하고 레지스트리 잠금은 잡지 않는다.
#[derive(Clone)]
pub struct ConnectionRegistry {
    entries: Arc<Mutex<HashMap<String, Registration>>>,
    next_generation: Arc<AtomicU64>,
    forward_timeout: Duration,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self {
            entries: Arc::default(),
            next_generation: Arc::default(),
            forward_timeout: FORWARD_TIMEOUT,
        }
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_forward_timeout(mut self, timeout: Duration) -> Self {
        self.forward_timeout = timeout;
        self
    }

    pub async fn register(&self, app_id: &str, writer: OwnedWriteHalf) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let registration = Registration {
            generation,
            writer: Arc::new(Mutex::new(writer)),
        };
        let previous = self.entries.lock().await.insert(app_id.to_string(), registration);
        if previous.is_some() {
            tracing::debug!("[Instance] Replaced connection for app {}", app_id);
        }
        generation
    }

    /// 등록된 연결로 딥링크를 쓴다.
    ///
    /// 등록이 없으면 `Ok(false)`. 쓰기가 실패하거나 `forward_timeout` 안에 끝나지 않으면
    /// 그 등록을 제거하고 에러를 돌려준다.
    pub async fn forward(&self, app_id: &str, deep_link: &str) -> io::Result<bool> {
        let target = {
            let entries = self.entries.lock().await;
            entries
                .get(app_id)
                .map(|entry| (entry.generation, Arc::clone(&entry.writer)))
        };
        let Some((generation, writer)) = target else {
            return Ok(false);
        };

        let write = async {
            let mut writer = writer.lock().await;
            writer.write_all(deep_link.as_bytes()).await?;
            writer.flush().await
        };
        let written = match tokio::time::timeout(self.forward_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("deep link write stalled for {:?}", self.forward_timeout),
            )),
        };

        match written {
            Ok(()) => Ok(true),
            Err(e) => {
                self.remove(app_id, generation).await;
                tracing::warn!("[Instance] Pruned dead connection for app {}: {}", app_id, e);
                Err(e)
            }
        }
    }

    /// 세대가 일치할 때만 제거. 제거했으면 true
    pub async fn remove(&self, app_id: &str, generation: u64) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.get(app_id) {
            Some(entry) if entry.generation == generation => {
                entries.remove(app_id);
                true
            }
            _ => false,
        }
    }

    pub async fn contains(&self, app_id: &str) -> bool {
        self.entries.lock().await.contains_key(app_id)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

// ═══════════════════════════════════════════════════════
// 라우팅
// ═══════════════════════════════════════════════════════

/// 딥링크로 앱을 실행하는 쪽
#[async_trait]
pub trait AppLauncher: Send + Sync {
    async fn launch_app(&self, id: Uuid) -> Result<PathBuf, LauncherError>;
}

#[async_trait]
impl AppLauncher for Launcher {
    async fn launch_app(&self, id: Uuid) -> Result<PathBuf, LauncherError> {
        Launcher::launch_app(self, id).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// 실행 중인 앱으로 전달됨
    Forwarded(String),
    Launched(PathBuf),
    LaunchFailed(String),
    /// 파싱 실패 또는 `appId` 없음
    Dropped,
}

/// 딥링크에서 `appId` 쿼리 값을 꺼낸다
pub fn app_id_from_link(link: &str) -> Option<String> {
    let url = match Url::parse(link.trim()) {
        Ok(u) => u,
        Err(e) => {
            tracing::warn!("[Instance] Error parsing deep link '{}': {}", link, e);
            return None;
        }
    };
    url.query_pairs()
        .find(|(k, _)| k == APP_ID_PARAM)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Deserialize)]
struct GameClientHello {
    #[serde(rename = "appId")]
    app_id: String,
}

pub struct InstanceCoordinator {
    registry: ConnectionRegistry,
    launcher: Arc<dyn AppLauncher>,
}

impl InstanceCoordinator {
    pub fn new(launcher: Arc<dyn AppLauncher>) -> Self {
        Self::with_registry(launcher, ConnectionRegistry::new())
    }

    pub fn with_registry(launcher: Arc<dyn AppLauncher>, registry: ConnectionRegistry) -> Self {
        Self { registry, launcher }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub async fn route_deep_link(&self, link: &str) -> RouteOutcome {
        tracing::info!("[Instance] Processing deep link: {}", link);
        let Some(app_id) = app_id_from_link(link) else {
            tracing::warn!("[Instance] Deep link has no {} parameter, dropped", APP_ID_PARAM);
            return RouteOutcome::Dropped;
        };

        match self.registry.forward(&app_id, link).await {
            Ok(true) => {
                tracing::info!("[Instance] Deep link forwarded to running app {}", app_id);
                return RouteOutcome::Forwarded(app_id);
            }
            // 등록 없음, 또는 죽은 연결이 방금 정리됨
            Ok(false) | Err(_) => {}
        }

        let id = match Uuid::parse_str(&app_id) {
            Ok(id) => id,
            Err(_) => {
                tracing::warn!("[Instance] Invalid app id in deep link: {}", app_id);
                return RouteOutcome::Dropped;
            }
        };
        match self.launcher.launch_app(id).await {
            Ok(path) => RouteOutcome::Launched(path),
            Err(e) => {
                tracing::error!("[Instance] Error launching app {}: {}", id, e);
                RouteOutcome::LaunchFailed(e.to_string())
            }
        }
    }

    /// 후속 인스턴스의 딥링크를 받는 accept 루프
    pub async fn serve_instances(self: Arc<Self>, listener: TcpListener) {
        tracing::info!("[Instance] Listening for launcher instances on {:?}", listener.local_addr().ok());
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!("[Instance] Error accepting connection: {}", e);
                    continue;
                }
            };
            let coordinator = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = coordinator.handle_instance(stream).await {
                    tracing::error!("[Instance] Error reading deep link from {}: {}", peer, e);
                }
            });
        }
    }

    async fn handle_instance(&self, mut stream: TcpStream) -> io::Result<RouteOutcome> {
        let mut data = Vec::new();
        stream.read_to_end(&mut data).await?;
        let link = String::from_utf8_lossy(&data);
        tracing::info!("[Instance] Received deep link: {}", link);
        Ok(self.route_deep_link(&link).await)
    }

    /// 실행된 앱 프로세스의 콜백 연결을 받는 accept 루프
    pub async fn serve_game_clients(self: Arc<Self>, listener: TcpListener) {
        tracing::info!("[Instance] Listening for game clients on {:?}", listener.local_addr().ok());
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!("[Instance] Error accepting game client connection: {}", e);
                    continue;
                }
            };
            let registry = self.registry.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_game_client(registry, stream).await {
                    tracing::warn!("[Instance] Game client {} rejected: {}", peer, e);
                }
            });
        }
    }
}

async fn handle_game_client(registry: ConnectionRegistry, stream: TcpStream) -> anyhow::Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        anyhow::bail!("connection closed before hello");
    }
    let hello: GameClientHello = serde_json::from_str(line.trim())?;
    let app_id = hello.app_id;

    let generation = registry.register(&app_id, write_half).await;
    tracing::info!("[Instance] Game client connected for app id: {}", app_id);

    // 앱이 연결을 닫으면 등록 해제
    let mut sink = [0u8; 512];
    loop {
        match reader.read(&mut sink).await {
            Ok(0) | Err(_) => break,
            Ok(_) => continue,
        }
    }
    if registry.remove(&app_id, generation).await {
        tracing::info!("[Instance] Game client disconnected for app id: {}", app_id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingLauncher {
        launched: StdMutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl AppLauncher for RecordingLauncher {
        async fn launch_app(&self, id: Uuid) -> Result<PathBuf, LauncherError> {
            self.launched.lock().unwrap().push(id);
            Ok(PathBuf::from(format!("/apps/{}/Metaverse", id)))
        }
    }

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind(loopback(0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), server.unwrap().0)
    }

    #[test]
    fn extracts_app_id() {
        assert_eq!(app_id_from_link("le7el://launch?appId=app-1").as_deref(), Some("app-1"));
        assert_eq!(app_id_from_link("le7el://launch?x=1&appId=a%20b").as_deref(), Some("a b"));
        assert_eq!(app_id_from_link("le7el://launch?appId="), None);
        assert_eq!(app_id_from_link("le7el://launch"), None);
        assert_eq!(app_id_from_link("not a url"), None);
    }

    #[tokio::test]
    async fn routes_to_registered_connection_without_launch() {
        let launcher = Arc::new(RecordingLauncher::default());
        let coordinator = InstanceCoordinator::new(launcher.clone());

        let (mut app_side, launcher_side) = pair().await;
        let (_read, write) = launcher_side.into_split();
        coordinator.registry().register("app-1", write).await;

        let link = "le7el://launch?appId=app-1";
        let outcome = coordinator.route_deep_link(link).await;
        assert_eq!(outcome, RouteOutcome::Forwarded("app-1".into()));

        let mut buf = vec![0u8; link.len()];
        app_side.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, link.as_bytes());
        assert!(launcher.launched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unregistered_app_is_launched() {
        let launcher = Arc::new(RecordingLauncher::default());
        let coordinator = InstanceCoordinator::new(launcher.clone());
        let id = Uuid::new_v4();

        let outcome = coordinator.route_deep_link(&format!("le7el://launch?appId={}", id)).await;
        assert!(matches!(outcome, RouteOutcome::Launched(_)));
        assert_eq!(*launcher.launched.lock().unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn malformed_links_are_dropped() {
        let launcher = Arc::new(RecordingLauncher::default());
        let coordinator = InstanceCoordinator::new(launcher.clone());
        assert_eq!(coordinator.route_deep_link("garbage").await, RouteOutcome::Dropped);
        assert_eq!(coordinator.route_deep_link("le7el://launch").await, RouteOutcome::Dropped);
        assert_eq!(
            coordinator.route_deep_link("le7el://launch?appId=not-a-uuid").await,
            RouteOutcome::Dropped
        );
        assert!(launcher.launched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_generation_does_not_remove_newer_registration() {
        let registry = ConnectionRegistry::new();
        let (_a, first) = pair().await;
        let (_b, second) = pair().await;

        let old = registry.register("app", first.into_split().1).await;
        let new = registry.register("app", second.into_split().1).await;
        assert_ne!(old, new);

        assert!(!registry.remove("app", old).await);
        assert!(registry.contains("app").await);
        assert!(registry.remove("app", new).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn claim_without_listener_is_first() {
        // 바인드 후 바로 닫아 비어 있는 포트를 얻는다
        let port = TcpListener::bind(loopback(0)).await.unwrap().local_addr().unwrap().port();
        let role = claim_instance(port, Duration::from_millis(500)).await;
        assert!(matches!(role, InstanceRole::First));
    }

    #[tokio::test]
    async fn subsequent_instance_forwards_and_main_routes() {
        let listener = TcpListener::bind(loopback(0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let launcher = Arc::new(RecordingLauncher::default());
        let coordinator = Arc::new(InstanceCoordinator::new(launcher.clone()));
        tokio::spawn(Arc::clone(&coordinator).serve_instances(listener));

        let id = Uuid::new_v4();
        let stream = match claim_instance(port, Duration::from_secs(1)).await {
            InstanceRole::Subsequent(s) => s,
            InstanceRole::First => panic!("listener should be claimed"),
        };
        let link = format!("le7el://launch?appId={}", id);
        assert!(forward_deep_link(stream, Some(&link)).await.unwrap());

        for _ in 0..50 {
            if !launcher.launched.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(*launcher.launched.lock().unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn forward_without_link_writes_nothing() {
        let (client, _server) = pair().await;
        assert!(!forward_deep_link(client, None).await.unwrap());
    }

    #[tokio::test]
    async fn game_client_registers_and_unregisters_on_disconnect() {
        let listener = TcpListener::bind(loopback(0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let coordinator = Arc::new(InstanceCoordinator::new(Arc::new(RecordingLauncher::default())));
        tokio::spawn(Arc::clone(&coordinator).serve_game_clients(listener));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"{\"appId\":\"app-7\"}\n").await.unwrap();

        let registry = coordinator.registry().clone();
        for _ in 0..50 {
            if registry.contains("app-7").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(registry.contains("app-7").await);

        let outcome = coordinator.route_deep_link("le7el://open?appId=app-7&level=2").await;
        assert_eq!(outcome, RouteOutcome::Forwarded("app-7".into()));
        let mut buf = vec![0u8; "le7el://open?appId=app-7&level=2".len()];
        client.read_exact(&mut buf).await.unwrap();

        drop(client);
        for _ in 0..50 {
            if !registry.contains("app-7").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!registry.contains("app-7").await);
    }

    #[tokio::test]
    async fn failed_write_prunes_connection_and_launches() {
        let launcher = Arc::new(RecordingLauncher::default());
        let coordinator = InstanceCoordinator::new(launcher.clone());
        let id = Uuid::new_v4();

        let (_app_side, launcher_side) = pair().await;
        let (_read, mut write) = launcher_side.into_split();
        write.shutdown().await.unwrap();
        coordinator.registry().register(&id.to_string(), write).await;

        let outcome = coordinator.route_deep_link(&format!("le7el://join?appId={}", id)).await;
        assert!(matches!(outcome, RouteOutcome::Launched(_)));
        assert_eq!(*launcher.launched.lock().unwrap(), vec![id]);
        assert!(coordinator.registry().is_empty().await);
    }

    #[tokio::test]
    async fn stalled_client_does_not_block_registry() {
        let registry = ConnectionRegistry::new().with_forward_timeout(Duration::from_millis(300));
        // 읽지 않는 앱. 소켓 버퍼가 차면 쓰기가 멈춘다
        let (_stalled_app, launcher_side) = pair().await;
        let (_read, write) = launcher_side.into_split();
        registry.register("stalled", write).await;

        let forward = tokio::spawn({
            let registry = registry.clone();
            let huge = "x".repeat(64 * 1024 * 1024);
            async move { registry.forward("stalled", &huge).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (_other_app, other_side) = pair().await;
        let (_other_read, other_write) = other_side.into_split();
        tokio::time::timeout(Duration::from_millis(100), registry.register("other", other_write))
            .await
            .expect("register blocked by a stalled forward");
        assert!(registry.contains("other").await);

        let err = forward.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(!registry.contains("stalled").await);
        assert!(registry.contains("other").await);
    }
}
