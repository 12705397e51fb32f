//! 그래픽 셸로 보내는 이벤트
//!
//! 오케스트레이터는 단계가 바뀔 때마다 이벤트 이름과 인자 목록을 싱크로 보낸다.
//! 싱크는 절대 블록되거나 실패해서는 안 된다.

use serde_json::Value;
use tokio::sync::broadcast;

pub const LAUNCHER_METADATA: &str = "launcher-metadata";
pub const LAUNCHER_UPDATE_AVAILABLE: &str = "launcher-update-available";
pub const LAUNCHER_UPDATE_PROGRESS: &str = "launcher-update-progress";
pub const LAUNCHER_UPDATE_FAILED: &str = "launcher-update-failed";
pub const LAUNCHER_UPDATE_DOWNLOADED: &str = "launcher-update-downloaded";
pub const LAUNCHER_READY: &str = "launcher-ready";
pub const LAUNCHER_APPS: &str = "launcher-apps";
pub const LAUNCHER_APP: &str = "launcher-app";
pub const APP_UPDATE_AVAILABLE: &str = "app-update-available";
pub const APP_UPDATE_PROGRESS: &str = "app-update-progress";
pub const APP_UPDATE_EXTRACTING: &str = "app-update-extracting";
pub const APP_UPDATE_FAILED: &str = "app-update-failed";
pub const APP_UPDATE_COMPLETED: &str = "app-update-completed";

/// 이벤트 한 건
#[derive(Debug, Clone, PartialEq)]
pub struct LauncherEvent {
    pub name: String,
    pub args: Vec<Value>,
}

impl LauncherEvent {
    pub fn new(name: &str, args: Vec<Value>) -> Self {
        Self { name: name.to_string(), args }
    }
}

/// 이벤트 수신자
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, args: Vec<Value>);
}

/// tokio broadcast 채널로 내보내는 싱크. 구독자가 없으면 조용히 버린다
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<LauncherEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LauncherEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: &str, args: Vec<Value>) {
        let _ = self.tx.send(LauncherEvent::new(event, args));
    }
}

/// 로그로만 남기는 싱크
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &str, args: Vec<Value>) {
        let payload = Value::Array(args);
        tracing::debug!("[Event] {} {}", event, payload);
    }
}
