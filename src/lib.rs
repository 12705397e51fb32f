pub mod config;
pub mod error;
pub mod events;
pub mod instance;
pub mod locator;
pub mod metadata;
pub mod orchestrator;  // 런처/앱 업데이트 상태 머신

pub use config::LauncherConfig;
pub use error::LauncherError;
pub use orchestrator::{Launcher, LauncherPaths, UpdateAvailability};
