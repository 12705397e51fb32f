//! # LE7EL 런처 업데이트 라이브러리
//!
//! 런처 본체와 런처가 관리하는 앱의 다운로드/설치 단계를 담당합니다.
//! 어떤 릴리스를 언제 설치할지는 런처 쪽 오케스트레이터가 결정하고,
//! 이 크레이트는 결정된 작업을 디스크에 반영하는 부품만 제공합니다.
//!
//! ## 구성
//! - **version.rs**: SemVer 비교, 디렉터리별 `version` 마커 읽기/쓰기
//! - **release.rs**: 릴리스/파일 디스크립터, 플랫폼별 파일 선택, 최신 버전 계산
//! - **download.rs**: 스트리밍 다운로드 (진행률 보고, `.part` 이어받기)
//! - **archive.rs**: zip 압축 해제 (경로 탈출 차단)
//! - **handoff.rs**: 셀프 업데이트 헬퍼(`updater` 바이너리)의 교체/재실행 로직
//! - **error.rs**: I/O 계층 에러와 재시도 전략
//!
//! ## 디렉터리 구조
//! ```text
//! <exe-dir>/
//!   version              런처 버전 마커
//!   updater[.exe]        셀프 업데이트 헬퍼
//!   .tmp/                다운로드 스크래치 영역
//!   apps/<app-id>/       앱 설치 디렉터리 (각자 version 마커 보유)
//! ```

// ═══════════════════════════════════════════════════════
// 모듈
// ═══════════════════════════════════════════════════════

pub mod archive;
pub mod download;
pub mod error;
pub mod handoff;
pub mod release;
pub mod version;

pub use archive::extract_archive;
pub use download::{Downloader, ProgressTracker};
pub use error::{ErrorContext, RecoveryStrategy, UpdaterError};
pub use handoff::{spawn_detached, Handoff};
pub use release::{
    current_platform, is_update_available, latest_version, release_files, resolve_applicable_file,
    EntityPage, FileDescriptor, FileKind, LatestVersionPolicy, ReleaseDescriptor,
};
pub use version::{read_version, read_version_opt, write_version, SemVer};
