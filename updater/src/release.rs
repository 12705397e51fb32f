//! 릴리스/파일 디스크립터와 적용 대상 파일 선택 로직
//!
//! 원격 API가 돌려주는 릴리스 목록은 최신순으로 정렬되어 있다고 가정한다.
//! 여기의 함수들은 순수 데이터만 다루며 I/O를 하지 않는다.

use crate::error::UpdaterError;
use crate::version::SemVer;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 페이지 단위 컬렉션 (`{entities, offset, limit, total}`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityPage<T> {
    #[serde(default = "Vec::new")]
    pub entities: Vec<T>,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub total: u64,
}

impl<T> Default for EntityPage<T> {
    fn default() -> Self {
        Self { entities: Vec::new(), offset: 0, limit: 0, total: 0 }
    }
}

impl<T> EntityPage<T> {
    pub fn from_entities(entities: Vec<T>) -> Self {
        let total = entities.len() as u64;
        Self { entities, offset: 0, limit: total, total }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// 릴리스 파일의 용도
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileKind {
    /// 런처 자체 바이너리
    Launcher,
    /// 설치 트리에 그대로 배치되는 낱개 파일
    Release,
    /// 설치 디렉터리에 풀리는 압축 파일
    ReleaseArchive,
    #[serde(other)]
    Other,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Launcher => "launcher",
            FileKind::Release => "release",
            FileKind::ReleaseArchive => "release-archive",
            FileKind::Other => "other",
        }
    }
}

/// 릴리스에 포함된 파일 하나
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: FileKind,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub original_path: Option<String>,
    #[serde(default)]
    pub mime: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
}

impl FileDescriptor {
    /// 로컬에 저장할 상대 경로. 원본 경로가 없으면 파일 id를 쓴다
    pub fn file_name(&self) -> String {
        match self.original_path.as_deref() {
            Some(p) if !p.trim().is_empty() => p.to_string(),
            _ => self.id.to_string(),
        }
    }

    /// 빈 플랫폼은 모든 플랫폼에 적용된다
    pub fn matches(&self, platform: &str, kind: FileKind) -> bool {
        self.kind == kind && (self.platform.is_empty() || self.platform.eq_ignore_ascii_case(platform))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseDescriptor {
    pub id: Uuid,
    pub version: String,
    #[serde(default)]
    pub archive: bool,
    #[serde(default)]
    pub files: EntityPage<FileDescriptor>,
}

impl ReleaseDescriptor {
    pub fn semver(&self) -> Result<SemVer, UpdaterError> {
        SemVer::parse_strict(&self.version)
    }
}

/// 최신 버전을 고르는 방식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatestVersionPolicy {
    /// 가장 높은 버전
    #[default]
    Highest,
    /// 구버전 런처와 동일하게 비교 결과가 뒤집힌 선택 (가장 낮은 버전)
    LegacyLowest,
}

/// 플랫폼·타입이 맞는 첫 번째 파일. 같은 입력에 대해 항상 같은 파일을 돌려준다
pub fn resolve_applicable_file<'a>(
    release: &'a ReleaseDescriptor,
    platform: &str,
    kind: FileKind,
) -> Result<&'a FileDescriptor, UpdaterError> {
    release
        .files
        .entities
        .iter()
        .find(|f| f.matches(platform, kind))
        .ok_or_else(|| UpdaterError::NoReleaseFiles {
            kind: kind.as_str().to_string(),
            platform: platform.to_string(),
        })
}

/// 조건에 맞는 모든 파일 (낱개 파일 릴리스용), 원래 순서 유지
pub fn release_files<'a>(
    release: &'a ReleaseDescriptor,
    platform: &str,
    kind: FileKind,
) -> Vec<&'a FileDescriptor> {
    release
        .files
        .entities
        .iter()
        .filter(|f| f.matches(platform, kind))
        .collect()
}

pub fn latest_version(
    releases: &[ReleaseDescriptor],
    policy: LatestVersionPolicy,
) -> Result<SemVer, UpdaterError> {
    let mut iter = releases.iter();
    let first = iter.next().ok_or(UpdaterError::NoReleases)?;
    let mut latest = first.semver()?;
    for release in iter {
        let v = release.semver()?;
        let replace = match policy {
            LatestVersionPolicy::Highest => v > latest,
            LatestVersionPolicy::LegacyLowest => latest > v,
        };
        if replace {
            latest = v;
        }
    }
    Ok(latest)
}

/// 현재 버전이 없으면 항상 업데이트 대상
pub fn is_update_available(latest: &SemVer, current: Option<&SemVer>) -> bool {
    match current {
        Some(current) => latest > current,
        None => true,
    }
}

/// 실행 중인 OS에 해당하는 플랫폼 이름 (`Win64`, `Mac`, `Linux`)
pub fn current_platform() -> &'static str {
    if cfg!(target_os = "windows") {
        "Win64"
    } else if cfg!(target_os = "macos") {
        "Mac"
    } else {
        "Linux"
    }
}
