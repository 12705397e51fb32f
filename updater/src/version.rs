//! 시맨틱 버전 비교 유틸리티와 디렉터리별 버전 마커 저장소
//!
//! 런처 디렉터리와 각 앱 설치 디렉터리에는 `version` 파일 하나가 있고,
//! 그 안에 현재 설치된 버전 문자열이 들어 있다. 파일이 없으면 "설치된 적 없음"으로 본다.

use crate::error::UpdaterError;
use std::cmp::Ordering;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// 버전 마커 파일명
pub const VERSION_FILE: &str = "version";
const VERSION_TMP_FILE: &str = ".version.tmp";

/// 시맨틱 버전 (major.minor.patch[-prerelease][+build])
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
}

impl SemVer {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self { major, minor, patch, prerelease: None }
    }

    /// "v1.2.3", "1.2", "1.2.3-beta.1+build.5" 형식을 파싱
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let s = s.strip_prefix('v').unwrap_or(s);
        // 빌드 메타데이터는 비교에 쓰지 않음
        let s = s.split('+').next().unwrap_or(s);
        let (version_part, prerelease) = match s.find('-') {
            Some(idx) => {
                let pre = &s[idx + 1..];
                if pre.is_empty() {
                    return None;
                }
                (&s[..idx], Some(pre.to_string()))
            }
            None => (s, None),
        };

        let parts: Vec<&str> = version_part.split('.').collect();
        if parts.is_empty() || parts.len() > 3 {
            return None;
        }

        let major = parts[0].parse().ok()?;
        let minor = match parts.get(1) {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        let patch = match parts.get(2) {
            Some(p) => p.parse().ok()?,
            None => 0,
        };

        Some(Self { major, minor, patch, prerelease })
    }

    /// 파싱 실패를 에러로 돌려주는 버전
    pub fn parse_strict(s: &str) -> Result<Self, UpdaterError> {
        Self::parse(s).ok_or_else(|| UpdaterError::VersionParse { input: s.to_string() })
    }

    /// 현재 버전보다 새로운 버전인지 확인
    pub fn is_newer_than(&self, other: &SemVer) -> bool {
        self > other
    }

    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }
}

impl FromStr for SemVer {
    type Err = UpdaterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_strict(s)
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(ref pre) = self.prerelease {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

/// 프리릴리스 식별자 비교: 숫자끼리는 수치로, 숫자는 문자열보다 낮음
fn compare_prerelease(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(nx), Ok(ny)) => nx.cmp(&ny),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

impl Ord for SemVer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => compare_prerelease(a, b),
            })
    }
}

impl PartialOrd for SemVer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ═══════════════════════════════════════════════════════
// 버전 마커 저장소
// ═══════════════════════════════════════════════════════

pub fn version_file_path(dir: &Path) -> PathBuf {
    dir.join(VERSION_FILE)
}

/// `<dir>/version`을 읽어 파싱한다.
///
/// 파일이 없으면 [`UpdaterError::VersionNotFound`], 내용이 잘못되었으면
/// [`UpdaterError::VersionParse`]를 돌려준다.
pub fn read_version(dir: &Path) -> Result<SemVer, UpdaterError> {
    let path = version_file_path(dir);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(UpdaterError::VersionNotFound {
                path: path.display().to_string(),
            });
        }
        Err(e) => return Err(UpdaterError::from_io(&e, "read version", &path)),
    };
    SemVer::parse_strict(content.trim())
}

/// 마커가 없으면 `None`
pub fn read_version_opt(dir: &Path) -> Result<Option<SemVer>, UpdaterError> {
    match read_version(dir) {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// 임시 파일에 쓴 뒤 rename으로 교체한다. 중간에 죽어도 기존 마커는 온전하다.
pub fn write_version(dir: &Path, version: &SemVer) -> Result<(), UpdaterError> {
    std::fs::create_dir_all(dir).map_err(|e| UpdaterError::from_io(&e, "create directory", dir))?;

    let tmp = dir.join(VERSION_TMP_FILE);
    let target = version_file_path(dir);
    {
        let mut file = std::fs::File::create(&tmp)
            .map_err(|e| UpdaterError::from_io(&e, "create version", &tmp))?;
        file.write_all(version.to_string().as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| UpdaterError::from_io(&e, "write version", &tmp))?;
    }
    std::fs::rename(&tmp, &target).map_err(|e| UpdaterError::from_io(&e, "commit version", &target))?;

    tracing::debug!("[Version] {} -> {}", target.display(), version);
    Ok(())
}
