//! zip 아카이브 설치
//!
//! 각 엔트리 경로를 대상 디렉터리 기준으로 정규화해서, 밖으로 벗어나는 엔트리가 있으면
//! 그 엔트리를 한 바이트도 쓰기 전에 중단한다. 트랜잭션이 아니므로 실패 시 앞서 풀린
//! 파일은 남는다 (호출자가 디렉터리를 지우고 다시 시도).

use crate::error::UpdaterError;
use std::fs::File;
use std::path::{Component, Path, PathBuf};

/// 엔트리 이름을 `destination` 아래 경로로 변환. 벗어나면 `None`
pub fn enclosed_path(destination: &Path, entry_name: &str) -> Option<PathBuf> {
    let normalized = entry_name.replace('\\', "/");
    let mut out = destination.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if depth == 0 {
        return None;
    }
    Some(out)
}

/// `archive_path`를 `destination`에 풀고, 기록한 파일 수를 돌려준다
pub fn extract_archive(archive_path: &Path, destination: &Path) -> Result<usize, UpdaterError> {
    std::fs::create_dir_all(destination)
        .map_err(|e| UpdaterError::from_io(&e, "create directory", destination))?;

    let archive_err = |message: String| UpdaterError::ArchiveError {
        path: archive_path.display().to_string(),
        message,
    };

    let file = File::open(archive_path).map_err(|e| UpdaterError::from_io(&e, "open", archive_path))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| archive_err(e.to_string()))?;

    let mut written = 0usize;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| archive_err(e.to_string()))?;
        let name = entry.name().to_string();
        let out_path = match enclosed_path(destination, &name) {
            Some(path) => path,
            None if name.trim_matches(|c: char| c == '/' || c == '.').is_empty() && entry.is_dir() => continue,
            None => {
                tracing::error!("[Archive] Rejected entry '{}' in {}", name, archive_path.display());
                return Err(UpdaterError::PathTraversal { entry: name });
            }
        };

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)
                .map_err(|e| UpdaterError::from_io(&e, "create directory", &out_path))?;
        } else {
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| UpdaterError::from_io(&e, "create directory", parent))?;
            }
            let mut outfile = File::create(&out_path)
                .map_err(|e| UpdaterError::from_io(&e, "create", &out_path))?;
            std::io::copy(&mut entry, &mut outfile)
                .map_err(|e| UpdaterError::from_io(&e, "extract", &out_path))?;
            written += 1;
        }

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            // 소유자 rw(x)는 항상 유지
            let owner = if entry.is_dir() { 0o700 } else { 0o600 };
            let perms = std::fs::Permissions::from_mode((mode & 0o7777) | owner);
            std::fs::set_permissions(&out_path, perms)
                .map_err(|e| UpdaterError::from_io(&e, "chmod", &out_path))?;
        }
    }

    tracing::info!(
        "[Archive] Extracted {} files from {} into {}",
        written,
        archive_path.display(),
        destination.display()
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn build_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = FileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .unix_permissions(0o755);
        for (name, data) in entries {
            if name.ends_with('/') {
                zip.add_directory(*name, options).unwrap();
            } else {
                zip.start_file(*name, options).unwrap();
                zip.write_all(data.as_bytes()).unwrap();
            }
        }
        zip.finish().unwrap();
    }

    #[test]
    fn enclosed_path_rejects_escapes() {
        let dest = Path::new("/opt/apps/x");
        assert_eq!(enclosed_path(dest, "bin/game"), Some(dest.join("bin").join("game")));
        assert_eq!(enclosed_path(dest, "./a/./b"), Some(dest.join("a").join("b")));
        assert_eq!(enclosed_path(dest, "../evil"), None);
        assert_eq!(enclosed_path(dest, "a/../../evil"), None);
        assert_eq!(enclosed_path(dest, "/etc/passwd"), None);
        assert_eq!(enclosed_path(dest, "..\\evil"), None);
    }

    #[test]
    fn extracts_nested_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("app.zip");
        build_zip(
            &archive,
            &[("Game/", ""), ("Game/Game.exe", "MZ..."), ("Game/data/a.pak", "aaaa")],
        );

        let dest = tmp.path().join("apps").join("x");
        let count = extract_archive(&archive, &dest).unwrap();
        assert_eq!(count, 2);
        assert_eq!(std::fs::read(dest.join("Game/Game.exe")).unwrap(), b"MZ...");
        assert_eq!(std::fs::read(dest.join("Game/data/a.pak")).unwrap(), b"aaaa");
    }

    #[cfg(unix)]
    #[test]
    fn applies_recorded_mode() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("app.zip");
        build_zip(&archive, &[("run.sh", "#!/bin/sh\n")]);
        let dest = tmp.path().join("out");
        extract_archive(&archive, &dest).unwrap();
        let mode = std::fs::metadata(dest.join("run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn traversal_entry_aborts_before_writing() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("bad.zip");
        build_zip(&archive, &[("ok.txt", "fine"), ("../evil", "pwned")]);

        let dest = tmp.path().join("dest");
        let err = extract_archive(&archive, &dest).unwrap_err();
        assert_eq!(err, UpdaterError::PathTraversal { entry: "../evil".into() });
        assert!(!tmp.path().join("evil").exists());
        // 트랜잭션이 아니므로 앞선 엔트리는 남는다
        assert!(dest.join("ok.txt").exists());
    }

    #[test]
    fn corrupt_archive_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("broken.zip");
        std::fs::write(&archive, b"definitely not a zip").unwrap();
        let err = extract_archive(&archive, &tmp.path().join("d")).unwrap_err();
        assert!(matches!(err, UpdaterError::ArchiveError { .. }));
    }
}
