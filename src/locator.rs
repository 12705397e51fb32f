//! Finds the entry point of an installed app.
//!
//! Tiers, first hit wins:
//! 1. `<dir>/<id><suffix>`
//! 2. `<dir>/<name><suffix>`
//! 3. `<dir>/Metaverse<suffix>`
//! 4. recursive walk: first native executable, else the last regular file seen

use crate::error::LauncherError;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Fallback binary name used by the default app template.
pub const DEFAULT_EXECUTABLE: &str = "Metaverse";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableLocator {
    suffix: String,
}

impl Default for ExecutableLocator {
    fn default() -> Self {
        Self::for_current_platform()
    }
}

impl ExecutableLocator {
    pub fn new(suffix: &str) -> Self {
        Self { suffix: suffix.to_string() }
    }

    pub fn for_current_platform() -> Self {
        Self::new(std::env::consts::EXE_SUFFIX)
    }

    /// `.exe` naming regardless of host OS.
    pub fn windows() -> Self {
        Self::new(".exe")
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn locate(&self, dir: &Path, id: &str, name: &str) -> Result<PathBuf, LauncherError> {
        if !dir.is_dir() {
            return Err(LauncherError::ExecutableNotFound(dir.to_path_buf()));
        }
        let dir = absolute(dir)?;

        let named = [id, name, DEFAULT_EXECUTABLE];
        for stem in named.iter().filter(|s| !s.is_empty()) {
            let candidate = dir.join(format!("{}{}", stem, self.suffix));
            if candidate.is_file() {
                tracing::debug!("[Locator] Matched {}", candidate.display());
                return Ok(candidate);
            }
        }

        let mut last_file = None;
        for entry in WalkDir::new(&dir).sort_by_file_name().into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            if is_native_executable(entry.path()) {
                tracing::debug!("[Locator] Found executable {}", entry.path().display());
                return Ok(entry.into_path());
            }
            last_file = Some(entry.into_path());
        }

        last_file.ok_or(LauncherError::ExecutableNotFound(dir))
    }
}

fn absolute(dir: &Path) -> Result<PathBuf, LauncherError> {
    if dir.is_absolute() {
        return Ok(dir.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| LauncherError::io("resolve", dir, e))?;
    Ok(cwd.join(dir))
}

/// PE, ELF or Mach-O (thin or fat) header.
pub fn is_native_executable(path: &Path) -> bool {
    let mut magic = [0u8; 4];
    let read = match std::fs::File::open(path).and_then(|mut f| f.read(&mut magic)) {
        Ok(n) => n,
        Err(_) => return false,
    };
    if read >= 2 && &magic[..2] == b"MZ" {
        return true;
    }
    if read < 4 {
        return false;
    }
    matches!(
        magic,
        [0x7f, b'E', b'L', b'F']
            | [0xfe, 0xed, 0xfa, 0xce]
            | [0xfe, 0xed, 0xfa, 0xcf]
            | [0xce, 0xfa, 0xed, 0xfe]
            | [0xcf, 0xfa, 0xed, 0xfe]
            | [0xca, 0xfe, 0xba, 0xbe]
    )
}
