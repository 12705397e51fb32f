//! 스트리밍 다운로드 파이프라인
//!
//! 응답 본문을 `<dest>.part`에 청크 단위로 기록하고, 끝나면 `dest`로 rename한다.
//! `.part` 파일이 남아 있고 같은 URL에서 받던 것이면 `Range` 요청으로 이어받는다.
//! 받던 URL은 `<dest>.part.src`에 기록한다.
//! 재시도는 호출자 몫이다.

use crate::error::UpdaterError;
use futures_util::StreamExt;
use reqwest::header::RANGE;
use reqwest::StatusCode;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// 진행률 콜백 호출 빈도 제한
///
/// 전체 크기의 1%마다, 그리고 완료 시점에 한 번 보고한다.
/// 전체 크기를 모르면 청크마다 보고한다.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: u64,
    step: u64,
    last_reported: Option<u64>,
}

impl ProgressTracker {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            step: (total / 100).max(1),
            last_reported: None,
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// 이번 값을 보고해야 하면 true (내부 상태 갱신)
    pub fn should_report(&mut self, transferred: u64) -> bool {
        let due = match self.last_reported {
            None => true,
            Some(last) if transferred <= last => false,
            Some(_) if self.total == 0 => true,
            Some(_) if transferred >= self.total => true,
            Some(last) => transferred - last >= self.step,
        };
        if due {
            self.last_reported = Some(transferred);
        }
        due
    }

    /// 마지막 값이 아직 보고되지 않았으면 true
    pub fn finish(&mut self, transferred: u64) -> bool {
        if self.last_reported == Some(transferred) {
            return false;
        }
        self.last_reported = Some(transferred);
        true
    }
}

/// `<path>.part`
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

/// `<path>.part.src` (이어받을 `.part`의 원본 URL)
pub fn partial_source_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".part.src");
    PathBuf::from(name)
}

/// `.part`를 이어받을 수 있으면 그 길이, 아니면 잔여물을 지우고 0
async fn resumable_offset(part: &Path, source: &Path, url: &str, expected_size: Option<u64>) -> u64 {
    let len = match tokio::fs::metadata(part).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => 0,
    };
    if len == 0 {
        return 0;
    }

    let same_source = tokio::fs::read_to_string(source)
        .await
        .map_or(false, |recorded| recorded.trim() == url);
    let too_long = expected_size.map_or(false, |size| len >= size);
    if same_source && !too_long {
        return len;
    }

    if !same_source {
        tracing::info!("[Download] Discarding partial file {} from another source", part.display());
    }
    tokio::fs::remove_file(part).await.ok();
    tokio::fs::remove_file(source).await.ok();
    0
}

/// reqwest 클라이언트를 감싼 다운로더
#[derive(Debug, Clone)]
pub struct Downloader {
    http: reqwest::Client,
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl Downloader {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// `url`을 `dest`로 받는다. 반환값은 최종 파일 크기.
    ///
    /// `on_progress(transferred, total)`의 `total`은 `expected_size`가 있으면 그 값,
    /// 없으면 응답의 Content-Length(이어받기 오프셋 포함)이다.
    pub async fn download<F>(
        &self,
        dest: &Path,
        url: &str,
        expected_size: Option<u64>,
        mut on_progress: F,
    ) -> Result<u64, UpdaterError>
    where
        F: FnMut(u64, u64) + Send,
    {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| UpdaterError::from_io(&e, "create directory", parent))?;
        }

        let part = partial_path(dest);
        let source = partial_source_path(dest);
        let mut offset = resumable_offset(&part, &source, url, expected_size).await;

        let mut request = self.http.get(url);
        if offset > 0 {
            tracing::info!("[Download] Resuming {} from byte {}", url, offset);
            request = request.header(RANGE, format!("bytes={}-", offset));
        }

        let response = request
            .send()
            .await
            .map_err(|e| UpdaterError::from_reqwest(&e, url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpdaterError::ApiError {
                url: url.to_string(),
                status_code: status.as_u16(),
                message: body,
            });
        }

        let append = offset > 0 && status == StatusCode::PARTIAL_CONTENT;
        if !append {
            offset = 0;
        }

        let total = expected_size
            .or_else(|| response.content_length().map(|len| len + offset))
            .unwrap_or(0);

        let mut file = if append {
            tokio::fs::OpenOptions::new().append(true).open(&part).await
        } else {
            tokio::fs::File::create(&part).await
        }
        .map_err(|e| UpdaterError::from_io(&e, "open", &part))?;
        if !append {
            tokio::fs::write(&source, url)
                .await
                .map_err(|e| UpdaterError::from_io(&e, "write", &source))?;
        }

        let mut tracker = ProgressTracker::new(total);
        let mut transferred = offset;
        if tracker.should_report(transferred) {
            on_progress(transferred, total);
        }

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| UpdaterError::from_reqwest(&e, url))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| UpdaterError::from_io(&e, "write", &part))?;
            transferred += chunk.len() as u64;
            if tracker.should_report(transferred) {
                on_progress(transferred, total);
            }
        }

        file.flush()
            .await
            .map_err(|e| UpdaterError::from_io(&e, "flush", &part))?;
        drop(file);

        if tracker.finish(transferred) {
            on_progress(transferred, total);
        }
        if let Some(expected) = expected_size {
            if expected != transferred {
                tracing::warn!(
                    "[Download] {} size mismatch: expected {} bytes, got {}",
                    url, expected, transferred
                );
            }
        }

        tokio::fs::rename(&part, dest)
            .await
            .map_err(|e| UpdaterError::from_io(&e, "rename", dest))?;
        tokio::fs::remove_file(&source).await.ok();

        tracing::info!("[Download] {} -> {} ({} bytes)", url, dest.display(), transferred);
        Ok(transferred)
    }
}
