//! Streaming model downloads with progress reporting and optional SHA-256
//! verification. Files are written to a `.part` sibling and renamed into
//! place only once the stream completes, so an interrupted download never
//! leaves a half-written model in the catalog.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{CatalogError, CatalogResult};

/// Progress of an in-flight download, as handed to the progress callback.
#[derive(Clone, Debug)]
pub struct DownloadProgress {
    /// Completed fraction in `[0, 1]`.
    pub fraction: f32,
    /// Human-readable transfer rate, e.g. `"12.34 MB/s"`.
    pub speed: String,
}

#[derive(Clone)]
pub struct ModelDownloader {
    client: reqwest::Client,
}

impl ModelDownloader {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Download `url` to `dest`, reporting progress per received chunk when
    /// the server announces a content length.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        on_progress: impl Fn(DownloadProgress),
    ) -> CatalogResult<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(CatalogError::UnexpectedStatus(response.status()));
        }

        let total_size = response.content_length().unwrap_or(0);
        let temp_path = part_path(dest);
        let mut file = tokio::fs::File::create(&temp_path).await?;
        let mut stream = response.bytes_stream();
        let started = Instant::now();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if total_size > 0 {
                on_progress(DownloadProgress {
                    fraction: downloaded as f32 / total_size as f32,
                    speed: format_speed(downloaded, started.elapsed()),
                });
            }
        }

        file.flush().await?;
        drop(file);
        tokio::fs::rename(&temp_path, dest).await?;
        Ok(())
    }
}

impl Default for ModelDownloader {
    fn default() -> Self {
        Self::new()
    }
}

/// Compare a file's SHA-256 against `expected` (hex, case-insensitive).
pub async fn verify_checksum(path: &Path, expected: &str) -> CatalogResult<bool> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let bytes_read = file.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    let actual = hex::encode(hasher.finalize());
    Ok(actual == expected.to_lowercase())
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".part");
    dest.with_file_name(name)
}

fn format_speed(bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64().max(0.001);
    let rate = bytes as f64 / secs;
    if rate >= 1_000_000.0 {
        format!("{:.2} MB/s", rate / 1_000_000.0)
    } else if rate >= 1_000.0 {
        format!("{:.2} KB/s", rate / 1_000.0)
    } else {
        format!("{rate:.0} B/s")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn test_download_writes_file_and_reports_progress() {
        let server = MockServer::start().await;
        let body = vec![7u8; 4096];
        Mock::given(method("GET"))
            .and(path("/files/tiny.gguf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("tiny.gguf");
        let fractions = Arc::new(Mutex::new(Vec::new()));

        let downloader = ModelDownloader::new();
        let observed = fractions.clone();
        downloader
            .download(
                &format!("{}/files/tiny.gguf", server.uri()),
                &dest,
                move |progress| observed.lock().push(progress.fraction),
            )
            .await
            .unwrap();

        assert_eq!(tokio::fs::read(&dest).await.unwrap(), body);
        let fractions = fractions.lock();
        assert!(!fractions.is_empty());
        let last = *fractions.last().unwrap();
        assert!((last - 1.0).abs() < f32::EPSILON);
        // The temp file must be gone after the rename.
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_download_fails_on_http_error_without_creating_dest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/missing.gguf"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("missing.gguf");

        let downloader = ModelDownloader::new();
        let result = downloader
            .download(
                &format!("{}/files/missing.gguf", server.uri()),
                &dest,
                |_| {},
            )
            .await;

        assert!(matches!(result, Err(CatalogError::UnexpectedStatus(_))));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_verify_checksum_accepts_matching_hash() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.bin");
        tokio::fs::write(&file, b"Hello, World!").await.unwrap();

        // SHA-256 of "Hello, World!".
        let expected = "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f";
        assert!(verify_checksum(&file, expected).await.unwrap());
        assert!(
            verify_checksum(&file, &expected.to_uppercase())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_verify_checksum_rejects_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.bin");
        tokio::fs::write(&file, b"Hello, World!").await.unwrap();

        let wrong = "0000000000000000000000000000000000000000000000000000000000000000";
        assert!(!verify_checksum(&file, wrong).await.unwrap());
    }

    #[test]
    fn test_format_speed_scales_units() {
        assert_eq!(
            format_speed(5_000_000, Duration::from_secs(1)),
            "5.00 MB/s"
        );
        assert_eq!(format_speed(2_500, Duration::from_secs(1)), "2.50 KB/s");
        assert_eq!(format_speed(500, Duration::from_secs(1)), "500 B/s");
    }
}
