//! Fetching recipe payloads
//!
//! HTTP(S) URLs are streamed through a ureq agent with a progress bar;
//! `file://` URLs are copied from the local filesystem.

use crate::core::error::StepError;
use crate::core::output::{self, ProgressGuard};
use crate::helpers::hash;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Downloads files for recipe steps.
#[derive(Clone)]
pub struct Downloader {
    agent: ureq::Agent,
}

impl Downloader {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    /// Fetch `url` into `dest` and verify its checksum if one is given.
    /// Returns the number of bytes written.
    pub fn fetch(&self, url: &str, dest: &Path, sha256: Option<&str>) -> Result<u64, StepError> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let bytes = match url.strip_prefix("file://") {
            Some(local) => std::fs::copy(local, dest).map_err(|e| StepError::Download {
                url: url.to_string(),
                message: e.to_string(),
            })?,
            None => self.fetch_http(url, dest)?,
        };

        if let Some(expected) = sha256 {
            hash::verify_sha256(dest, expected)?;
        }
        output::detail(&format!("downloaded {} ({} bytes)", file_name_of(dest), bytes));
        Ok(bytes)
    }

    fn fetch_http(&self, url: &str, dest: &Path) -> Result<u64, StepError> {
        let download_err = |message: String| StepError::Download {
            url: url.to_string(),
            message,
        };
        let pb = ProgressGuard(output::spinner(&format!("downloading {}", file_name_of(dest))));

        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| download_err(e.to_string()))?;

        if let Some(len) = response
            .header("content-length")
            .and_then(|s| s.parse().ok())
        {
            output::upgrade_to_bytes(&pb.0, len);
        }

        let mut file = std::fs::File::create(dest)?;
        let mut reader = response.into_reader();
        let mut buffer = [0u8; 8192];
        let mut total_bytes = 0u64;

        loop {
            let n = reader
                .read(&mut buffer)
                .map_err(|e| download_err(format!("read error: {}", e)))?;
            if n == 0 {
                break;
            }
            file.write_all(&buffer[..n])?;
            total_bytes += n as u64;
            pb.0.set_position(total_bytes);
        }
        file.flush()?;

        Ok(total_bytes)
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string())
}

/// The file name a URL downloads to: the last path segment with any
/// query string or fragment removed.
pub fn url_file_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("download")
        .to_string()
}

/// Destination for a download: the explicit target name if given,
/// otherwise the URL's file name, inside `dir`.
pub fn download_target(dir: &Path, url: &str, target_filename: Option<&str>) -> PathBuf {
    match target_filename {
        Some(name) => dir.join(name),
        None => dir.join(url_file_name(url)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_url_file_name() {
        assert_eq!(
            url_file_name("https://example.org/dist/bwa-0.5.9.tar.bz2"),
            "bwa-0.5.9.tar.bz2"
        );
        assert_eq!(url_file_name("https://example.org/get?file=x.tgz"), "get");
        assert_eq!(url_file_name("https://example.org/dir/"), "dir");
    }

    #[test]
    fn test_download_target_prefers_explicit_name() {
        let dir = Path::new("/work");
        assert_eq!(
            download_target(dir, "https://example.org/a.tgz", Some("b.tgz")),
            PathBuf::from("/work/b.tgz")
        );
        assert_eq!(
            download_target(dir, "https://example.org/a.tgz", None),
            PathBuf::from("/work/a.tgz")
        );
    }

    #[test]
    fn test_file_url_is_copied() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        std::fs::write(&src, "payload").unwrap();
        let dest = dir.path().join("out/dest.txt");

        let downloader = Downloader::new(Duration::from_secs(5));
        let bytes = downloader
            .fetch(&format!("file://{}", src.display()), &dest, None)
            .unwrap();

        assert_eq!(bytes, 7);
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "payload");
    }

    #[tokio::test]
    async fn test_http_download_with_checksum() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/samtools.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"archive-bytes".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("samtools.tgz");
        let url = format!("{}/samtools.tgz", server.uri());
        let expected = hex::encode(Sha256::digest(b"archive-bytes"));

        let downloader = Downloader::new(Duration::from_secs(5));
        downloader.fetch(&url, &dest, Some(&expected)).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"archive-bytes");

        let err = downloader.fetch(&url, &dest, Some("00")).unwrap_err();
        assert!(matches!(err, StepError::Sha256Mismatch { .. }));
    }

    #[tokio::test]
    async fn test_http_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(Duration::from_secs(5));
        let err = downloader
            .fetch(&format!("{}/missing.tgz", server.uri()), &dir.path().join("x"), None)
            .unwrap_err();
        assert!(matches!(err, StepError::Download { .. }));
    }
}
