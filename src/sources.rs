//! Playlist and guide retrieval: HTTP(S) and local files
//!
//! Everything here is blocking. Async hosts should run it on a blocking
//! thread (`tokio::task::spawn_blocking`).

use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use flate2::read::GzDecoder;
use tracing::{debug, info, warn};

use crate::config::FetchConfig;
use crate::error::{Error, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// True for sources that should be fetched rather than read from disk
pub fn is_remote(source: &str) -> bool {
    let lower = source.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// HTTP fetcher with bounded retries
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    config: FetchConfig,
}

struct Fetched {
    body: Vec<u8>,
    gzip_encoded: bool,
}

impl HttpFetcher {
    pub fn new(config: FetchConfig) -> Self {
        Self { config }
    }

    /// Create a configured ureq agent
    fn create_agent(&self, timeout_secs: u64) -> ureq::Agent {
        ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(timeout_secs)))
            .timeout_connect(Some(Duration::from_secs(self.config.connect_timeout_secs)))
            .build()
            .new_agent()
    }

    /// Fetch a playlist as text
    pub fn fetch_text(&self, url: &str) -> Result<String> {
        let fetched = self.fetch(url, self.config.playlist_timeout_secs)?;
        Ok(String::from_utf8_lossy(&fetched.body).into_owned())
    }

    /// Fetch a guide, decompressing it when it looks gzipped
    pub fn fetch_guide(&self, url: &str) -> Result<String> {
        let fetched = self.fetch(url, self.config.guide_timeout_secs)?;
        let gzip_hint = fetched.gzip_encoded || url.to_ascii_lowercase().ends_with(".gz");
        Ok(decode_guide(&fetched.body, gzip_hint))
    }

    fn fetch(&self, url: &str, timeout_secs: u64) -> Result<Fetched> {
        let agent = self.create_agent(timeout_secs);
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.try_fetch(&agent, url) {
                Ok(fetched) => {
                    info!("Fetched {} bytes from {}", fetched.body.len(), url);
                    return Ok(fetched);
                }
                Err(e) => {
                    if attempts > self.config.max_retries {
                        return Err(e);
                    }
                    warn!("Fetch attempt {} for {} failed: {}", attempts, url, e);
                    // Wait before retry
                    std::thread::sleep(Duration::from_millis(self.config.retry_delay_ms));
                }
            }
        }
    }

    fn try_fetch(&self, agent: &ureq::Agent, url: &str) -> Result<Fetched> {
        let response = agent
            .get(url)
            .header("User-Agent", &self.config.user_agent)
            .call()
            .map_err(|e| match e {
                ureq::Error::StatusCode(status) => Error::HttpStatus {
                    url: url.to_string(),
                    status,
                },
                other => Error::Fetch {
                    url: url.to_string(),
                    message: other.to_string(),
                },
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let gzip_encoded = response
            .headers()
            .get("Content-Encoding")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().contains("gzip"));

        let mut body = Vec::new();
        response
            .into_body()
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| Error::Fetch {
                url: url.to_string(),
                message: format!("Read failed: {}", e),
            })?;

        Ok(Fetched { body, gzip_encoded })
    }
}

/// Guide bytes to text. Gzip is detected by magic bytes or `gzip_hint`;
/// a payload that does not inflate is read as plain text instead.
pub fn decode_guide(bytes: &[u8], gzip_hint: bool) -> String {
    if bytes.starts_with(&GZIP_MAGIC) || gzip_hint {
        let mut xml = Vec::with_capacity(bytes.len() * 4);
        match GzDecoder::new(bytes).read_to_end(&mut xml) {
            Ok(_) => {
                debug!("Inflated guide from {} to {} bytes", bytes.len(), xml.len());
                return String::from_utf8_lossy(&xml).into_owned();
            }
            Err(e) => debug!("Guide is not gzip ({}), reading as text", e),
        }
    }
    String::from_utf8_lossy(bytes).into_owned()
}

/// Read a local playlist (UTF-8)
pub fn read_text(path: impl AsRef<Path>) -> Result<String> {
    Ok(fs::read_to_string(path)?)
}

/// Read a local guide - auto-detects gzip compression
pub fn read_guide_file(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let gzip_hint = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));
    Ok(decode_guide(&bytes, gzip_hint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const XML: &str = "<tv><programme channel=\"a\"/></tv>";

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_decode_plain_and_gzip() {
        assert_eq!(decode_guide(XML.as_bytes(), false), XML);
        assert_eq!(decode_guide(&gzip(XML.as_bytes()), false), XML);
    }

    #[test]
    fn test_bad_gzip_falls_back_to_text() {
        assert_eq!(decode_guide(XML.as_bytes(), true), XML);
    }

    #[test]
    fn test_read_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("list.m3u");
        let packed = dir.path().join("guide.xml.gz");
        fs::write(&plain, "#EXTM3U\n").unwrap();
        fs::write(&packed, gzip(XML.as_bytes())).unwrap();

        assert_eq!(read_text(&plain).unwrap(), "#EXTM3U\n");
        assert_eq!(read_guide_file(&packed).unwrap(), XML);
        assert!(matches!(read_text(dir.path().join("missing")), Err(Error::Io(_))));
    }

    #[test]
    fn test_is_remote() {
        assert!(is_remote("http://example.com/list.m3u"));
        assert!(is_remote("HTTPS://example.com/guide.xml.gz"));
        assert!(!is_remote("/home/user/list.m3u"));
        assert!(!is_remote("rtmp://example.com/live"));
    }

    #[test]
    fn test_unreachable_host_is_fetch_failure() {
        let fetcher = HttpFetcher::new(FetchConfig {
            max_retries: 0,
            connect_timeout_secs: 1,
            playlist_timeout_secs: 1,
            ..FetchConfig::default()
        });
        let err = fetcher.fetch_text("http://127.0.0.1:1/list.m3u").unwrap_err();
        assert!(err.is_fetch_failure());
    }
}
