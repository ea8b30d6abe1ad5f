//! Where snapshot bytes come from.

use crate::snapshot::error::SnapshotError;
use futures_util::TryStreamExt;
use log::{info, warn};
use reqwest::Client;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::io::StreamReader;

const COPY_CHUNK: usize = 64 * 1024;

/// A remote (or local) origin of dataset bytes.
///
/// Implementations stream the full payload into `sink` and report the number of bytes
/// written. They must not assume `sink` is a final destination: a failed fetch is
/// discarded by the caller.
#[allow(async_fn_in_trait)]
pub trait Source {
    /// Human readable location, used in logs and error messages.
    fn describe(&self) -> String;

    async fn fetch_into<W>(&self, sink: &mut W) -> Result<u64, SnapshotError>
    where
        W: AsyncWrite + Unpin;
}

/// Downloads a dataset over HTTP(S). Transfer-level gzip is decoded transparently.
#[derive(Debug, Clone)]
pub struct HttpSource {
    url: String,
    client: Client,
}

impl HttpSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(url, Client::new())
    }

    pub fn with_client(url: impl Into<String>, client: Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Source for HttpSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn fetch_into<W>(&self, sink: &mut W) -> Result<u64, SnapshotError>
    where
        W: AsyncWrite + Unpin,
    {
        info!("Downloading data from {}", self.url);
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SnapshotError::NetworkRequest(self.url.clone(), e))?;

        let response = match response.error_for_status() {
            Ok(resp) => resp,
            Err(e) => {
                warn!("HTTP error for {}: {:?}", self.url, e);
                return Err(if let Some(status) = e.status() {
                    SnapshotError::HttpStatus {
                        url: self.url.clone(),
                        status,
                        source: e,
                    }
                } else {
                    SnapshotError::NetworkRequest(self.url.clone(), e)
                });
            }
        };

        let stream = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        let mut reader = StreamReader::new(stream);
        pump(&self.url, &mut reader, sink).await
    }
}

/// Copies `reader` into `sink`, keeping read failures (the transfer) apart from
/// write failures (local storage).
async fn pump<R, W>(origin: &str, reader: &mut R, sink: &mut W) -> Result<u64, SnapshotError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut written = 0u64;
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SnapshotError::Transfer(origin.to_string(), e)),
        };
        sink.write_all(&buf[..n])
            .await
            .map_err(|e| SnapshotError::SinkWrite(origin.to_string(), e))?;
        written += n as u64;
    }
    sink.flush()
        .await
        .map_err(|e| SnapshotError::SinkWrite(origin.to_string(), e))?;
    Ok(written)
}

/// Copies a dataset from a local path, e.g. a mirror on a shared mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Source for FileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch_into<W>(&self, sink: &mut W) -> Result<u64, SnapshotError>
    where
        W: AsyncWrite + Unpin,
    {
        info!("Copying data from {}", self.path.display());
        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| SnapshotError::SourceOpen(self.path.clone(), e))?;
        pump(&self.describe(), &mut file, sink).await
    }
}

/// A source given on the command line: `http://` and `https://` URLs are
/// downloaded, `file://` URLs and bare paths are copied.
#[derive(Debug, Clone)]
pub enum SourceDescriptor {
    Http(HttpSource),
    File(FileSource),
}

impl FromStr for SourceDescriptor {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Ok(SourceDescriptor::Http(HttpSource::new(s)));
        }
        let path = s.strip_prefix("file://").unwrap_or(s);
        Ok(SourceDescriptor::File(FileSource::new(path)))
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl Source for SourceDescriptor {
    fn describe(&self) -> String {
        match self {
            SourceDescriptor::Http(s) => s.describe(),
            SourceDescriptor::File(s) => s.describe(),
        }
    }

    async fn fetch_into<W>(&self, sink: &mut W) -> Result<u64, SnapshotError>
    where
        W: AsyncWrite + Unpin,
    {
        match self {
            SourceDescriptor::Http(s) => s.fetch_into(sink).await,
            SourceDescriptor::File(s) => s.fetch_into(sink).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn descriptor_picks_transport_by_scheme() {
        let http: SourceDescriptor = "https://example.org/cases.csv".parse().unwrap();
        assert!(matches!(http, SourceDescriptor::Http(ref s) if s.url() == "https://example.org/cases.csv"));

        let file: SourceDescriptor = "file:///srv/mirror/cases.csv".parse().unwrap();
        assert_eq!(file.describe(), "/srv/mirror/cases.csv");

        let bare: SourceDescriptor = "mirror/cases.csv".parse().unwrap();
        assert!(matches!(bare, SourceDescriptor::File(_)));
    }

    #[tokio::test]
    async fn http_source_streams_body() -> Result<(), SnapshotError> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cases.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_string("a,b\n1,2\n"))
            .expect(1)
            .mount(&server)
            .await;

        let source = HttpSource::new(format!("{}/cases.csv", server.uri()));
        let mut sink = Vec::new();
        let written = source.fetch_into(&mut sink).await?;

        assert_eq!(written, 8);
        assert_eq!(sink, b"a,b\n1,2\n");
        Ok(())
    }

    #[tokio::test]
    async fn http_error_status_is_a_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source = HttpSource::new(format!("{}/cases.csv", server.uri()));
        let mut sink = Vec::new();
        let result = source.fetch_into(&mut sink).await;

        match result {
            Err(SnapshotError::HttpStatus { status, .. }) => assert_eq!(status.as_u16(), 503),
            other => panic!("expected HttpStatus, got {:?}", other),
        }
        assert!(sink.is_empty());
    }

    /// Rejects every write the way a full disk does.
    struct FullDisk;

    impl AsyncWrite for FullDisk {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &[u8],
        ) -> std::task::Poll<io::Result<usize>> {
            std::task::Poll::Ready(Err(io::Error::new(
                io::ErrorKind::Other,
                "No space left on device",
            )))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn local_write_failure_is_a_filesystem_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cases.csv");
        std::fs::write(&path, b"IdLandkreis\n1001\n").unwrap();

        let result = FileSource::new(&path).fetch_into(&mut FullDisk).await;

        let error = result.unwrap_err();
        assert!(matches!(error, SnapshotError::SinkWrite(..)), "{:?}", error);
        assert_eq!(error.kind(), crate::ErrorKind::FilesystemFailure);
    }

    #[tokio::test]
    async fn http_write_failure_is_not_blamed_on_the_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("a,b\n1,2\n"))
            .mount(&server)
            .await;

        let source = HttpSource::new(format!("{}/cases.csv", server.uri()));
        let error = source.fetch_into(&mut FullDisk).await.unwrap_err();
        assert_eq!(error.kind(), crate::ErrorKind::FilesystemFailure);
    }

    #[tokio::test]
    async fn missing_local_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSource::new(dir.path().join("absent.csv"));
        let mut sink = Vec::new();
        let result = source.fetch_into(&mut sink).await;
        assert!(matches!(result, Err(SnapshotError::SourceOpen(..))));
    }
}
