//! Row source: streams comma-separated rows from a URL or a local file
//!
//! The header line is yielded like any other row; dropping it is the
//! mapper's job. Quoted fields (`"a,b"`) are kept intact, an unquoted
//! embedded comma simply produces an extra field.

use csv_async::{AsyncReaderBuilder, StringRecord};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::{debug, info};
use url::Url;

use crate::error::{Result, SyncError};

/// Default HTTP timeout for fetching one source file
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 60;

const USER_AGENT: &str = concat!("tablesync/", env!("CARGO_PKG_VERSION"));

/// One line of the source, split into fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based line number in the source
    pub line: u64,
    pub fields: Vec<String>,
}

impl RawRow {
    pub fn new(line: u64, fields: Vec<String>) -> Self {
        Self { line, fields }
    }

    fn from_record(record: &StringRecord, fallback_line: u64) -> Self {
        let line = record.position().map(|p| p.line()).unwrap_or(fallback_line);
        let mut fields: Vec<String> = record.iter().map(str::to_string).collect();

        if line == 1 {
            if let Some(first) = fields.first_mut() {
                if let Some(stripped) = first.strip_prefix('\u{feff}') {
                    *first = stripped.to_string();
                }
            }
        }

        Self { line, fields }
    }
}

/// Lazy, single-pass stream of rows
pub type RowStream = BoxStream<'static, Result<RawRow>>;

/// Where a source lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Http(Url),
    File(PathBuf),
}

impl SourceLocation {
    /// Classify a location string: `http(s)://` URLs are fetched, `file://`
    /// URLs and anything that is not a URL are read from disk.
    pub fn parse(location: &str) -> Result<Self> {
        match Url::parse(location) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(SourceLocation::Http(url)),
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map(SourceLocation::File)
                .map_err(|_| SyncError::source_unavailable(location, "invalid file URL")),
            // Windows drive letters parse as a one-letter scheme
            Ok(url) if url.scheme().len() > 1 => Err(SyncError::source_unavailable(
                location,
                format!("unsupported scheme '{}'", url.scheme()),
            )),
            _ => Ok(SourceLocation::File(PathBuf::from(location))),
        }
    }

    /// Join a base location and a file name with exactly one `/`.
    ///
    /// A file name that is itself an absolute URL or path wins over the base.
    pub fn join(base: &str, file: &str) -> String {
        if file.contains("://") || file.starts_with('/') || base.is_empty() {
            return file.to_string();
        }

        format!("{}/{}", base.trim_end_matches('/'), file.trim_start_matches('/'))
    }
}

/// Opens sources and turns them into row streams
#[derive(Debug, Clone)]
pub struct RowSource {
    client: Client,
}

impl RowSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SyncError::source_unavailable("http client", e))?;

        Ok(Self { client })
    }

    /// Open a location and stream its rows, header first
    pub async fn open(&self, location: &str) -> Result<RowStream> {
        let reader: Box<dyn AsyncRead + Unpin + Send> = match SourceLocation::parse(location)? {
            SourceLocation::Http(url) => {
                debug!(%url, "Requesting source over HTTP");
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| SyncError::source_unavailable(location, e))?;

                let body = Box::pin(response.bytes_stream().map_err(std::io::Error::other));
                Box::new(StreamReader::new(body))
            },
            SourceLocation::File(path) => {
                debug!(path = %path.display(), "Opening source file");
                let file = tokio::fs::File::open(&path)
                    .await
                    .map_err(|e| SyncError::source_unavailable(location, e))?;
                Box::new(file)
            },
        };

        Ok(rows_from_reader(location, reader))
    }

    /// Read a whole source into memory.
    ///
    /// Any read error discards the rows gathered so far.
    pub async fn fetch_rows(&self, location: &str) -> Result<Vec<RawRow>> {
        let rows: Vec<RawRow> = self.open(location).await?.try_collect().await?;
        info!(location, rows = rows.len(), "Fetched source rows");
        Ok(rows)
    }
}

/// Parse comma-separated rows from any async reader
pub fn rows_from_reader<R>(location: &str, reader: R) -> RowStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let location = location.to_string();

    AsyncReaderBuilder::new()
        .delimiter(b',')
        .quote(b'"')
        .has_headers(false)
        .flexible(true)
        .create_reader(reader)
        .into_records()
        .enumerate()
        .map(move |(index, item)| match item {
            Ok(record) => Ok(RawRow::from_record(&record, index as u64 + 1)),
            Err(e) => Err(SyncError::source_unavailable(&location, e)),
        })
        .boxed()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source() -> RowSource {
        RowSource::new(Duration::from_secs(5)).unwrap()
    }

    fn fields(rows: &[RawRow]) -> Vec<Vec<&str>> {
        rows.iter()
            .map(|r| r.fields.iter().map(String::as_str).collect())
            .collect()
    }

    #[test]
    fn test_location_classification() {
        assert!(matches!(
            SourceLocation::parse("https://example.com/users.csv").unwrap(),
            SourceLocation::Http(_)
        ));
        assert_eq!(
            SourceLocation::parse("data/users.csv").unwrap(),
            SourceLocation::File(PathBuf::from("data/users.csv"))
        );
        assert_eq!(
            SourceLocation::parse("file:///srv/sync/users.csv").unwrap(),
            SourceLocation::File(PathBuf::from("/srv/sync/users.csv"))
        );
        assert!(matches!(
            SourceLocation::parse("ftp://example.com/users.csv"),
            Err(SyncError::SourceUnavailable { .. })
        ));
    }

    #[test]
    fn test_join() {
        assert_eq!(
            SourceLocation::join("https://example.com/data/", "users.csv"),
            "https://example.com/data/users.csv"
        );
        assert_eq!(
            SourceLocation::join("https://example.com/data", "/srv/roles.csv"),
            "/srv/roles.csv"
        );
        assert_eq!(
            SourceLocation::join("./fixtures", "https://cdn.example.com/roles.csv"),
            "https://cdn.example.com/roles.csv"
        );
        assert_eq!(SourceLocation::join("", "users.csv"), "users.csv");
    }

    #[tokio::test]
    async fn test_reads_file_with_header_first() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "id,mail\n1,a@example.com\n2,b@example.com\n").unwrap();

        let rows = source()
            .fetch_rows(file.path().to_str().unwrap())
            .await
            .unwrap();

        assert_eq!(
            fields(&rows),
            vec![
                vec!["id", "mail"],
                vec!["1", "a@example.com"],
                vec!["2", "b@example.com"],
            ]
        );
        assert_eq!(rows[0].line, 1);
        assert_eq!(rows[2].line, 3);
    }

    #[tokio::test]
    async fn test_quoted_fields_and_crlf() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "\u{feff}id,name\r\n1,\"Doe, Jane\"\r\n2,x,y\r\n").unwrap();

        let rows = source()
            .fetch_rows(file.path().to_str().unwrap())
            .await
            .unwrap();

        assert_eq!(
            fields(&rows),
            vec![vec!["id", "name"], vec!["1", "Doe, Jane"], vec!["2", "x", "y"]]
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_source_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.csv");

        let err = source()
            .fetch_rows(missing.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_read_error_mid_stream_discards_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"id,mail\n1,a@example.com\n2,\xff\xfe\n3,c@example.com\n")
            .unwrap();

        let err = source()
            .fetch_rows(file.path().to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::SourceUnavailable { .. }));

        let data: &[u8] = b"id,mail\n1,a@example.com\n2,\xff\n";
        let mut stream = rows_from_reader("inline", data);
        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.unwrap().is_ok());
        assert!(matches!(
            stream.next().await.unwrap(),
            Err(SyncError::SourceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_reads_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/roles.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_string("user_id,type\n7,admin\n"))
            .mount(&server)
            .await;

        let location = SourceLocation::join(&format!("{}/data", server.uri()), "roles.csv");
        let rows = source().fetch_rows(&location).await.unwrap();

        assert_eq!(fields(&rows), vec![vec!["user_id", "type"], vec!["7", "admin"]]);
    }

    #[tokio::test]
    async fn test_http_error_status_is_source_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = source()
            .fetch_rows(&format!("{}/users.csv", server.uri()))
            .await
            .unwrap_err();

        match err {
            SyncError::SourceUnavailable { location, reason } => {
                assert!(location.ends_with("/users.csv"));
                assert!(reason.contains("404"));
            },
            other => panic!("expected SourceUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_is_lazy() {
        let data: &[u8] = b"a,b\n1,2\n3,4\n";
        let mut stream = rows_from_reader("inline", data);

        let header = stream.next().await.unwrap().unwrap();
        assert_eq!(header.fields, vec!["a", "b"]);
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.fields, vec!["1", "2"]);
    }
}
