//! Capture Stream
//!
//! Decoded request/response records produced by the intercepting proxy,
//! one JSON document per line, in capture order:
//!
//! ```json
//! {"type":"http",
//!  "request":{"method":"GET","url":"https://site.test/a.js?v=1",
//!             "headers":[["Origin","https://site.test"]]},
//!  "response":{"status_code":200,"headers":[["Content-Type","text/javascript"]],
//!              "body":"Y29uc29sZS5sb2coMSk="}}
//! ```
//!
//! Records of any other `type` (websocket, tcp, ...) decode to
//! [`CaptureRecord::Other`] and are skipped by ingestion. `response` may be
//! absent or `null` when the proxy saw no reply.

use crate::mock::error::CaptureError;
use crate::mock::fingerprint::RequestDescriptor;
use crate::mock::store::Fixture;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CaptureRecord {
    Http(HttpExchange),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpExchange {
    pub request: CapturedRequest,
    #[serde(default)]
    pub response: Option<CapturedResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Decoded query pairs. Parsed from `url` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Vec<(String, String)>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub status_code: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default, with = "base64_body")]
    pub body: Vec<u8>,
}

/// Request shape plus the host its fixture is filed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedTarget {
    pub descriptor: RequestDescriptor,
    pub host: String,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parse the URL into a request descriptor.
    ///
    /// The path is taken from the parsed URL: existing percent-escapes are kept
    /// verbatim, characters a browser would escape are escaped, and `.`/`..`
    /// segments are resolved. The replay listener compares against the raw
    /// request path, so the two agree for any path a browser would send.
    pub fn target(&self) -> Result<CapturedTarget, url::ParseError> {
        let url = Url::parse(&self.url)?;

        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        };

        let query_names: Vec<String> = match &self.query {
            Some(pairs) => pairs.iter().map(|(k, _)| k.clone()).collect(),
            None => url.query_pairs().map(|(k, _)| k.into_owned()).collect(),
        };

        let mut descriptor =
            RequestDescriptor::new(self.method.clone(), url.path()).with_query_names(query_names);
        if let Some(origin) = self.header("origin") {
            descriptor = descriptor.with_origin(origin);
        }

        Ok(CapturedTarget { descriptor, host })
    }
}

impl CapturedResponse {
    pub fn to_fixture(&self) -> Fixture {
        Fixture::new(self.status_code, self.headers.iter().cloned(), self.body.clone())
    }
}

mod base64_body {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// READER
// =============================================================================

/// Iterates capture records in file order. Blank lines are ignored.
pub struct CaptureReader<R> {
    lines: std::io::Lines<R>,
    line_no: usize,
}

impl CaptureReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> CaptureReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }
}

impl<R: BufRead> Iterator for CaptureReader<R> {
    type Item = Result<CaptureRecord, CaptureError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(CaptureError::Io(e))),
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            return Some(
                serde_json::from_str(&line).map_err(|e| CaptureError::Decode {
                    line: self.line_no,
                    reason: e.to_string(),
                }),
            );
        }
    }
}
