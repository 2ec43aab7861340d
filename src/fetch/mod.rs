//! Remote retrieval of snapshots and timestamp markers.
//!
//! A [`Fetcher`] turns a URL into bytes plus a suggested file name.  A
//! non-success HTTP status is *not* an error: it is logged and yields empty
//! content, which callers must treat as a failed fetch.

pub mod http;

use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::percent_decode_str;

use crate::error::ExtractResult;
use crate::extract::names::last_segment;

pub use http::HttpFetcher;

/// Result of a fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedFile {
    /// Sanitised single-segment file name, if one could be derived.
    pub suggested_name: Option<String>,
    /// Body bytes; empty when the server answered with a non-success status.
    pub content: Bytes,
}

impl FetchedFile {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Retrieve `url`.  Transport failures are errors; non-success statuses
    /// produce an empty [`FetchedFile`].
    async fn fetch(&self, url: &str) -> ExtractResult<FetchedFile>;
}

// ---------------------------------------------------------------------------
// File-name derivation
// ---------------------------------------------------------------------------

/// Pick a file name for a download: `filename=` from `Content-Disposition`,
/// then `filename*=`, then the last segment of the URL path.
pub fn derive_file_name(content_disposition: Option<&str>, url: &str) -> Option<String> {
    content_disposition
        .and_then(|h| disposition_param(h, "filename"))
        .and_then(|name| last_segment(&name))
        .or_else(|| {
            content_disposition
                .and_then(|h| disposition_param(h, "filename*"))
                .map(|value| decode_ext_value(&value))
                .and_then(|name| last_segment(&name))
        })
        .or_else(|| url_file_name(url))
}

/// Value of parameter `name` in a `Content-Disposition` header, unquoted.
fn disposition_param(header: &str, name: &str) -> Option<String> {
    header.split(';').skip(1).find_map(|part| {
        let (key, value) = part.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

/// Decode an RFC 5987 `charset'lang'percent-encoded` value.
fn decode_ext_value(value: &str) -> String {
    let encoded = value.splitn(3, '\'').nth(2).unwrap_or(value);
    percent_decode_str(encoded).decode_utf8_lossy().into_owned()
}

fn url_file_name(url: &str) -> Option<String> {
    match url::Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .map(|segment| percent_decode_str(segment).decode_utf8_lossy().into_owned())
            .and_then(|name| last_segment(&name)),
        Err(_) => last_segment(url.rsplit('/').next().unwrap_or_default()),
    }
}
