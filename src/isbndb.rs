use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::IsbndbSettings;
use crate::context::Deadline;
use crate::domain::{Book, Isbn};
use crate::error::{LookupError, ShelfError};

const UNKNOWN_AUTHOR: &str = "Unknown";

static PAGE_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s*(?:pages?\b|p\.|p\b)").expect("static page count regex")
});

/// One `data` entry of an ISBNdb book response, with absent and `null` fields
/// flattened to empty values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookMetadata {
    pub title_latin: String,
    pub title: String,
    pub title_long: String,
    pub author_data: Vec<BookAuthor>,
    pub subject_ids: Vec<String>,
    pub isbn13: String,
    pub isbn10: String,
    pub physical_description_text: String,
    pub publisher_name: String,
    pub language: String,
    pub summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookAuthor {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct BookPayload {
    data: Option<Vec<Option<BookRecord>>>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BookRecord {
    title_latin: Option<String>,
    title: Option<String>,
    title_long: Option<String>,
    author_data: Option<Vec<Option<AuthorRecord>>>,
    subject_ids: Option<Vec<Option<String>>>,
    isbn13: Option<String>,
    isbn10: Option<String>,
    physical_description_text: Option<String>,
    publisher_name: Option<String>,
    language: Option<String>,
    summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorRecord {
    id: Option<String>,
    name: Option<String>,
}

impl From<BookRecord> for BookMetadata {
    fn from(record: BookRecord) -> Self {
        Self {
            title_latin: record.title_latin.unwrap_or_default(),
            title: record.title.unwrap_or_default(),
            title_long: record.title_long.unwrap_or_default(),
            author_data: record
                .author_data
                .unwrap_or_default()
                .into_iter()
                .flatten()
                .map(|author| BookAuthor {
                    id: author.id.unwrap_or_default(),
                    name: author.name.unwrap_or_default(),
                })
                .collect(),
            subject_ids: record
                .subject_ids
                .unwrap_or_default()
                .into_iter()
                .flatten()
                .collect(),
            isbn13: record.isbn13.unwrap_or_default(),
            isbn10: record.isbn10.unwrap_or_default(),
            physical_description_text: record.physical_description_text.unwrap_or_default(),
            publisher_name: record.publisher_name.unwrap_or_default(),
            language: record.language.unwrap_or_default(),
            summary: record.summary.unwrap_or_default(),
        }
    }
}

impl BookMetadata {
    pub fn display_title(&self) -> Option<&str> {
        [&self.title_latin, &self.title, &self.title_long]
            .into_iter()
            .map(|value| value.trim())
            .find(|value| !value.is_empty())
    }

    pub fn primary_author(&self) -> Option<&str> {
        self.author_data
            .iter()
            .map(|author| author.name.trim())
            .find(|name| !name.is_empty())
    }

    pub fn page_count(&self) -> Option<u32> {
        PAGE_COUNT
            .captures(&self.physical_description_text)
            .and_then(|caps| caps.get(1))
            .and_then(|value| value.as_str().parse().ok())
            .filter(|pages| *pages > 0)
    }

    /// Maps the record onto the catalog schema, keyed by the requested ISBN.
    pub fn to_book(&self, isbn: &Isbn) -> Book {
        let genres = self
            .subject_ids
            .iter()
            .map(|subject| subject.trim().to_string())
            .filter(|subject| !subject.is_empty())
            .collect();
        Book {
            isbn: isbn.clone(),
            title: self.display_title().unwrap_or_default().to_string(),
            author: self.primary_author().unwrap_or(UNKNOWN_AUTHOR).to_string(),
            genres,
            pages: self.page_count(),
        }
    }
}

/// Resolves an ISBN against a remote bibliographic source.
///
/// Implementations make a single attempt per call; retries belong to the
/// caller.
pub trait BibliographicClient: Send + Sync {
    fn lookup_by_isbn(&self, isbn: &Isbn, deadline: &Deadline) -> Result<BookMetadata, LookupError>;
}

#[derive(Clone)]
pub struct IsbndbHttpClient {
    client: Client,
    base: Url,
    api_key: String,
    timeout: Duration,
}

impl IsbndbHttpClient {
    pub fn new(settings: &IsbndbSettings) -> Result<Self, ShelfError> {
        let api_key = settings.api_key.clone().ok_or_else(|| {
            ShelfError::InvalidConfig(format!(
                "an ISBNdb api key is required (set {} or isbndb.api_key)",
                crate::config::API_KEY_ENV
            ))
        })?;
        let base = Url::parse(&settings.base_url)
            .map_err(|err| ShelfError::InvalidConfig(format!("isbndb.base_url: {err}")))?;
        if base.cannot_be_a_base() {
            return Err(ShelfError::InvalidConfig(format!(
                "isbndb.base_url cannot be used as a base: {base}"
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("shelfmark/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ShelfError::InvalidConfig(err.to_string()))?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|err| ShelfError::InvalidConfig(err.to_string()))?;

        Ok(Self {
            client,
            base,
            api_key,
            timeout: settings.timeout,
        })
    }

    /// `<base>/<api key>/book/<isbn>`, with each segment percent-encoded.
    pub fn book_url(&self, isbn: &Isbn) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push(&self.api_key)
                .push("book")
                .push(isbn.as_str());
        }
        url
    }
}

impl BibliographicClient for IsbndbHttpClient {
    fn lookup_by_isbn(&self, isbn: &Isbn, deadline: &Deadline) -> Result<BookMetadata, LookupError> {
        if deadline.is_expired() {
            return Err(LookupError::Cancelled);
        }
        let timeout = deadline.clamp(self.timeout);
        if timeout.is_zero() {
            return Err(LookupError::Cancelled);
        }

        let url = self.book_url(isbn);
        debug!(%isbn, timeout_ms = timeout.as_millis() as u64, "isbndb.request");
        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .map_err(classify_transport_error)?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|err| LookupError::Transient(err.without_url().to_string()))?;
        info!(
            %isbn,
            status,
            latency_ms = start.elapsed().as_millis() as u64,
            "isbndb.response"
        );

        classify_response(isbn.as_str(), status, &body)
    }
}

/// The request URL carries the api key, so it is stripped before the error
/// text can reach logs or callers.
fn classify_transport_error(err: reqwest::Error) -> LookupError {
    let err = err.without_url();
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        return LookupError::Transient(err.to_string());
    }
    LookupError::Permanent {
        status: err.status().map(|status| status.as_u16()),
        message: err.to_string(),
    }
}

/// Classifies a raw response into a record or a lookup error.
///
/// A non-empty `error` field means "not found" whatever the status code.
/// Otherwise 404 is not found, 408/429/5xx are transient, other non-2xx
/// responses and malformed 2xx payloads are permanent.
pub fn classify_response(isbn: &str, status: u16, body: &str) -> Result<BookMetadata, LookupError> {
    let parsed = serde_json::from_str::<BookPayload>(body);

    if let Ok(BookPayload {
        error: Some(message),
        ..
    }) = &parsed
    {
        if !message.trim().is_empty() {
            return Err(LookupError::NotFound {
                isbn: isbn.to_string(),
                message: message.trim().to_string(),
            });
        }
    }

    if !(200..300).contains(&status) {
        let message = truncate(body, 200);
        return Err(match status {
            404 => LookupError::NotFound {
                isbn: isbn.to_string(),
                message,
            },
            408 | 429 | 500..=599 => LookupError::Transient(format!("status {status}: {message}")),
            _ => LookupError::Permanent {
                status: Some(status),
                message,
            },
        });
    }

    let payload = parsed.map_err(|err| LookupError::Permanent {
        status: Some(status),
        message: format!("malformed payload: {err}"),
    })?;
    payload
        .data
        .unwrap_or_default()
        .into_iter()
        .flatten()
        .next()
        .map(BookMetadata::from)
        .ok_or_else(|| LookupError::NotFound {
            isbn: isbn.to_string(),
            message: "empty result set".to_string(),
        })
}

fn truncate(value: &str, limit: usize) -> String {
    let trimmed = value.trim();
    match trimmed.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn error_field_is_not_found_even_on_200() {
        let err = classify_response("9780000000002", 200, r#"{"error":"not found"}"#).unwrap_err();
        assert_matches!(err, LookupError::NotFound { .. });
    }

    #[test]
    fn status_classes() {
        assert_matches!(
            classify_response("x", 503, "<html>down</html>"),
            Err(LookupError::Transient(_))
        );
        assert_matches!(
            classify_response("x", 429, ""),
            Err(LookupError::Transient(_))
        );
        assert_matches!(
            classify_response("x", 404, ""),
            Err(LookupError::NotFound { .. })
        );
        assert_matches!(
            classify_response("x", 403, r#"{"message":"bad key"}"#),
            Err(LookupError::Permanent {
                status: Some(403),
                ..
            })
        );
    }

    #[test]
    fn malformed_success_payload_is_permanent() {
        assert_matches!(
            classify_response("x", 200, "not json"),
            Err(LookupError::Permanent { .. })
        );
    }

    #[test]
    fn empty_data_is_not_found() {
        assert_matches!(
            classify_response("x", 200, r#"{"data":[]}"#),
            Err(LookupError::NotFound { .. })
        );
    }

    #[test]
    fn page_count_from_physical_description() {
        let meta = BookMetadata {
            physical_description_text: "xii, 320 p. ; 24 cm".to_string(),
            ..BookMetadata::default()
        };
        assert_eq!(meta.page_count(), Some(320));

        let meta = BookMetadata {
            physical_description_text: "24 cm".to_string(),
            ..BookMetadata::default()
        };
        assert_eq!(meta.page_count(), None);
    }

    #[test]
    fn title_falls_back_and_author_defaults() {
        let meta = BookMetadata {
            title: "Plain Title".to_string(),
            ..BookMetadata::default()
        };
        let isbn: Isbn = "9780000000002".parse().unwrap();
        let book = meta.to_book(&isbn);
        assert_eq!(book.title, "Plain Title");
        assert_eq!(book.author, UNKNOWN_AUTHOR);
        assert!(book.genres.is_empty());
    }
}
