//! Error taxonomy shared by the fetcher, the document store and the sync routine.
use reqwest::StatusCode;
use thiserror::Error;

/// Failure of a single HTTP fetch. The fetch is never retried.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("connection to {url} failed: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} timed out: {source}")]
    Timeout {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub(crate) fn from_request(url: &str, source: reqwest::Error) -> Self {
        let url = url.to_string();
        if source.is_timeout() {
            FetchError::Timeout { url, source }
        } else if source.is_connect() {
            FetchError::Connect { url, source }
        } else {
            FetchError::Transport { url, source }
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store is not connected")]
    NotConnected,
    #[error("failed to open document store: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("`{op}` on collection `{collection}` failed: {source}")]
    Operation {
        op: &'static str,
        collection: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("document in collection `{collection}` is not a JSON object: {source}")]
    Json {
        collection: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid collection name `{0}`")]
    InvalidCollection(String),
    #[error("invalid field path `{0}`")]
    InvalidField(String),
    #[error("invalid search pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

impl StoreError {
    pub(crate) fn op(op: &'static str, collection: &str) -> impl FnOnce(sqlx::Error) -> Self {
        let collection = collection.to_string();
        move |source| StoreError::Operation {
            op,
            collection,
            source,
        }
    }
}

/// Coarse classification of a sync failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connectivity,
    Transport,
    Decode,
    Store,
    Shape,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("document store is not connected")]
    NotConnected,
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("category listing from {url} was empty")]
    EmptyListing { url: String },
    #[error("unexpected response shape from {url}: {detail}")]
    Shape { url: String, detail: String },
    #[error("no products were inserted ({skipped} categories skipped)")]
    NoProducts { skipped: usize },
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::NotConnected => ErrorKind::Connectivity,
            SyncError::Fetch(FetchError::Decode { .. }) => ErrorKind::Decode,
            SyncError::Fetch(_) => ErrorKind::Transport,
            SyncError::Store(StoreError::NotConnected | StoreError::Connect(_)) => {
                ErrorKind::Connectivity
            }
            SyncError::Store(_) => ErrorKind::Store,
            SyncError::EmptyListing { .. }
            | SyncError::Shape { .. }
            | SyncError::NoProducts { .. } => ErrorKind::Shape,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_sync_errors() {
        assert_eq!(SyncError::NotConnected.kind(), ErrorKind::Connectivity);
        assert_eq!(
            SyncError::Store(StoreError::NotConnected).kind(),
            ErrorKind::Connectivity
        );
        assert_eq!(
            SyncError::Store(StoreError::InvalidField("a b".into())).kind(),
            ErrorKind::Store
        );
        let decode = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = SyncError::Fetch(FetchError::Decode {
            url: "http://x".into(),
            source: decode,
        });
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(
            SyncError::NoProducts { skipped: 2 }.kind(),
            ErrorKind::Shape
        );
    }

    #[test]
    fn status_error_reports_url() {
        let err = FetchError::Status {
            url: "http://api/products".into(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: "boom".into(),
        };
        let message = err.to_string();
        assert!(message.starts_with("http://api/products returned 500"));
        assert!(message.ends_with("boom"));
    }
}
