use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("no hub token: set the {0} environment variable")]
    MissingToken(String),

    #[error("hub rejected the token ({status}) at {url}")]
    Unauthorized { url: String, status: u16 },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("cannot upload {path}: {reason}")]
    Unsupported { path: String, reason: String },

    #[error("{0} contains no files to upload")]
    EmptyFolder(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PublishError>;
