use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("Page list is empty")]
    EmptyPageList,

    #[error("Unsupported chapter format: {0}")]
    UnsupportedFormat(String),

    #[error("HTTP error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("No page loader for source: {0}")]
    LoaderNotImplemented(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Page loader was recycled")]
    Recycled,

    #[error("{0}")]
    Other(String),
}

impl ReaderError {
    /// Whether asking for the same chapter or page again can succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ReaderError::UnsupportedFormat(_)
                | ReaderError::LoaderNotImplemented(_)
                | ReaderError::Config(_)
        )
    }
}

impl From<zip::result::ZipError> for ReaderError {
    fn from(e: zip::result::ZipError) -> Self {
        match e {
            zip::result::ZipError::Io(io) => ReaderError::Io(io),
            other => ReaderError::CorruptArchive(other.to_string()),
        }
    }
}

impl From<quick_xml::Error> for ReaderError {
    fn from(e: quick_xml::Error) -> Self {
        ReaderError::CorruptArchive(format!("XML parse error: {}", e))
    }
}

impl From<tokio::task::JoinError> for ReaderError {
    fn from(e: tokio::task::JoinError) -> Self {
        ReaderError::Other(format!("Task join error: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, ReaderError>;
