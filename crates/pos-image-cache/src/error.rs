//! Error types for the image cache

use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum ImageCacheError {
    Io(Box<std::io::Error>),
    Http(Box<reqwest::Error>),
    /// Remote answered with a non-2xx status
    Status(u16),
    Timeout(Duration),
    Config(String),
}

impl fmt::Display for ImageCacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageCacheError::Io(err) => write!(f, "IO error: {}", err),
            ImageCacheError::Http(err) => write!(f, "HTTP error: {}", err),
            ImageCacheError::Status(code) => write!(f, "Remote returned status {}", code),
            ImageCacheError::Timeout(after) => {
                write!(f, "Fetch timed out after {} ms", after.as_millis())
            }
            ImageCacheError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ImageCacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ImageCacheError::Io(err) => Some(err.as_ref()),
            ImageCacheError::Http(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ImageCacheError {
    fn from(err: std::io::Error) -> Self {
        ImageCacheError::Io(Box::new(err))
    }
}

impl From<reqwest::Error> for ImageCacheError {
    fn from(err: reqwest::Error) -> Self {
        ImageCacheError::Http(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, ImageCacheError>;
