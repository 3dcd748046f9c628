//! Cache key derivation
//!
//! A cache key is `<sha256 hex>.<ext>`. Images served by the backend itself are
//! keyed by URL path only, so rotating auth tokens or query parameters do not
//! duplicate entries for the same resource.

use crate::fs::PARTIAL_EXTENSION;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use url::{Origin, Url};

pub const DEFAULT_EXTENSION: &str = "jpg";
const MAX_EXTENSION_LEN: usize = 5;

/// Maps remote image URIs to filesystem-safe cache filenames
#[derive(Debug, Clone, Default)]
pub struct KeyDeriver {
    own_origin: Option<Origin>,
}

impl KeyDeriver {
    /// Create a deriver; `own_api_origin` enables path-only hashing for that origin
    pub fn new(own_api_origin: Option<&str>) -> Self {
        let own_origin = own_api_origin.and_then(|raw| {
            let trimmed = raw.trim().trim_end_matches('/');
            match Url::parse(trimmed) {
                Ok(url) if url.has_host() => Some(url.origin()),
                Ok(_) => {
                    warn!(origin = %raw, "Own API origin has no host, hashing full URIs");
                    None
                }
                Err(e) => {
                    warn!(origin = %raw, error = %e, "Invalid own API origin, hashing full URIs");
                    None
                }
            }
        });

        Self { own_origin }
    }

    /// Derive the cache filename for `uri`
    pub fn derive_key(&self, uri: &str) -> String {
        let digest = hex::encode(Sha256::digest(self.hash_input(uri).as_bytes()));
        format!("{}.{}", digest, extension_of(uri))
    }

    fn hash_input<'a>(&self, uri: &'a str) -> std::borrow::Cow<'a, str> {
        let Some(own) = &self.own_origin else {
            return uri.into();
        };

        match Url::parse(uri) {
            Ok(url) if url.origin() == *own => url.path().to_string().into(),
            Ok(_) => uri.into(),
            Err(e) => {
                debug!(uri, error = %e, "Could not parse URI, hashing raw string");
                uri.into()
            }
        }
    }
}

/// Extension of the last path segment, ignoring query and fragment.
///
/// The partial-download extension is never a key extension.
fn extension_of(uri: &str) -> String {
    let last_segment = match Url::parse(uri) {
        Ok(url) => url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .map(str::to_string),
        Err(_) => {
            let without_suffix = uri.split(['?', '#']).next().unwrap_or_default();
            without_suffix.rsplit('/').next().map(str::to_string)
        }
    };

    last_segment
        .as_deref()
        .and_then(|segment| segment.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(str::to_ascii_lowercase)
        .filter(|ext| ext != PARTIAL_EXTENSION)
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}
