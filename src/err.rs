use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::binxml::BinXmlError;
use crate::extract::PeError;
use crate::guid::{Guid, GuidParseError};
use crate::manifest::ManifestError;
use crate::wevtcache::CacheFileError;

pub type Result<T> = std::result::Result<T, WevtError>;

/// Broad classification of a [`WevtError`], for callers that only need to pick a remediation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed, truncated or inconsistent bytes.
    Format,
    /// A well-formed lookup key without a matching entry.
    NotFound,
    /// File-system failures, unusable PE images, missing resources.
    Io,
    /// The caller passed something unusable.
    InvalidInput,
}

#[derive(Debug, Error)]
pub enum WevtError {
    #[error("failed to parse WEVT manifest: {0}")]
    Manifest(#[from] ManifestError),

    #[error("failed to decode BinXML: {0}")]
    BinXml(#[from] BinXmlError),

    #[error("{0}")]
    Pe(#[from] PeError),

    #[error("{0}")]
    CacheFile(#[from] CacheFileError),

    #[error("{0}")]
    InvalidGuid(#[from] GuidParseError),

    #[error("failed to parse WEVT manifest in resource {resource_index} of `{path}`: {source}")]
    ManifestInResource {
        path: PathBuf,
        resource_index: usize,
        #[source]
        source: ManifestError,
    },

    #[error("no template for provider {provider_guid} event {event_id} version {version}")]
    EventNotFound {
        provider_guid: Guid,
        event_id: u16,
        version: u8,
    },

    #[error("template {guid} not found in cache")]
    TemplateNotFound { guid: Guid },

    #[error("`{path}` does not contain a WEVT_TEMPLATE resource")]
    NoWevtTemplate { path: PathBuf },

    #[error("I/O error while reading `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl WevtError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WevtError::Manifest(_) | WevtError::ManifestInResource { .. } => ErrorKind::Format,
            WevtError::BinXml(BinXmlError::MissingSubstitution { .. }) => ErrorKind::InvalidInput,
            WevtError::BinXml(_) => ErrorKind::Format,
            WevtError::Pe(_) | WevtError::NoWevtTemplate { .. } | WevtError::Io { .. } => {
                ErrorKind::Io
            }
            WevtError::CacheFile(e) => match e {
                CacheFileError::OutputExists { .. } | CacheFileError::Io { .. } => ErrorKind::Io,
                _ => ErrorKind::Format,
            },
            WevtError::InvalidGuid(_) => ErrorKind::InvalidInput,
            WevtError::EventNotFound { .. } | WevtError::TemplateNotFound { .. } => {
                ErrorKind::NotFound
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}
