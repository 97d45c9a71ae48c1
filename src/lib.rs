#![forbid(unsafe_code)]
#![deny(unused_must_use)]
#![cfg_attr(not(debug_assertions), deny(clippy::dbg_macro))]

//! Decoder for Windows `WEVT_TEMPLATE` event manifests.
//!
//! Provider binaries embed their event definitions as a `CRIM` blob inside a `WEVT_TEMPLATE`
//! PE resource. This crate decodes that blob into providers, events and templates
//! ([`manifest`]), decodes each template's BinXML body into an element tree ([`binxml`]), and
//! keeps a transactional, persistable [`WevtCache`] that renders template XML for
//! `(provider, event id, version)` keys.
//!
//! ```no_run
//! use wevt_templates::{Guid, SubstitutionValue, WevtCache};
//!
//! # fn main() -> wevt_templates::Result<()> {
//! let cache = WevtCache::new();
//! cache.add_dll(r"C:\Windows\System32\wevtsvc.dll")?;
//!
//! let provider: Guid = "{fc65ddd8-d6ef-4962-83d5-6e5cfe9ce148}".parse()?;
//! let xml = cache.render_event_xml(&provider, 105, 0, &[SubstitutionValue::from("Security")])?;
//! println!("{xml}");
//! # Ok(())
//! # }
//! ```

pub mod binxml;
mod cache;
mod err;
mod extract;
mod guid;
pub mod manifest;
mod utils;
pub mod wevtcache;

pub use crate::binxml::{BinXmlError, BinXmlFragment, SubstitutionValue};
pub use crate::cache::{CacheState, DEFAULT_PE_EXTENSIONS, WevtCache};
pub use crate::err::{ErrorKind, Result, WevtError};
pub use crate::extract::{
    PeError, ResourceIdentifier, WEVT_TEMPLATE_RESOURCE_TYPE, WevtTemplateResource,
    extract_wevt_template_resources,
};
pub use crate::guid::{Guid, GuidParseError, normalize_guid};
pub use crate::manifest::{Event, EventKey, Manifest, ManifestError, Provider, Template, TemplateItem};
