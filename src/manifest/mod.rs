//! Parser for the CRIM/WEVT manifest payload stored in `WEVT_TEMPLATE` resources.
//!
//! Layout (all offsets relative to the start of the CRIM blob):
//!
//! ```text
//! CRIM header (16) + provider descriptors (GUID + WEVT offset, 20 each)
//!   WEVT header (20) + element descriptors (offset + reserved, 8 each) + u32 array
//!     EVNT header (16) + 48-byte event definitions
//!     TTBL header (12) + consecutive TEMP blocks
//!       TEMP header (40) + BinXML fragment + 20-byte item descriptors + item names
//! ```
//!
//! Provider elements other than `EVNT` and `TTBL` (`CHAN`, `KEYW`, `LEVL`, `MAPS`, `OPCO`,
//! `TASK`, unknown) are recorded in the descriptor list and otherwise skipped.

mod error;
mod parse;
mod types;
mod util;

pub use error::{ManifestError, Result};
pub use types::{
    CrimHeader, ElementDescriptor, Event, EventKey, Manifest, ManifestIndex, Provider, Template,
    TemplateItem,
};
