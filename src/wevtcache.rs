//! `.wevtcache` single-file container for a committed [`WevtCache`](crate::WevtCache) index.
//!
//! ## Format (version 1)
//!
//! A `.wevtcache` file is a small, self-describing TLV container (little-endian):
//!
//! - `MAGIC` (8 bytes): `b"WEVTCACH"`
//! - `version` (u32): currently `1`
//! - `entry_count` (u32)
//! - `entry_count` times:
//!   - `kind` (u8)
//!   - `len` (u64)
//!   - `payload` (`len` bytes)
//!
//! Entry kinds:
//!
//! - [`EntryKind::Template`]: template GUID (16), original `TEMP` offset inside its CRIM blob
//!   (u32), then the raw `TEMP` bytes.
//! - [`EntryKind::Event`]: provider GUID (16), event id (u16), version (u8), template GUID (16).
//!
//! Writers emit every template before any event, so a reader can reject events whose template
//! is unknown.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::guid::Guid;
use crate::manifest::EventKey;

pub const MAGIC: [u8; 8] = *b"WEVTCACH";
pub const VERSION: u32 = 1;

const ENTRY_COUNT_OFFSET: u64 = 12;
const EVENT_PAYLOAD_SIZE: u64 = 16 + 2 + 1 + 16;
const TEMPLATE_PAYLOAD_HEADER_SIZE: u64 = 16 + 4;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A template body.
    Template = 1,
    /// An `(provider, event id, version) -> template GUID` mapping.
    Event = 2,
}

impl EntryKind {
    fn from_u8(kind: u8) -> Option<Self> {
        match kind {
            1 => Some(EntryKind::Template),
            2 => Some(EntryKind::Event),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WevtCacheHeader {
    pub magic: [u8; 8],
    pub version: u32,
    pub entry_count: u32,
}

impl WevtCacheHeader {
    pub const SIZE: usize = 8 + 4 + 4;

    pub fn new(entry_count: u32) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            entry_count,
        }
    }

    fn read_from(mut r: impl Read) -> io::Result<Self> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        let version = r.read_u32::<LittleEndian>()?;
        let entry_count = r.read_u32::<LittleEndian>()?;

        Ok(Self {
            magic,
            version,
            entry_count,
        })
    }

    fn write_to(&self, mut w: impl Write) -> io::Result<()> {
        w.write_all(&self.magic)?;
        w.write_u32::<LittleEndian>(self.version)?;
        w.write_u32::<LittleEndian>(self.entry_count)?;
        Ok(())
    }
}

/// One decoded entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry {
    Template {
        guid: Guid,
        /// Offset of the `TEMP` block inside the CRIM blob it came from.
        offset: u32,
        temp: Vec<u8>,
    },
    Event {
        key: EventKey,
        template_guid: Guid,
    },
}

#[derive(Debug, Error)]
pub enum CacheFileError {
    #[error("refusing to overwrite existing output file `{path}` (pass overwrite=true)")]
    OutputExists { path: PathBuf },

    #[error("I/O error while {action} `{path}`: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid `.wevtcache` magic for `{path}`")]
    InvalidMagic { path: PathBuf, found: [u8; 8] },

    #[error("unsupported `.wevtcache` version {found} for `{path}` (expected {expected})")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("unknown `.wevtcache` entry kind {kind} for `{path}`")]
    UnknownEntryKind { path: PathBuf, kind: u8 },

    #[error("`.wevtcache` entry length does not fit usize for `{path}`: {len}")]
    EntryLengthTooLarge { path: PathBuf, len: u64 },

    #[error("wevtcache entry count overflow for `{path}`")]
    EntryCountOverflow { path: PathBuf },

    #[error("`.wevtcache` file `{path}` is truncated while reading {what}")]
    Truncated { path: PathBuf, what: &'static str },

    #[error("malformed `.wevtcache` {kind:?} entry in `{path}`: {reason}")]
    MalformedEntry {
        path: PathBuf,
        kind: EntryKind,
        reason: &'static str,
    },

    #[error("`.wevtcache` file `{path}` has data after the last entry")]
    TrailingData { path: PathBuf },

    #[error("event {key:?} in `{path}` refers to unknown template {template_guid}")]
    DanglingTemplate {
        path: PathBuf,
        key: EventKey,
        template_guid: Guid,
    },
}

pub type Result<T> = std::result::Result<T, CacheFileError>;

fn io_error<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> CacheFileError + 'a {
    move |source| CacheFileError::Io {
        action,
        path: path.to_path_buf(),
        source,
    }
}

/// EOF inside a structure is a format problem, everything else is I/O.
fn read_error<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> CacheFileError + 'a {
    move |source| {
        if source.kind() == io::ErrorKind::UnexpectedEof {
            CacheFileError::Truncated {
                path: path.to_path_buf(),
                what: action,
            }
        } else {
            CacheFileError::Io {
                action,
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

pub struct WevtCacheWriter {
    out: BufWriter<File>,
    path: PathBuf,
    count: u32,
}

impl WevtCacheWriter {
    /// Create `path` and write a header with a zero entry count.
    ///
    /// Fails with [`CacheFileError::OutputExists`] when `path` exists and `overwrite` is false.
    pub fn create(path: &Path, overwrite: bool) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }

        let file = options.open(path).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                CacheFileError::OutputExists {
                    path: path.to_path_buf(),
                }
            } else {
                io_error("create", path)(e)
            }
        })?;

        let mut out = BufWriter::new(file);
        WevtCacheHeader::new(0)
            .write_to(&mut out)
            .map_err(io_error("write header", path))?;

        Ok(Self {
            out,
            path: path.to_path_buf(),
            count: 0,
        })
    }

    pub fn write_template(&mut self, guid: &Guid, offset: u32, temp: &[u8]) -> Result<()> {
        let len = TEMPLATE_PAYLOAD_HEADER_SIZE + temp.len() as u64;
        self.write_entry_header(EntryKind::Template, len)?;

        let path = &self.path;
        let out = &mut self.out;
        (|| -> io::Result<()> {
            out.write_all(&guid.to_bytes())?;
            out.write_u32::<LittleEndian>(offset)?;
            out.write_all(temp)
        })()
        .map_err(io_error("write template entry", path))
    }

    pub fn write_event(&mut self, key: &EventKey, template_guid: &Guid) -> Result<()> {
        self.write_entry_header(EntryKind::Event, EVENT_PAYLOAD_SIZE)?;

        let path = &self.path;
        let out = &mut self.out;
        (|| -> io::Result<()> {
            out.write_all(&key.provider_guid.to_bytes())?;
            out.write_u16::<LittleEndian>(key.event_id)?;
            out.write_u8(key.version)?;
            out.write_all(&template_guid.to_bytes())
        })()
        .map_err(io_error("write event entry", path))
    }

    fn write_entry_header(&mut self, kind: EntryKind, len: u64) -> Result<()> {
        self.count = self
            .count
            .checked_add(1)
            .ok_or_else(|| CacheFileError::EntryCountOverflow {
                path: self.path.clone(),
            })?;

        self.out
            .write_u8(kind as u8)
            .and_then(|_| self.out.write_u64::<LittleEndian>(len))
            .map_err(io_error("write entry header", &self.path))
    }

    /// Patch the entry count into the header and flush. Returns the number of entries written.
    pub fn finish(self) -> Result<u32> {
        let WevtCacheWriter { out, path, count } = self;

        let mut file = out
            .into_inner()
            .map_err(|e| io_error("flush", &path)(e.into_error()))?;

        file.seek(SeekFrom::Start(ENTRY_COUNT_OFFSET))
            .map_err(io_error("seek to entry_count", &path))?;
        file.write_u32::<LittleEndian>(count)
            .map_err(io_error("write entry_count", &path))?;
        file.sync_all().map_err(io_error("sync", &path))?;

        Ok(count)
    }
}

pub struct WevtCacheReader {
    input: BufReader<File>,
    path: PathBuf,
    remaining: u32,
    entry_count: u32,
}

impl WevtCacheReader {
    /// Open `path` and validate its magic and version.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(io_error("open", path))?;
        let mut input = BufReader::new(file);

        let header =
            WevtCacheHeader::read_from(&mut input).map_err(read_error("header", path))?;

        if header.magic != MAGIC {
            return Err(CacheFileError::InvalidMagic {
                path: path.to_path_buf(),
                found: header.magic,
            });
        }

        if header.version != VERSION {
            return Err(CacheFileError::UnsupportedVersion {
                path: path.to_path_buf(),
                found: header.version,
                expected: VERSION,
            });
        }

        Ok(Self {
            input,
            path: path.to_path_buf(),
            remaining: header.entry_count,
            entry_count: header.entry_count,
        })
    }

    /// The entry count declared in the header.
    pub fn entry_count(&self) -> u32 {
        self.entry_count
    }

    /// Read the next entry; `Ok(None)` once every declared entry was read.
    pub fn next_entry(&mut self) -> Result<Option<CacheEntry>> {
        if self.remaining == 0 {
            return self.expect_end().map(|_| None);
        }

        let kind_u8 = self
            .input
            .read_u8()
            .map_err(read_error("entry header", &self.path))?;
        let len_u64 = self
            .input
            .read_u64::<LittleEndian>()
            .map_err(read_error("entry header", &self.path))?;

        let kind = EntryKind::from_u8(kind_u8).ok_or_else(|| CacheFileError::UnknownEntryKind {
            path: self.path.clone(),
            kind: kind_u8,
        })?;

        let entry = match kind {
            EntryKind::Template => self.read_template(len_u64)?,
            EntryKind::Event => self.read_event(len_u64)?,
        };

        self.remaining -= 1;
        Ok(Some(entry))
    }

    fn read_template(&mut self, len: u64) -> Result<CacheEntry> {
        if len < TEMPLATE_PAYLOAD_HEADER_SIZE {
            return Err(self.malformed(EntryKind::Template, "payload shorter than its header"));
        }
        let body_len = usize::try_from(len - TEMPLATE_PAYLOAD_HEADER_SIZE).map_err(|_| {
            CacheFileError::EntryLengthTooLarge {
                path: self.path.clone(),
                len,
            }
        })?;

        let guid = self.read_guid("template entry")?;
        let offset = self
            .input
            .read_u32::<LittleEndian>()
            .map_err(read_error("template entry", &self.path))?;

        // Read through `take` so a bogus length cannot force a huge allocation up front.
        let mut temp = Vec::new();
        let read = (&mut self.input)
            .take(body_len as u64)
            .read_to_end(&mut temp)
            .map_err(read_error("template entry", &self.path))?;
        if read != body_len {
            return Err(CacheFileError::Truncated {
                path: self.path.clone(),
                what: "template entry",
            });
        }

        Ok(CacheEntry::Template { guid, offset, temp })
    }

    fn read_event(&mut self, len: u64) -> Result<CacheEntry> {
        if len != EVENT_PAYLOAD_SIZE {
            return Err(self.malformed(EntryKind::Event, "unexpected payload length"));
        }

        let provider_guid = self.read_guid("event entry")?;
        let event_id = self
            .input
            .read_u16::<LittleEndian>()
            .map_err(read_error("event entry", &self.path))?;
        let version = self
            .input
            .read_u8()
            .map_err(read_error("event entry", &self.path))?;
        let template_guid = self.read_guid("event entry")?;

        Ok(CacheEntry::Event {
            key: EventKey {
                provider_guid,
                event_id,
                version,
            },
            template_guid,
        })
    }

    fn read_guid(&mut self, what: &'static str) -> Result<Guid> {
        let mut raw = [0u8; 16];
        self.input
            .read_exact(&mut raw)
            .map_err(read_error(what, &self.path))?;
        Ok(Guid::from_bytes(raw))
    }

    fn expect_end(&mut self) -> Result<()> {
        let mut probe = [0u8; 1];
        match self.input.read(&mut probe) {
            Ok(0) => Ok(()),
            Ok(_) => Err(CacheFileError::TrailingData {
                path: self.path.clone(),
            }),
            Err(e) => Err(io_error("read", &self.path)(e)),
        }
    }

    fn malformed(&self, kind: EntryKind, reason: &'static str) -> CacheFileError {
        CacheFileError::MalformedEntry {
            path: self.path.clone(),
            kind,
            reason,
        }
    }
}
