//! PE resource extraction for `WEVT_TEMPLATE` blobs (via `goblin`).
//!
//! Template definitions ship as PE resources of the named type `WEVT_TEMPLATE`
//! (`WEVT_TEMPLATE/<id>/<language>`). Only the PE header, the section table and the resource
//! directory are read; malformed structures are rejected, never skipped.

use goblin::pe::header;
use goblin::pe::options::ParseOptions;
use goblin::pe::resource::{ImageResourceDirectory, ResourceDataEntry, ResourceEntry};
use goblin::pe::section_table::SectionTable;
use log::debug;
use thiserror::Error;

use crate::utils::bytes;

pub const WEVT_TEMPLATE_RESOURCE_TYPE: &str = "WEVT_TEMPLATE";

const IMAGE_RESOURCE_DIRECTORY_HEADER_SIZE: usize = 16;
const RESOURCE_DATA_ENTRY_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum PeError {
    #[error("input is not a valid PE file: {message}")]
    InvalidPe { message: &'static str },

    #[error("malformed PE file: {message}")]
    MalformedPe { message: &'static str },

    #[error("failed to map RVA 0x{rva:08x} to a file offset")]
    UnmappedRva { rva: u32 },

    #[error("resource directory is malformed: {message}")]
    MalformedResource { message: &'static str },

    #[error("failed to decode UTF-16 resource name")]
    InvalidResourceName,
}

type Result<T> = std::result::Result<T, PeError>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceIdentifier {
    Id(u32),
    Name(String),
}

/// One `WEVT_TEMPLATE` resource (a CRIM blob).
#[derive(Debug, Clone)]
pub struct WevtTemplateResource {
    /// The entry under the `WEVT_TEMPLATE` type (usually `1`).
    pub resource: ResourceIdentifier,
    pub lang_id: u32,
    pub data: Vec<u8>,
}

fn malformed(message: &'static str) -> PeError {
    PeError::MalformedResource { message }
}

/// The mapped `.rsrc` directory plus what is needed to resolve data RVAs.
struct ResourceSection<'a> {
    pe: &'a [u8],
    rsrc: &'a [u8],
    sections: Vec<SectionTable>,
    file_alignment: u32,
    opts: ParseOptions,
}

impl<'a> ResourceSection<'a> {
    /// Locate the resource directory. `Ok(None)` when the image has no resources.
    fn locate(pe: &'a [u8]) -> Result<Option<Self>> {
        // `PE::parse` eagerly parses every data directory and rejects minimal images over
        // invariants irrelevant here, so only the header and section table are parsed.
        let header = header::Header::parse(pe).map_err(|_| PeError::InvalidPe {
            message: "failed to parse PE headers",
        })?;
        let optional_header = header.optional_header.ok_or(PeError::InvalidPe {
            message: "missing optional header",
        })?;

        let Some(resource_table) = optional_header.data_directories.get_resource_table() else {
            return Ok(None);
        };
        if resource_table.virtual_address == 0 || resource_table.size == 0 {
            return Ok(None);
        }

        let optional_header_offset = header.dos_header.pe_pointer as usize
            + header::SIZEOF_PE_MAGIC
            + header::SIZEOF_COFF_HEADER;
        let mut sections_offset =
            optional_header_offset + header.coff_header.size_of_optional_header as usize;
        let sections = header
            .coff_header
            .sections(pe, &mut sections_offset)
            .map_err(|_| PeError::MalformedPe {
                message: "failed to parse section headers",
            })?;

        let mut section = ResourceSection {
            pe,
            rsrc: &[],
            sections,
            file_alignment: optional_header.windows_fields.file_alignment,
            opts: ParseOptions::default(),
        };

        let rsrc_offset = section.file_offset(resource_table.virtual_address)?;
        section.rsrc = bytes::slice(pe, rsrc_offset, resource_table.size as usize).ok_or(
            PeError::MalformedPe {
                message: "resource directory out of bounds",
            },
        )?;
        Ok(Some(section))
    }

    fn file_offset(&self, rva: u32) -> Result<usize> {
        goblin::pe::utils::find_offset(rva as usize, &self.sections, self.file_alignment, &self.opts)
            .ok_or(PeError::UnmappedRva { rva })
    }

    fn directory_entries(&self, dir_offset: usize) -> Result<Vec<ResourceEntry>> {
        let header = bytes::slice(self.rsrc, dir_offset, IMAGE_RESOURCE_DIRECTORY_HEADER_SIZE)
            .ok_or_else(|| malformed("resource directory header out of bounds"))?;

        let dir = ImageResourceDirectory {
            characteristics: bytes::read_u32_le(header, 0).unwrap_or_default(),
            time_date_stamp: bytes::read_u32_le(header, 4).unwrap_or_default(),
            major_version: bytes::read_u16_le(header, 8).unwrap_or_default(),
            minor_version: bytes::read_u16_le(header, 10).unwrap_or_default(),
            number_of_named_entries: bytes::read_u16_le(header, 12).unwrap_or_default(),
            number_of_id_entries: bytes::read_u16_le(header, 14).unwrap_or_default(),
        };

        dir.next_iter(dir_offset + IMAGE_RESOURCE_DIRECTORY_HEADER_SIZE, self.rsrc)
            .map_err(|_| malformed("resource directory entries out of bounds"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| malformed("failed to parse resource directory entries"))
    }

    /// A resource name: `u16` character count followed by UTF-16LE characters.
    fn name(&self, offset: usize) -> Result<String> {
        let char_count = bytes::read_u16_le(self.rsrc, offset)
            .ok_or_else(|| malformed("resource name length out of bounds"))?;
        let raw = bytes::slice(self.rsrc, offset + 2, usize::from(char_count) * 2)
            .ok_or_else(|| malformed("resource name out of bounds"))?;
        let units = crate::utils::utf16le_units(raw).map_err(|_| PeError::InvalidResourceName)?;
        crate::utils::decode_utf16_units(&units).map_err(|_| PeError::InvalidResourceName)
    }

    fn identifier(&self, entry: &ResourceEntry) -> Result<ResourceIdentifier> {
        if entry.name_is_string() {
            Ok(ResourceIdentifier::Name(
                self.name(entry.name_offset() as usize)?,
            ))
        } else {
            Ok(ResourceIdentifier::Id(entry.name_offset()))
        }
    }

    fn data(&self, data_entry_offset: usize) -> Result<&'a [u8]> {
        let raw = bytes::slice(self.rsrc, data_entry_offset, RESOURCE_DATA_ENTRY_SIZE)
            .ok_or_else(|| malformed("resource data entry out of bounds"))?;
        let entry = ResourceDataEntry {
            offset_to_data: bytes::read_u32_le(raw, 0).unwrap_or_default(),
            size: bytes::read_u32_le(raw, 4).unwrap_or_default(),
            code_page: bytes::read_u32_le(raw, 8).unwrap_or_default(),
            reserved: bytes::read_u32_le(raw, 12).unwrap_or_default(),
        };

        let data_offset = self.file_offset(entry.offset_to_data)?;
        bytes::slice(self.pe, data_offset, entry.size as usize).ok_or(PeError::MalformedPe {
            message: "resource data out of bounds",
        })
    }
}

/// Extract every `WEVT_TEMPLATE` resource blob from a PE image.
///
/// Returns an empty vector when the image has no resources or no `WEVT_TEMPLATE` type.
pub fn extract_wevt_template_resources(pe_bytes: &[u8]) -> Result<Vec<WevtTemplateResource>> {
    let Some(section) = ResourceSection::locate(pe_bytes)? else {
        debug!("PE image has no resource directory");
        return Ok(Vec::new());
    };

    let mut type_entry = None;
    for entry in section.directory_entries(0)? {
        if entry.name_is_string()
            && section.name(entry.name_offset() as usize)? == WEVT_TEMPLATE_RESOURCE_TYPE
        {
            type_entry = Some(entry);
            break;
        }
    }
    let Some(type_entry) = type_entry.filter(|e| e.data_is_directory()) else {
        debug!("PE image has no {WEVT_TEMPLATE_RESOURCE_TYPE} resources");
        return Ok(Vec::new());
    };

    let mut out = Vec::new();
    for resource_entry in section.directory_entries(type_entry.offset_to_directory() as usize)? {
        if !resource_entry.data_is_directory() {
            continue;
        }
        let resource = section.identifier(&resource_entry)?;

        let lang_dir = resource_entry.offset_to_directory() as usize;
        for lang_entry in section.directory_entries(lang_dir)? {
            if lang_entry.name_is_string() {
                continue;
            }
            let Some(data_entry_offset) = lang_entry.offset_to_data() else {
                continue;
            };

            let data = section.data(data_entry_offset as usize)?;
            if data.is_empty() {
                continue;
            }

            debug!(
                "found {WEVT_TEMPLATE_RESOURCE_TYPE} {resource:?} lang {} ({} bytes)",
                lang_entry.name_offset(),
                data.len()
            );
            out.push(WevtTemplateResource {
                resource: resource.clone(),
                lang_id: lang_entry.name_offset(),
                data: data.to_vec(),
            });
        }
    }

    Ok(out)
}
