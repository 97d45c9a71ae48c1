use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use log::{debug, trace};

use super::error::{ManifestError, Result};
use super::types::*;
use super::util::*;
use crate::binxml::parse_fragment;
use crate::guid::Guid;

pub(crate) const CRIM_HEADER_SIZE: usize = 16;
const PROVIDER_DESCRIPTOR_SIZE: usize = 20;
const WEVT_HEADER_SIZE: usize = 20;
const WEVT_DESCRIPTOR_SIZE: usize = 8;
const EVNT_HEADER_SIZE: usize = 16;
const EVENT_DEFINITION_SIZE: usize = 48;
const TTBL_HEADER_SIZE: usize = 12;
pub(crate) const TEMP_HEADER_SIZE: usize = 40;
const TEMPLATE_ITEM_SIZE: usize = 20;

/// `WEVT.message_identifier` value meaning "no message".
const NO_MESSAGE: u32 = 0xffff_ffff;

impl Manifest {
    /// Parse a CRIM manifest blob (the payload stored inside a `WEVT_TEMPLATE` resource).
    ///
    /// Every declared size, count and offset is checked against the buffer; the first
    /// inconsistency fails the whole parse. Bytes past `CRIM.size` are ignored.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = parse_crim_header(data)?;
        let crim_end = checked_end(data.len(), 0, header.size, "CRIM.size")?;
        let data = &data[..crim_end];

        let descriptors_len = require_table(
            data,
            CRIM_HEADER_SIZE,
            header.provider_count,
            PROVIDER_DESCRIPTOR_SIZE,
            "CRIM provider descriptor array",
        )?;

        let mut seen = HashSet::new();
        let mut providers = Vec::with_capacity(descriptors_len / PROVIDER_DESCRIPTOR_SIZE);
        for desc_off in (CRIM_HEADER_SIZE..CRIM_HEADER_SIZE + descriptors_len)
            .step_by(PROVIDER_DESCRIPTOR_SIZE)
        {
            let guid = read_guid_named(data, desc_off, "CRIM.provider.guid")?;
            let provider_off = read_u32_named(data, desc_off + 16, "CRIM.provider.offset")?;

            if !seen.insert(guid) {
                return Err(ManifestError::DuplicateProvider { guid });
            }
            providers.push(parse_provider(data, guid, provider_off)?);
        }

        debug!(
            "parsed CRIM v{}.{} with {} provider(s)",
            header.major_version,
            header.minor_version,
            providers.len()
        );

        Ok(Manifest { header, providers })
    }

    /// Join every event to its template GUID, and every template GUID to its template.
    ///
    /// Events without a template, or whose template offset does not resolve inside their
    /// provider, are not part of the index.
    pub fn build_index(&self) -> ManifestIndex<'_> {
        let mut index = ManifestIndex::default();

        for provider in &self.providers {
            for template in &provider.templates {
                index.templates.insert(template.guid, template);
            }

            for event in &provider.events {
                let Some(template) = provider.template_for_event(event) else {
                    if let Some(offset) = event.template_offset {
                        debug!(
                            "provider {}: event {} v{} references unknown template offset {}",
                            provider.guid, event.identifier, event.version, offset
                        );
                    }
                    continue;
                };

                let key = EventKey {
                    provider_guid: provider.guid,
                    event_id: event.identifier,
                    version: event.version,
                };
                index.event_templates.insert(key, template.guid);
            }
        }

        index
    }
}

impl Template {
    /// Parse a standalone `TEMP` block.
    ///
    /// `offset` is where the block starts inside its CRIM blob; item and name offsets are stored
    /// relative to the CRIM blob and are rebased with it.
    pub fn parse(temp: &[u8], offset: u32) -> Result<Self> {
        parse_temp(temp, offset)
    }
}

fn parse_crim_header(data: &[u8]) -> Result<CrimHeader> {
    require_len(data, 0, CRIM_HEADER_SIZE, "CRIM header")?;
    expect_sig(data, 0, *b"CRIM", "CRIM signature")?;

    let size = read_u32_named(data, 4, "CRIM.size")?;
    let major_version = read_u16_named(data, 8, "CRIM.major_version")?;
    let minor_version = read_u16_named(data, 10, "CRIM.minor_version")?;
    let provider_count = read_u32_named(data, 12, "CRIM.provider_count")?;

    if (size as usize) < CRIM_HEADER_SIZE {
        return Err(ManifestError::SizeOutOfBounds {
            what: "CRIM.size",
            offset: 0,
            size,
        });
    }

    Ok(CrimHeader {
        size,
        major_version,
        minor_version,
        provider_count,
    })
}

fn parse_provider(crim: &[u8], guid: Guid, provider_off: u32) -> Result<Provider> {
    let off = u32_to_usize(provider_off, "WEVT provider offset", crim.len())?;
    require_len(crim, off, WEVT_HEADER_SIZE, "WEVT header")?;
    expect_sig(crim, off, *b"WEVT", "WEVT signature")?;

    let size = read_u32_named(crim, off + 4, "WEVT.size")?;
    let message_identifier = read_u32_named(crim, off + 8, "WEVT.message_identifier")?;
    let descriptor_count = read_u32_named(crim, off + 12, "WEVT.number_of_descriptors")?;
    let unknown2_count = read_u32_named(crim, off + 16, "WEVT.number_of_unknown2")?;

    let desc_off = off + WEVT_HEADER_SIZE;
    let desc_len = require_table(
        crim,
        desc_off,
        descriptor_count,
        WEVT_DESCRIPTOR_SIZE,
        "WEVT descriptor array",
    )?;

    let mut element_descriptors = Vec::with_capacity(desc_len / WEVT_DESCRIPTOR_SIZE);
    for d_off in (desc_off..desc_off + desc_len).step_by(WEVT_DESCRIPTOR_SIZE) {
        let element_offset = read_u32_named(crim, d_off, "WEVT.descriptor.element_offset")?;
        let unknown = read_u32_named(crim, d_off + 4, "WEVT.descriptor.unknown")?;
        let element_off = u32_to_usize(element_offset, "WEVT element offset", crim.len())?;
        let signature = read_sig_named(crim, element_off, "WEVT element signature")?;
        element_descriptors.push(ElementDescriptor {
            element_offset,
            unknown,
            signature,
        });
    }

    let unknown2_off = desc_off + desc_len;
    let unknown2_len = require_table(crim, unknown2_off, unknown2_count, 4, "WEVT unknown2 array")?;

    // As with EVNT, zero leaves the block bounded by its tables alone.
    if size != 0 {
        let end = checked_end(crim.len(), provider_off, size, "WEVT.size")?;
        if (size as usize) < WEVT_HEADER_SIZE || unknown2_off + unknown2_len > end {
            return Err(ManifestError::SizeOutOfBounds {
                what: "WEVT.size",
                offset: provider_off,
                size,
            });
        }
    }
    let unknown2 = (unknown2_off..unknown2_off + unknown2_len)
        .step_by(4)
        .map(|o| read_u32_named(crim, o, "WEVT.unknown2"))
        .collect::<Result<Vec<_>>>()?;

    let mut events = Vec::new();
    let mut templates = Vec::new();
    for d in &element_descriptors {
        match &d.signature {
            b"EVNT" => events.extend(parse_events(crim, d.element_offset)?),
            b"TTBL" => templates.extend(parse_ttbl(crim, d.element_offset)?),
            other => {
                debug!(
                    "provider {guid}: skipping `{}` element at offset {}",
                    String::from_utf8_lossy(other),
                    d.element_offset
                );
            }
        }
    }

    let templates_by_offset: HashMap<u32, usize> = templates
        .iter()
        .enumerate()
        .map(|(idx, t): (usize, &Template)| (t.offset, idx))
        .collect();

    debug!(
        "provider {guid}: {} event(s), {} template(s)",
        events.len(),
        templates.len()
    );

    Ok(Provider {
        guid,
        offset: provider_off,
        size,
        message_identifier: (message_identifier != NO_MESSAGE).then_some(message_identifier),
        element_descriptors,
        unknown2,
        events,
        templates,
        templates_by_offset,
    })
}

fn parse_events(crim: &[u8], off: u32) -> Result<Vec<Event>> {
    let off_usize = u32_to_usize(off, "EVNT offset", crim.len())?;
    require_len(crim, off_usize, EVNT_HEADER_SIZE, "EVNT header")?;
    expect_sig(crim, off_usize, *b"EVNT", "EVNT signature")?;
    let size = read_u32_named(crim, off_usize + 4, "EVNT.size")?;
    let count = read_u32_named(crim, off_usize + 8, "EVNT.count")?;

    let events_off = off_usize + EVNT_HEADER_SIZE;
    let events_len = require_table(crim, events_off, count, EVENT_DEFINITION_SIZE, "EVNT event array")?;

    // A zero size is accepted; `count` alone then bounds the array.
    if size != 0 {
        if (size as usize) < EVNT_HEADER_SIZE {
            return Err(ManifestError::SizeOutOfBounds {
                what: "EVNT.size",
                offset: off,
                size,
            });
        }
        let end = checked_end(crim.len(), off, size, "EVNT.size")?;
        if events_off + events_len > end {
            return Err(ManifestError::SizeOutOfBounds {
                what: "EVNT event array",
                offset: off,
                size,
            });
        }
    }

    (events_off..events_off + events_len)
        .step_by(EVENT_DEFINITION_SIZE)
        .map(|e_off| parse_event(crim, e_off))
        .collect()
}

fn parse_event(crim: &[u8], e_off: usize) -> Result<Event> {
    Ok(Event {
        identifier: read_u16_named(crim, e_off, "EVNT.event.identifier")?,
        version: read_u8_named(crim, e_off + 2, "EVNT.event.version")?,
        channel: read_u8_named(crim, e_off + 3, "EVNT.event.channel")?,
        level: read_u8_named(crim, e_off + 4, "EVNT.event.level")?,
        opcode: read_u8_named(crim, e_off + 5, "EVNT.event.opcode")?,
        task: read_u16_named(crim, e_off + 6, "EVNT.event.task")?,
        keywords: read_u64_named(crim, e_off + 8, "EVNT.event.keywords")?,
        message_identifier: read_u32_named(crim, e_off + 16, "EVNT.event.message_identifier")?,
        template_offset: non_zero(read_u32_named(crim, e_off + 20, "EVNT.event.template_offset")?),
        opcode_offset: non_zero(read_u32_named(crim, e_off + 24, "EVNT.event.opcode_offset")?),
        level_offset: non_zero(read_u32_named(crim, e_off + 28, "EVNT.event.level_offset")?),
        task_offset: non_zero(read_u32_named(crim, e_off + 32, "EVNT.event.task_offset")?),
        unknown_count: read_u32_named(crim, e_off + 36, "EVNT.event.unknown_count")?,
        unknown_offset: read_u32_named(crim, e_off + 40, "EVNT.event.unknown_offset")?,
        flags: read_u32_named(crim, e_off + 44, "EVNT.event.flags")?,
    })
}

fn parse_ttbl(crim: &[u8], off: u32) -> Result<Vec<Template>> {
    let off_usize = u32_to_usize(off, "TTBL offset", crim.len())?;
    require_len(crim, off_usize, TTBL_HEADER_SIZE, "TTBL header")?;
    expect_sig(crim, off_usize, *b"TTBL", "TTBL signature")?;
    let size = read_u32_named(crim, off_usize + 4, "TTBL.size")?;
    let count = read_u32_named(crim, off_usize + 8, "TTBL.count")?;

    let end = if size == 0 {
        // Parsed by `count` and the per-template sizes.
        crim.len()
    } else {
        if (size as usize) < TTBL_HEADER_SIZE {
            return Err(ManifestError::SizeOutOfBounds {
                what: "TTBL.size",
                offset: off,
                size,
            });
        }
        checked_end(crim.len(), off, size, "TTBL.size")?
    };

    let count_usize = count_to_usize(count, "TTBL.count", off_usize + 8)?;
    let mut templates = Vec::with_capacity(count_usize.min(end / TEMP_HEADER_SIZE));
    let mut cur = off_usize + TTBL_HEADER_SIZE;

    for _ in 0..count_usize {
        if cur + TEMP_HEADER_SIZE > end {
            return Err(ManifestError::Truncated {
                what: "TEMP header",
                offset: usize_to_u32(cur),
                need: TEMP_HEADER_SIZE,
                have: end.saturating_sub(cur),
            });
        }
        expect_sig(crim, cur, *b"TEMP", "TEMP signature")?;
        let temp_size = read_u32_named(crim, cur + 4, "TEMP.size")?;
        if (temp_size as usize) < TEMP_HEADER_SIZE {
            return Err(ManifestError::SizeOutOfBounds {
                what: "TEMP.size",
                offset: usize_to_u32(cur),
                size: temp_size,
            });
        }
        let temp_end = checked_end(end, usize_to_u32(cur), temp_size, "TEMP.size")?;

        templates.push(parse_temp(&crim[cur..temp_end], usize_to_u32(cur))?);
        cur = temp_end;
    }

    Ok(templates)
}

fn parse_temp(temp: &[u8], temp_off: u32) -> Result<Template> {
    require_len(temp, 0, TEMP_HEADER_SIZE, "TEMP header")?;
    expect_sig(temp, 0, *b"TEMP", "TEMP signature")?;

    let size = read_u32_named(temp, 4, "TEMP.size")?;
    if size as usize != temp.len() || temp.len() < TEMP_HEADER_SIZE {
        return Err(ManifestError::SizeOutOfBounds {
            what: "TEMP.size",
            offset: temp_off,
            size,
        });
    }

    let item_descriptor_count = read_u32_named(temp, 8, "TEMP.item_descriptor_count")?;
    let item_name_count = read_u32_named(temp, 12, "TEMP.item_name_count")?;
    let template_items_offset = read_u32_named(temp, 16, "TEMP.template_items_offset")?;
    let event_type = read_u32_named(temp, 20, "TEMP.event_type")?;
    let guid = read_guid_named(temp, 24, "TEMP.guid")?;

    if item_name_count > item_descriptor_count {
        return Err(ManifestError::CountOutOfBounds {
            what: "TEMP.item_name_count (exceeds item_descriptor_count)",
            offset: temp_off.saturating_add(12),
            count: item_name_count,
        });
    }

    // Without descriptors the items offset is either 0 or the end of the template; either way
    // the BinXML runs to the end of the block.
    let binxml_end = if item_descriptor_count == 0 {
        let temp_end = temp_off.saturating_add(size);
        if template_items_offset != 0 && template_items_offset != temp_end {
            return Err(ManifestError::OffsetOutOfBounds {
                what: "TEMP.template_items_offset (expected 0 or end-of-template without items)",
                offset: template_items_offset,
                len: temp_end as usize,
            });
        }
        temp.len()
    } else {
        items_rel_offset(temp, temp_off, template_items_offset)?
    };

    let binxml = &temp[TEMP_HEADER_SIZE..binxml_end];
    let fragment = parse_fragment(binxml).map_err(|source| ManifestError::TemplateBinXml {
        offset: temp_off,
        source,
    })?;

    let items = parse_template_items(temp, temp_off, item_descriptor_count, binxml_end)?;

    trace!(
        "template {guid} at offset {temp_off}: {} item(s), {} BinXML byte(s)",
        items.len(),
        binxml.len()
    );

    Ok(Template {
        offset: temp_off,
        size,
        item_descriptor_count,
        item_name_count,
        template_items_offset,
        event_type,
        guid,
        items,
        fragment,
        raw: Arc::from(temp),
        binxml_len: binxml.len(),
    })
}

/// Convert the CRIM-relative items offset into an offset inside `temp`, past the header.
fn items_rel_offset(temp: &[u8], temp_off: u32, items_abs: u32) -> Result<usize> {
    let out_of_bounds = || ManifestError::OffsetOutOfBounds {
        what: "TEMP.template_items_offset",
        offset: items_abs,
        len: temp_off as usize + temp.len(),
    };

    let rel = items_abs.checked_sub(temp_off).ok_or_else(out_of_bounds)?;
    let rel = usize::try_from(rel).map_err(|_| out_of_bounds())?;
    if rel < TEMP_HEADER_SIZE || rel >= temp.len() {
        return Err(out_of_bounds());
    }
    Ok(rel)
}

fn parse_template_items(
    temp: &[u8],
    temp_off: u32,
    item_descriptor_count: u32,
    items_rel: usize,
) -> Result<Vec<TemplateItem>> {
    if item_descriptor_count == 0 {
        return Ok(Vec::new());
    }

    let table_len = require_table(
        temp,
        items_rel,
        item_descriptor_count,
        TEMPLATE_ITEM_SIZE,
        "template item descriptors",
    )?;
    let descriptor_end = items_rel + table_len;
    let template_end = temp_off as usize + temp.len();

    let mut items = (items_rel..descriptor_end)
        .step_by(TEMPLATE_ITEM_SIZE)
        .map(|d_off| -> Result<TemplateItem> {
            Ok(TemplateItem {
                unknown1: read_u32_named(temp, d_off, "TEMP.item.unknown1")?,
                input_data_type: read_u8_named(temp, d_off + 4, "TEMP.item.input_type")?,
                output_data_type: read_u8_named(temp, d_off + 5, "TEMP.item.output_type")?,
                unknown3: read_u16_named(temp, d_off + 6, "TEMP.item.unknown3")?,
                unknown4: read_u32_named(temp, d_off + 8, "TEMP.item.unknown4")?,
                number_of_values: read_u16_named(temp, d_off + 12, "TEMP.item.count")?,
                value_data_size: read_u16_named(temp, d_off + 14, "TEMP.item.length")?,
                name_offset: read_u32_named(temp, d_off + 16, "TEMP.item.name_offset")?,
                name: None,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    for item in &mut items {
        if item.name_offset == 0 {
            continue;
        }

        let name_rel = item
            .name_offset
            .checked_sub(temp_off)
            .ok_or(ManifestError::OffsetOutOfBounds {
                what: "template item name_offset",
                offset: item.name_offset,
                len: template_end,
            })?;
        // Names live after the descriptor table.
        if (name_rel as usize) < descriptor_end {
            return Err(ManifestError::OffsetOutOfBounds {
                what: "template item name_offset overlaps descriptor table",
                offset: item.name_offset,
                len: template_end,
            });
        }
        item.name = Some(read_sized_utf16_string(temp, name_rel, "template item name")?);
    }

    Ok(items)
}
