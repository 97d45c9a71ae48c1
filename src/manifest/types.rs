use std::sync::Arc;

use hashbrown::HashMap;
use serde::Serialize;

use crate::binxml::{BinXmlFragment, SubstitutionValue};
use crate::guid::Guid;

/// One parsed CRIM blob.
#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub header: CrimHeader,
    pub providers: Vec<Provider>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CrimHeader {
    pub size: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub provider_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Provider {
    pub guid: Guid,
    /// Offset of the `WEVT` block, relative to the start of the CRIM blob.
    pub offset: u32,
    pub size: u32,
    pub message_identifier: Option<u32>,
    pub element_descriptors: Vec<ElementDescriptor>,
    pub unknown2: Vec<u32>,
    /// Events in on-disk order.
    pub events: Vec<Event>,
    /// Templates in on-disk order.
    pub templates: Vec<Template>,
    #[serde(skip)]
    pub(crate) templates_by_offset: HashMap<u32, usize>,
}

impl Provider {
    /// Exact-match lookup of a template by its offset inside the CRIM blob.
    pub fn get_template_by_offset(&self, offset: u32) -> Option<&Template> {
        self.templates_by_offset
            .get(&offset)
            .and_then(|&idx| self.templates.get(idx))
    }

    /// The template referenced by `event`, if it belongs to this provider.
    pub fn template_for_event(&self, event: &Event) -> Option<&Template> {
        event
            .template_offset
            .and_then(|offset| self.get_template_by_offset(offset))
    }
}

/// An entry of the `WEVT` descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ElementDescriptor {
    /// Offset of the element (`EVNT`, `TTBL`, `CHAN`, ...), relative to the start of the CRIM blob.
    pub element_offset: u32,
    pub unknown: u32,
    #[serde(serialize_with = "serialize_signature")]
    pub signature: [u8; 4],
}

fn serialize_signature<S: serde::Serializer>(sig: &[u8; 4], s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&String::from_utf8_lossy(sig))
}

/// A 48-byte `EVNT` event definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub identifier: u16,
    pub version: u8,
    pub channel: u8,
    pub level: u8,
    pub opcode: u8,
    pub task: u16,
    pub keywords: u64,
    pub message_identifier: u32,
    pub template_offset: Option<u32>,
    pub opcode_offset: Option<u32>,
    pub level_offset: Option<u32>,
    pub task_offset: Option<u32>,
    pub unknown_count: u32,
    pub unknown_offset: u32,
    pub flags: u32,
}

/// A `TEMP` template definition.
#[derive(Debug, Clone, Serialize)]
pub struct Template {
    /// Offset of the `TEMP` block inside the CRIM blob; the join key for [`Event::template_offset`].
    pub offset: u32,
    pub size: u32,
    pub item_descriptor_count: u32,
    pub item_name_count: u32,
    /// Offset of the item descriptor table, relative to the start of the CRIM blob.
    pub template_items_offset: u32,
    pub event_type: u32,
    pub guid: Guid,
    pub items: Vec<TemplateItem>,
    #[serde(skip)]
    pub fragment: BinXmlFragment,
    /// The raw `TEMP` bytes (header included).
    #[serde(skip)]
    pub(crate) raw: Arc<[u8]>,
    #[serde(skip)]
    pub(crate) binxml_len: usize,
}

impl Template {
    /// Render with `{sub:N}` placeholders.
    pub fn to_xml(&self) -> String {
        self.fragment.to_xml()
    }

    /// Render with `{sub:N:Name}` placeholders, using item names where present.
    pub fn to_xml_with_item_names(&self) -> String {
        let names: Vec<Option<String>> = self.items.iter().map(|i| i.name.clone()).collect();
        self.fragment.to_xml_with_names(&names)
    }

    /// Render with substitution values; see [`BinXmlFragment::render_with_values`].
    pub fn render_with_values(&self, values: &[SubstitutionValue]) -> crate::binxml::Result<String> {
        self.fragment.render_with_values(values)
    }

    /// The raw `TEMP` bytes.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The BinXML fragment bytes (between the 40-byte header and the item descriptors).
    pub fn binxml(&self) -> &[u8] {
        &self.raw[super::parse::TEMP_HEADER_SIZE..super::parse::TEMP_HEADER_SIZE + self.binxml_len]
    }
}

/// A 20-byte template item descriptor. Item index == substitution slot index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateItem {
    pub unknown1: u32,
    pub input_data_type: u8,
    pub output_data_type: u8,
    pub unknown3: u16,
    pub unknown4: u32,
    /// `0` for scalars, otherwise the fixed array arity.
    pub number_of_values: u16,
    /// Byte width for fixed-size types, `0` when variable.
    pub value_data_size: u16,
    /// Offset of the item name, relative to the start of the CRIM blob (`0` = unnamed).
    pub name_offset: u32,
    pub name: Option<String>,
}

/// Identity of an event definition: provider, event id and version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EventKey {
    pub provider_guid: Guid,
    pub event_id: u16,
    pub version: u8,
}

/// Joins of one manifest: event keys to template GUIDs, and template GUIDs to templates.
///
/// When a key or GUID repeats, the later definition (in provider, then on-disk order) wins.
#[derive(Debug, Default)]
pub struct ManifestIndex<'a> {
    pub event_templates: HashMap<EventKey, Guid>,
    pub templates: HashMap<Guid, &'a Template>,
}
