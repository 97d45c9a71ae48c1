#![allow(dead_code)]
use std::sync::Once;

use wevt_templates::binxml::encode_inline_name;

static LOGGER_INIT: Once = Once::new();

// Rust runs the tests concurrently, so unless we synchronize logging access
// it will crash when attempting to run `cargo test` with some logging facilities.
pub fn ensure_env_logger_initialized() {
    use std::io::Write;

    LOGGER_INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format(|buf, record| writeln!(buf, "[{}] - {}", record.level(), record.args()))
            .is_test(true)
            .init();
    });
}

pub const PROVIDER_GUID: [u8; 16] = [0x22; 16];
pub const TEMPLATE_GUID: [u8; 16] = [0x11; 16];
pub const PROVIDER_GUID_STR: &str = "22222222-2222-2222-2222-222222222222";
pub const TEMPLATE_GUID_STR: &str = "11111111-1111-1111-1111-111111111111";

/// Writer for inline-name BinXML fragments, as stored in `TEMP` blocks.
pub struct BinXmlBuilder {
    buf: Vec<u8>,
}

impl BinXmlBuilder {
    /// Starts with the fragment header (`0x0f 0x01 0x01 0x00`).
    pub fn new() -> Self {
        BinXmlBuilder {
            buf: vec![0x0f, 0x01, 0x01, 0x00],
        }
    }

    fn open_token(mut self, token: u8, name: &str) -> Self {
        self.buf.push(token);
        self.buf.extend_from_slice(&0xffffu16.to_le_bytes());
        self.buf.extend_from_slice(&0u32.to_le_bytes());
        self.buf.extend(encode_inline_name(name));
        self
    }

    /// `<name` without attributes.
    pub fn open(self, name: &str) -> Self {
        self.open_token(0x01, name)
    }

    /// `<name` followed by attributes.
    pub fn open_with_attributes(self, name: &str) -> Self {
        let mut this = self.open_token(0x41, name);
        this.buf.extend_from_slice(&0u32.to_le_bytes());
        this
    }

    pub fn attribute(mut self, name: &str) -> Self {
        self.buf.push(0x06);
        self.buf.extend(encode_inline_name(name));
        self
    }

    pub fn close_start(mut self) -> Self {
        self.buf.push(0x02);
        self
    }

    pub fn close_empty(mut self) -> Self {
        self.buf.push(0x03);
        self
    }

    pub fn end(mut self) -> Self {
        self.buf.push(0x04);
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        let units: Vec<u16> = text.encode_utf16().collect();
        self.buf.extend_from_slice(&[0x05, 0x01]);
        self.buf
            .extend_from_slice(&(units.len() as u16).to_le_bytes());
        for unit in units {
            self.buf.extend_from_slice(&unit.to_le_bytes());
        }
        self
    }

    pub fn substitution(mut self, index: u16, value_type: u8) -> Self {
        self.buf.push(0x0d);
        self.buf.extend_from_slice(&index.to_le_bytes());
        self.buf.push(value_type);
        self
    }

    pub fn optional_substitution(mut self, index: u16, value_type: u8) -> Self {
        self.buf.push(0x0e);
        self.buf.extend_from_slice(&index.to_le_bytes());
        self.buf.push(value_type);
        self
    }

    pub fn char_ref(mut self, value: u16) -> Self {
        self.buf.push(0x08);
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn entity_ref(mut self, name: &str) -> Self {
        self.buf.push(0x09);
        self.buf.extend(encode_inline_name(name));
        self
    }

    /// Appends `EndOfStream`.
    pub fn finish(mut self) -> Vec<u8> {
        self.buf.push(0x00);
        self.buf
    }

    /// The bytes so far, without `EndOfStream`.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// `<EventData><Data>{sub:0}</Data></EventData>`
pub fn event_data_binxml() -> Vec<u8> {
    BinXmlBuilder::new()
        .open("EventData")
        .close_start()
        .open("Data")
        .close_start()
        .substitution(0, 0x01)
        .end()
        .end()
        .finish()
}

#[derive(Debug, Clone)]
pub struct ItemSpec {
    pub input_type: u8,
    pub output_type: u8,
    pub count: u16,
    pub length: u16,
    pub name: Option<String>,
}

impl ItemSpec {
    pub fn named(name: &str) -> Self {
        ItemSpec {
            input_type: 1,
            output_type: 1,
            count: 1,
            length: 0,
            name: Some(name.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TemplateSpec {
    pub guid: [u8; 16],
    pub binxml: Vec<u8>,
    pub items: Vec<ItemSpec>,
}

#[derive(Debug, Clone)]
pub struct EventSpec {
    pub id: u16,
    pub version: u8,
    /// Index into the provider's templates; `None` writes a zero template offset.
    pub template: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ProviderSpec {
    pub guid: [u8; 16],
    pub events: Vec<EventSpec>,
    pub templates: Vec<TemplateSpec>,
    /// Adds a `CHAN` element the decoder has to skip.
    pub with_channels: bool,
}

impl ProviderSpec {
    pub fn new(guid: [u8; 16]) -> Self {
        ProviderSpec {
            guid,
            events: Vec::new(),
            templates: Vec::new(),
            with_channels: false,
        }
    }

    pub fn template(mut self, template: TemplateSpec) -> Self {
        self.templates.push(template);
        self
    }

    pub fn event(mut self, id: u16, version: u8, template: Option<usize>) -> Self {
        self.events.push(EventSpec {
            id,
            version,
            template,
        });
        self
    }
}

/// One provider, no events, one template `<EventData><Data>{sub:0}</Data></EventData>` with a
/// single item named `Foo`.
pub fn single_template_provider() -> ProviderSpec {
    ProviderSpec::new(PROVIDER_GUID).template(TemplateSpec {
        guid: TEMPLATE_GUID,
        binxml: event_data_binxml(),
        items: vec![ItemSpec::named("Foo")],
    })
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn sized_utf16(name: &str) -> Vec<u8> {
    let units: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
    let mut out = Vec::new();
    put_u32(&mut out, (4 + units.len() * 2) as u32);
    for unit in units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

fn temp_size(template: &TemplateSpec) -> usize {
    40 + template.binxml.len()
        + template.items.len() * 20
        + template
            .items
            .iter()
            .filter_map(|i| i.name.as_deref())
            .map(|n| sized_utf16(n).len())
            .sum::<usize>()
}

fn build_temp(template: &TemplateSpec, temp_off: usize) -> Vec<u8> {
    let size = temp_size(template);
    let items_off = temp_off + 40 + template.binxml.len();
    let names_off = items_off + template.items.len() * 20;
    let named = template.items.iter().filter(|i| i.name.is_some()).count();

    let mut buf = Vec::with_capacity(size);
    buf.extend_from_slice(b"TEMP");
    put_u32(&mut buf, size as u32);
    put_u32(&mut buf, template.items.len() as u32);
    put_u32(&mut buf, named as u32);
    let items_field = if template.items.is_empty() {
        (temp_off + size) as u32
    } else {
        items_off as u32
    };
    put_u32(&mut buf, items_field);
    put_u32(&mut buf, 1); // event type
    buf.extend_from_slice(&template.guid);
    buf.extend_from_slice(&template.binxml);

    let mut names = Vec::new();
    for item in &template.items {
        put_u32(&mut buf, 0);
        buf.push(item.input_type);
        buf.push(item.output_type);
        put_u16(&mut buf, 0);
        put_u32(&mut buf, 0);
        put_u16(&mut buf, item.count);
        put_u16(&mut buf, item.length);
        match &item.name {
            Some(name) => {
                put_u32(&mut buf, (names_off + names.len()) as u32);
                names.extend(sized_utf16(name));
            }
            None => put_u32(&mut buf, 0),
        }
    }
    buf.extend(names);

    assert_eq!(buf.len(), size);
    buf
}

fn build_provider(provider: &ProviderSpec, wevt_off: usize) -> Vec<u8> {
    let descriptor_count = if provider.with_channels { 3 } else { 2 };
    let evnt_off = wevt_off + 20 + descriptor_count * 8;
    let evnt_size = 16 + provider.events.len() * 48;
    let ttbl_off = evnt_off + evnt_size;

    let mut temp_offsets = Vec::new();
    let mut cur = ttbl_off + 12;
    for template in &provider.templates {
        temp_offsets.push(cur);
        cur += temp_size(template);
    }
    let ttbl_size = cur - ttbl_off;
    let chan_off = cur;

    let mut buf = Vec::new();
    buf.extend_from_slice(b"WEVT");
    put_u32(&mut buf, 0); // patched below
    put_u32(&mut buf, 0xffff_ffff);
    put_u32(&mut buf, descriptor_count as u32);
    put_u32(&mut buf, 0);
    put_u32(&mut buf, evnt_off as u32);
    put_u32(&mut buf, 0);
    put_u32(&mut buf, ttbl_off as u32);
    put_u32(&mut buf, 0);
    if provider.with_channels {
        put_u32(&mut buf, chan_off as u32);
        put_u32(&mut buf, 0);
    }

    buf.extend_from_slice(b"EVNT");
    put_u32(&mut buf, evnt_size as u32);
    put_u32(&mut buf, provider.events.len() as u32);
    put_u32(&mut buf, 0);
    for event in &provider.events {
        put_u16(&mut buf, event.id);
        buf.push(event.version);
        buf.push(0x10); // channel
        buf.push(4); // level
        buf.push(0); // opcode
        put_u16(&mut buf, 0); // task
        buf.extend_from_slice(&0x8000_0000_0000_0000u64.to_le_bytes());
        put_u32(&mut buf, 0xb000_0000 | u32::from(event.id));
        let template_off = event.template.map(|idx| temp_offsets[idx]).unwrap_or(0);
        put_u32(&mut buf, template_off as u32);
        for _ in 0..6 {
            put_u32(&mut buf, 0);
        }
    }

    buf.extend_from_slice(b"TTBL");
    put_u32(&mut buf, ttbl_size as u32);
    put_u32(&mut buf, provider.templates.len() as u32);
    for (template, off) in provider.templates.iter().zip(&temp_offsets) {
        buf.extend(build_temp(template, *off));
    }

    if provider.with_channels {
        buf.extend_from_slice(b"CHAN");
        put_u32(&mut buf, 12);
        put_u32(&mut buf, 0);
    }

    let size = buf.len() as u32;
    buf[4..8].copy_from_slice(&size.to_le_bytes());
    buf
}

/// Build a CRIM blob; every offset is relative to the blob start.
pub fn build_crim(providers: &[ProviderSpec]) -> Vec<u8> {
    let mut blocks = Vec::new();
    let mut cur = 16 + providers.len() * 20;
    for provider in providers {
        let block = build_provider(provider, cur);
        cur += block.len();
        blocks.push(block);
    }

    let mut buf = Vec::with_capacity(cur);
    buf.extend_from_slice(b"CRIM");
    put_u32(&mut buf, cur as u32);
    put_u16(&mut buf, 3);
    put_u16(&mut buf, 1);
    put_u32(&mut buf, providers.len() as u32);

    let mut wevt_off = 16 + providers.len() * 20;
    for (provider, block) in providers.iter().zip(&blocks) {
        buf.extend_from_slice(&provider.guid);
        put_u32(&mut buf, wevt_off as u32);
        wevt_off += block.len();
    }
    for block in blocks {
        buf.extend(block);
    }

    assert_eq!(buf.len(), cur);
    buf
}

/// Offset of the first `TEMP` block of the first provider in a [`build_crim`] blob.
pub fn first_temp_offset(providers: &[ProviderSpec]) -> usize {
    let provider = &providers[0];
    let descriptor_count = if provider.with_channels { 3 } else { 2 };
    16 + providers.len() * 20 + 20 + descriptor_count * 8 + 16 + provider.events.len() * 48 + 12
}

const FILE_ALIGNMENT: usize = 0x200;
const RSRC_RVA: usize = 0x1000;

fn align(v: usize, to: usize) -> usize {
    v.div_ceil(to) * to
}

/// A `.rsrc` section with `WEVT_TEMPLATE/1/<lang>` entries, one per blob.
fn build_rsrc(blobs: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let root_off = 0;
    let type_dir_off = 16 + 8;
    let lang_dir_off = type_dir_off + 16 + 8;
    let data_entries_off = lang_dir_off + 16 + 8 * blobs.len();
    let name_off = data_entries_off + 16 * blobs.len();
    let name = "WEVT_TEMPLATE";
    let name_len = 2 + name.len() * 2;
    let mut data_off = align(name_off + name_len, 8);

    let mut buf = Vec::new();
    let dir_header = |buf: &mut Vec<u8>, named: u16, ids: u16| {
        buf.extend_from_slice(&[0u8; 12]);
        put_u16(buf, named);
        put_u16(buf, ids);
    };

    assert_eq!(buf.len(), root_off);
    dir_header(&mut buf, 1, 0);
    put_u32(&mut buf, 0x8000_0000 | name_off as u32);
    put_u32(&mut buf, 0x8000_0000 | type_dir_off as u32);

    dir_header(&mut buf, 0, 1);
    put_u32(&mut buf, 1);
    put_u32(&mut buf, 0x8000_0000 | lang_dir_off as u32);

    dir_header(&mut buf, 0, blobs.len() as u16);
    for (idx, (lang, _)) in blobs.iter().enumerate() {
        put_u32(&mut buf, *lang);
        put_u32(&mut buf, (data_entries_off + idx * 16) as u32);
    }

    let mut data_offsets = Vec::new();
    for (_, blob) in blobs {
        put_u32(&mut buf, (RSRC_RVA + data_off) as u32);
        put_u32(&mut buf, blob.len() as u32);
        put_u32(&mut buf, 0);
        put_u32(&mut buf, 0);
        data_offsets.push(data_off);
        data_off = align(data_off + blob.len(), 8);
    }

    put_u16(&mut buf, name.len() as u16);
    for unit in name.encode_utf16() {
        put_u16(&mut buf, unit);
    }

    for ((_, blob), off) in blobs.iter().zip(data_offsets) {
        buf.resize(off, 0);
        buf.extend_from_slice(blob);
    }
    buf
}

/// A minimal PE32+ image with one `.rsrc` section; `None` leaves the resource directory empty.
fn build_pe_image(rsrc: Option<Vec<u8>>) -> Vec<u8> {
    let rsrc = rsrc.unwrap_or_default();
    let raw_size = align(rsrc.len().max(1), FILE_ALIGNMENT);

    let mut buf = vec![0u8; 0x80];
    buf[0..2].copy_from_slice(b"MZ");
    buf[0x3c..0x40].copy_from_slice(&0x80u32.to_le_bytes());

    buf.extend_from_slice(b"PE\0\0");
    // COFF header
    put_u16(&mut buf, 0x8664);
    put_u16(&mut buf, 1);
    put_u32(&mut buf, 0);
    put_u32(&mut buf, 0);
    put_u32(&mut buf, 0);
    put_u16(&mut buf, 240);
    put_u16(&mut buf, 0x2022);

    // Optional header, standard fields
    put_u16(&mut buf, 0x20b);
    buf.push(14);
    buf.push(0);
    put_u32(&mut buf, 0);
    put_u32(&mut buf, raw_size as u32);
    put_u32(&mut buf, 0);
    put_u32(&mut buf, 0);
    put_u32(&mut buf, 0);
    // Windows fields
    buf.extend_from_slice(&0x1_8000_0000u64.to_le_bytes());
    put_u32(&mut buf, 0x1000);
    put_u32(&mut buf, FILE_ALIGNMENT as u32);
    put_u16(&mut buf, 6);
    put_u16(&mut buf, 0);
    put_u16(&mut buf, 0);
    put_u16(&mut buf, 0);
    put_u16(&mut buf, 6);
    put_u16(&mut buf, 0);
    put_u32(&mut buf, 0);
    put_u32(&mut buf, (RSRC_RVA + align(raw_size, 0x1000)) as u32);
    put_u32(&mut buf, FILE_ALIGNMENT as u32);
    put_u32(&mut buf, 0);
    put_u16(&mut buf, 2);
    put_u16(&mut buf, 0x0160);
    for v in [0x10_0000u64, 0x1000, 0x10_0000, 0x1000] {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    put_u32(&mut buf, 0);
    put_u32(&mut buf, 16);
    // Data directories; index 2 is the resource table.
    for idx in 0..16 {
        if idx == 2 && !rsrc.is_empty() {
            put_u32(&mut buf, RSRC_RVA as u32);
            put_u32(&mut buf, rsrc.len() as u32);
        } else {
            put_u32(&mut buf, 0);
            put_u32(&mut buf, 0);
        }
    }

    // Section table
    buf.extend_from_slice(b".rsrc\0\0\0");
    put_u32(&mut buf, rsrc.len().max(1) as u32);
    put_u32(&mut buf, RSRC_RVA as u32);
    put_u32(&mut buf, raw_size as u32);
    put_u32(&mut buf, FILE_ALIGNMENT as u32);
    put_u32(&mut buf, 0);
    put_u32(&mut buf, 0);
    put_u16(&mut buf, 0);
    put_u16(&mut buf, 0);
    put_u32(&mut buf, 0x4000_0040);

    buf.resize(FILE_ALIGNMENT, 0);
    buf.extend_from_slice(&rsrc);
    buf.resize(FILE_ALIGNMENT + raw_size, 0);
    buf
}

/// A PE image whose `WEVT_TEMPLATE/1/1033` resource is `crim`.
pub fn build_pe_with_crim(crim: &[u8]) -> Vec<u8> {
    build_pe_with_resources(&[(1033, crim.to_vec())])
}

pub fn build_pe_with_resources(blobs: &[(u32, Vec<u8>)]) -> Vec<u8> {
    build_pe_image(Some(build_rsrc(blobs)))
}

/// A valid PE image without any resources.
pub fn build_pe_without_resources() -> Vec<u8> {
    build_pe_image(None)
}
