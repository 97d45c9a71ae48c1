mod fixtures;

use fixtures::*;
use pretty_assertions::assert_eq;
use wevt_templates::binxml::{BinXmlError, Content, name_hash};
use wevt_templates::{
    ErrorKind, EventKey, Guid, Manifest, ManifestError, SubstitutionValue, WevtError,
    extract_wevt_template_resources,
};

#[test]
fn test_single_template_provider_scenario() {
    ensure_env_logger_initialized();
    let crim = build_crim(&[single_template_provider()]);

    let manifest = Manifest::parse(&crim).unwrap();
    assert_eq!(manifest.providers.len(), 1);

    let provider = &manifest.providers[0];
    assert_eq!(provider.guid.to_string(), PROVIDER_GUID_STR);
    assert!(provider.events.is_empty());
    assert_eq!(provider.templates.len(), 1);

    let template = &provider.templates[0];
    assert_eq!(template.guid.to_string(), TEMPLATE_GUID_STR);

    let xml = template.to_xml();
    assert!(xml.contains("EventData"), "{xml}");
    assert!(xml.contains("Data"), "{xml}");
    assert!(xml.contains("{sub:0}"), "{xml}");
    assert_eq!(xml, "<EventData><Data>{sub:0}</Data></EventData>");

    assert_eq!(template.items.len(), 1);
    let item = &template.items[0];
    assert_eq!(item.name.as_deref(), Some("Foo"));
    assert_eq!(item.input_data_type, 1);
    assert_eq!(item.output_data_type, 1);
    assert_eq!(item.number_of_values, 1);
    assert_eq!(item.value_data_size, 0);
}

#[test]
fn test_rendering_is_deterministic() {
    let crim = build_crim(&[single_template_provider()]);

    let first = Manifest::parse(&crim).unwrap().providers[0].templates[0].to_xml();
    for _ in 0..10 {
        let again = Manifest::parse(&crim).unwrap();
        assert_eq!(again.providers[0].templates[0].to_xml(), first);
    }
}

#[test]
fn test_event_joins_template_by_offset() {
    let provider = single_template_provider().event(4624, 2, Some(0)).event(4625, 0, None);
    let providers = [provider];
    let crim = build_crim(&providers);

    let manifest = Manifest::parse(&crim).unwrap();
    let provider = &manifest.providers[0];
    assert_eq!(provider.events.len(), 2);

    let linked = &provider.events[0];
    assert_eq!(linked.identifier, 4624);
    assert_eq!(linked.version, 2);
    assert_eq!(linked.template_offset, Some(first_temp_offset(&providers) as u32));
    let template = provider.template_for_event(linked).unwrap();
    assert_eq!(template.guid.to_string(), TEMPLATE_GUID_STR);

    let unlinked = &provider.events[1];
    assert_eq!(unlinked.template_offset, None);
    assert!(provider.template_for_event(unlinked).is_none());
    assert!(provider.get_template_by_offset(1).is_none());

    let index = manifest.build_index();
    let key = EventKey {
        provider_guid: provider.guid,
        event_id: 4624,
        version: 2,
    };
    assert_eq!(index.event_templates.len(), 1);
    assert_eq!(index.event_templates[&key], template.guid);
    assert_eq!(index.templates.len(), 1);
}

#[test]
fn test_unknown_elements_are_skipped() {
    let mut provider = single_template_provider();
    provider.with_channels = true;
    let crim = build_crim(&[provider]);

    let manifest = Manifest::parse(&crim).unwrap();
    let provider = &manifest.providers[0];
    let signatures: Vec<[u8; 4]> = provider
        .element_descriptors
        .iter()
        .map(|d| d.signature)
        .collect();
    assert_eq!(signatures, vec![*b"EVNT", *b"TTBL", *b"CHAN"]);
    assert_eq!(provider.templates.len(), 1);
}

#[test]
fn test_multiple_providers_and_templates() {
    let second = ProviderSpec::new([0x33; 16])
        .template(TemplateSpec {
            guid: [0x44; 16],
            binxml: BinXmlBuilder::new()
                .open("EventData")
                .close_start()
                .end()
                .finish(),
            items: vec![],
        })
        .template(TemplateSpec {
            guid: [0x55; 16],
            binxml: event_data_binxml(),
            items: vec![ItemSpec::named("Bar")],
        })
        .event(1, 0, Some(1));
    let crim = build_crim(&[single_template_provider(), second]);

    let manifest = Manifest::parse(&crim).unwrap();
    assert_eq!(manifest.providers.len(), 2);

    let second = &manifest.providers[1];
    assert_eq!(second.templates.len(), 2);
    assert_eq!(second.templates[0].to_xml(), "<EventData></EventData>");
    assert!(second.templates[0].items.is_empty());
    let linked = second.template_for_event(&second.events[0]).unwrap();
    assert_eq!(linked.guid, Guid::from_bytes([0x55; 16]));
    assert_eq!(
        linked.to_xml_with_item_names(),
        "<EventData><Data>{sub:0:Bar}</Data></EventData>"
    );
}

#[test]
fn test_attributes_and_references_render() {
    let binxml = BinXmlBuilder::new()
        .open_with_attributes("Data")
        .attribute("Name")
        .text("Target")
        .close_start()
        .substitution(0, 0x01)
        .char_ref(0x41)
        .entity_ref("amp")
        .optional_substitution(1, 0x08)
        .end()
        .finish();
    let provider = ProviderSpec::new(PROVIDER_GUID).template(TemplateSpec {
        guid: TEMPLATE_GUID,
        binxml,
        items: vec![ItemSpec::named("TargetUserName"), ItemSpec::named("Count")],
    });
    let crim = build_crim(&[provider]);

    let manifest = Manifest::parse(&crim).unwrap();
    let template = &manifest.providers[0].templates[0];

    insta::assert_snapshot!(
        template.to_xml(),
        @r#"<Data Name="Target">{sub:0}&#65;&amp;{sub:1}</Data>"#
    );

    let subs: Vec<(u16, bool)> = template
        .fragment
        .substitutions()
        .iter()
        .map(|s| (s.index, s.optional))
        .collect();
    assert_eq!(subs, vec![(0, false), (1, true)]);

    let rendered = template
        .render_with_values(&[SubstitutionValue::from("alice"), SubstitutionValue::UInt(3)])
        .unwrap();
    assert_eq!(rendered, r#"<Data Name="Target">alice&#65;&amp;3</Data>"#);

    let err = template
        .render_with_values(&[SubstitutionValue::from("alice")])
        .unwrap_err();
    assert_eq!(
        err,
        BinXmlError::MissingSubstitution {
            index: 1,
            provided: 1
        }
    );
    assert_eq!(WevtError::from(err).kind(), ErrorKind::InvalidInput);
}

#[test]
fn test_template_body_roundtrips_through_raw_bytes() {
    let providers = [single_template_provider()];
    let crim = build_crim(&providers);
    let manifest = Manifest::parse(&crim).unwrap();
    let template = &manifest.providers[0].templates[0];

    assert_eq!(template.binxml(), event_data_binxml().as_slice());

    let reparsed = wevt_templates::Template::parse(template.raw(), template.offset).unwrap();
    assert_eq!(reparsed.guid, template.guid);
    assert_eq!(reparsed.items, template.items);
    assert_eq!(reparsed.to_xml(), template.to_xml());
}

/// Locate the `Data` element name inside the CRIM blob.
fn data_name_offset(crim: &[u8]) -> usize {
    let needle: Vec<u8> = "Data".encode_utf16().flat_map(u16::to_le_bytes).collect();
    // The first match is inside `EventData`; the standalone name follows its own hash and length.
    crim.windows(needle.len())
        .enumerate()
        .filter(|(_, w)| *w == needle.as_slice())
        .map(|(idx, _)| idx)
        .find(|&idx| crim[idx - 2..idx] == 4u16.to_le_bytes())
        .unwrap()
}

#[test]
fn test_inline_name_hash_is_verified() {
    let crim = build_crim(&[single_template_provider()]);
    let units: Vec<u16> = "Data".encode_utf16().collect();

    let name_off = data_name_offset(&crim);
    let stored = u16::from_le_bytes([crim[name_off - 4], crim[name_off - 3]]);
    assert_eq!(stored, name_hash(&units));

    for unit in 0..units.len() {
        let mut corrupted = crim.clone();
        corrupted[name_off + unit * 2] ^= 0x01;

        let err = Manifest::parse(&corrupted).unwrap_err();
        assert!(
            matches!(
                err,
                ManifestError::TemplateBinXml {
                    source: BinXmlError::NameHashMismatch { .. },
                    ..
                }
            ),
            "unit {unit}: {err:?}"
        );
        assert_eq!(WevtError::from(err).kind(), ErrorKind::Format);
    }
}

#[test]
fn test_malformed_binxml_fails_the_whole_manifest() {
    let unbalanced = BinXmlBuilder::new()
        .open("EventData")
        .close_start()
        .finish();
    let unknown_token = {
        let mut bytes = BinXmlBuilder::new().open("EventData").close_start().into_bytes();
        bytes.push(0x0c);
        bytes.extend_from_slice(&[0x04, 0x00]);
        bytes
    };
    let missing_eof = BinXmlBuilder::new()
        .open("EventData")
        .close_start()
        .end()
        .into_bytes();

    for binxml in [unbalanced, unknown_token, missing_eof] {
        let provider = ProviderSpec::new(PROVIDER_GUID).template(TemplateSpec {
            guid: TEMPLATE_GUID,
            binxml,
            items: vec![],
        });
        let crim = build_crim(&[provider]);
        let err = Manifest::parse(&crim).unwrap_err();
        assert!(
            matches!(err, ManifestError::TemplateBinXml { .. }),
            "{err:?}"
        );
    }
}

#[test]
fn test_truncated_crim_fails() {
    let crim = build_crim(&[single_template_provider()]);
    for len in [0, 8, 15, 40, crim.len() - 1] {
        let mut truncated = crim[..len].to_vec();
        if truncated.len() >= 8 {
            // Keep the declared size consistent so the inner structures are what fails.
            let size = truncated.len() as u32;
            truncated[4..8].copy_from_slice(&size.to_le_bytes());
        }
        assert!(Manifest::parse(&truncated).is_err(), "len {len}");
    }
}

#[test]
fn test_item_name_count_cannot_exceed_descriptors() {
    let providers = [single_template_provider()];
    let mut crim = build_crim(&providers);
    let temp_off = first_temp_offset(&providers);
    crim[temp_off + 12..temp_off + 16].copy_from_slice(&2u32.to_le_bytes());

    let err = Manifest::parse(&crim).unwrap_err();
    assert!(matches!(err, ManifestError::CountOutOfBounds { .. }), "{err:?}");
}

#[test]
fn test_template_fragment_structure() {
    let crim = build_crim(&[single_template_provider()]);
    let manifest = Manifest::parse(&crim).unwrap();
    let fragment = &manifest.providers[0].templates[0].fragment;

    let root = fragment.root_element().unwrap();
    assert_eq!(root.name.as_str(), "EventData");
    assert_eq!(root.children.len(), 1);
    let Content::Element(data_id) = root.children[0] else {
        panic!("expected a child element, got {:?}", root.children[0]);
    };
    let data = fragment.element(data_id).unwrap();
    assert_eq!(data.name.as_str(), "Data");
    assert!(matches!(data.children[0], Content::Substitution(_)));
}

#[test]
fn test_extracts_crim_from_synthetic_pe() {
    let crim = build_crim(&[single_template_provider()]);
    let pe = build_pe_with_resources(&[(1033, crim.clone()), (1031, b"CRIM-second".to_vec())]);

    let resources = extract_wevt_template_resources(&pe).unwrap();
    assert_eq!(resources.len(), 2);
    assert_eq!(resources[0].resource, wevt_templates::ResourceIdentifier::Id(1));
    assert_eq!(resources[0].lang_id, 1033);
    assert_eq!(resources[0].data, crim);
    assert_eq!(resources[1].lang_id, 1031);
    assert_eq!(resources[1].data, b"CRIM-second".to_vec());

    assert!(
        extract_wevt_template_resources(&build_pe_without_resources())
            .unwrap()
            .is_empty()
    );
}

#[test]
fn test_declared_block_sizes_past_the_buffer_fail() {
    let providers = [single_template_provider()];
    let crim = build_crim(&providers);

    // CRIM header, one provider descriptor, then WEVT with two element descriptors.
    let wevt_off = 16 + 20;
    let evnt_off = wevt_off + 20 + 2 * 8;
    let ttbl_off = evnt_off + 16;
    let temp_off = first_temp_offset(&providers);
    assert_eq!(temp_off, ttbl_off + 12);

    for (what, size_off) in [
        ("WEVT.size", wevt_off + 4),
        ("EVNT.size", evnt_off + 4),
        ("TTBL.size", ttbl_off + 4),
        ("TEMP.size", temp_off + 4),
    ] {
        let mut corrupted = crim.clone();
        corrupted[size_off..size_off + 4].copy_from_slice(&0xffff_0000u32.to_le_bytes());

        let err = Manifest::parse(&corrupted).unwrap_err();
        assert!(
            matches!(err, ManifestError::SizeOutOfBounds { what: w, .. } if w == what),
            "{what}: {err:?}"
        );
        assert_eq!(WevtError::from(err).kind(), ErrorKind::Format);
    }
}

#[test]
fn test_provider_size_smaller_than_its_tables_fails() {
    let crim = build_crim(&[single_template_provider()]);
    let wevt_off = 16 + 20;

    for size in [8u32, 20] {
        let mut corrupted = crim.clone();
        corrupted[wevt_off + 4..wevt_off + 8].copy_from_slice(&size.to_le_bytes());
        let err = Manifest::parse(&corrupted).unwrap_err();
        assert!(
            matches!(err, ManifestError::SizeOutOfBounds { what: "WEVT.size", .. }),
            "size {size}: {err:?}"
        );
    }
}

#[test]
fn test_element_name_with_markup_characters_fails() {
    let provider = ProviderSpec::new(PROVIDER_GUID).template(TemplateSpec {
        guid: TEMPLATE_GUID,
        binxml: BinXmlBuilder::new()
            .open("a\"<b")
            .close_start()
            .end()
            .finish(),
        items: vec![],
    });
    let crim = build_crim(&[provider]);

    let err = Manifest::parse(&crim).unwrap_err();
    assert!(
        matches!(
            err,
            ManifestError::TemplateBinXml {
                source: BinXmlError::InvalidName { .. },
                ..
            }
        ),
        "{err:?}"
    );
}
