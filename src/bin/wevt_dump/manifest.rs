use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use indoc::indoc;
use serde::Serialize;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use wevt_templates::manifest::{Event, Template};
use wevt_templates::{Guid, Manifest, extract_wevt_template_resources};

pub fn command() -> Command {
    Command::new("manifest")
        .about("Dump the providers, events and templates of PE files or raw CRIM blobs as JSONL")
        .long_about(indoc!(r#"
            Dump the providers, events and templates of PE files or raw CRIM blobs as JSONL.

            Every output line has a `kind` of `provider`, `event` or `template`. Inputs
            starting with the `CRIM` signature are decoded directly, anything else is
            treated as a PE image and searched for `WEVT_TEMPLATE` resources.
        "#))
        .arg(
            Arg::new("input")
                .required(true)
                .action(ArgAction::Append)
                .value_name("PATH")
                .help("PE file or raw CRIM blob. Can be passed multiple times."),
        )
        .arg(
            Arg::new("xml")
                .long("xml")
                .action(ArgAction::SetTrue)
                .help("Include each template's XML (with `{sub:N}` placeholders)."),
        )
        .arg(
            Arg::new("item-names")
                .long("item-names")
                .action(ArgAction::SetTrue)
                .help("Use `{sub:N:Name}` placeholders in `--xml` output where item names are known."),
        )
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum OutputLine<'a> {
    Provider {
        source: &'a str,
        resource_index: usize,
        guid: Guid,
        message_identifier: Option<u32>,
        event_count: usize,
        template_count: usize,
    },
    Event {
        source: &'a str,
        provider_guid: Guid,
        #[serde(flatten)]
        event: &'a Event,
        template_guid: Option<Guid>,
    },
    Template {
        source: &'a str,
        provider_guid: Guid,
        #[serde(flatten)]
        template: &'a Template,
        #[serde(skip_serializing_if = "Option::is_none")]
        xml: Option<String>,
    },
}

pub fn run(matches: &ArgMatches) -> Result<()> {
    let with_xml = matches.get_flag("xml");
    let item_names = matches.get_flag("item-names");

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    for input in matches.get_many::<String>("input").into_iter().flatten() {
        let path = PathBuf::from(input);
        let bytes =
            fs::read(&path).with_context(|| format!("failed to read `{}`", path.display()))?;

        let blobs = if bytes.starts_with(b"CRIM") {
            vec![bytes]
        } else {
            extract_wevt_template_resources(&bytes)
                .with_context(|| format!("failed to extract WEVT_TEMPLATE from `{}`", path.display()))?
                .into_iter()
                .map(|r| r.data)
                .collect()
        };

        if blobs.is_empty() {
            log::warn!("`{}` has no WEVT_TEMPLATE resources", path.display());
        }

        for (resource_index, blob) in blobs.iter().enumerate() {
            let manifest = Manifest::parse(blob).with_context(|| {
                format!(
                    "failed to parse manifest {resource_index} of `{}`",
                    path.display()
                )
            })?;
            write_manifest(&mut out, input, resource_index, &manifest, with_xml, item_names)?;
        }
    }

    out.flush()?;
    Ok(())
}

fn write_manifest(
    out: &mut impl Write,
    source: &str,
    resource_index: usize,
    manifest: &Manifest,
    with_xml: bool,
    item_names: bool,
) -> Result<()> {
    let mut write_line = |line: &OutputLine<'_>| -> Result<()> {
        serde_json::to_writer(&mut *out, line)?;
        writeln!(out)?;
        Ok(())
    };

    for provider in &manifest.providers {
        write_line(&OutputLine::Provider {
            source,
            resource_index,
            guid: provider.guid,
            message_identifier: provider.message_identifier,
            event_count: provider.events.len(),
            template_count: provider.templates.len(),
        })?;

        for event in &provider.events {
            write_line(&OutputLine::Event {
                source,
                provider_guid: provider.guid,
                event,
                template_guid: provider.template_for_event(event).map(|t| t.guid),
            })?;
        }

        for template in &provider.templates {
            let xml = match (with_xml, item_names) {
                (false, _) => None,
                (true, false) => Some(template.to_xml()),
                (true, true) => Some(template.to_xml_with_item_names()),
            };
            write_line(&OutputLine::Template {
                source,
                provider_guid: provider.guid,
                template,
                xml,
            })?;
        }
    }

    Ok(())
}
