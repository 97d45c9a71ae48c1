use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgGroup, ArgMatches, Command, value_parser};
use indoc::indoc;

use wevt_templates::{Guid, SubstitutionValue, WevtCache};

pub fn command() -> Command {
    Command::new("render")
        .about("Render a cached template to XML")
        .long_about(indoc!(r#"
            Render a cached template to XML.

            The template is selected either directly with `--template`, or through the
            `(--provider, --event-id, --version)` mapping stored in the cache. Each
            `--value` fills the next substitution slot. Without any values, templates
            are printed with `{sub:N}` placeholders.
        "#))
        .arg(
            Arg::new("cache")
                .long("cache")
                .short('c')
                .required(true)
                .value_name("FILE")
                .help("`.wevtcache` file to load."),
        )
        .arg(
            Arg::new("template")
                .long("template")
                .value_name("GUID")
                .help("Template GUID to render."),
        )
        .arg(
            Arg::new("provider")
                .long("provider")
                .value_name("GUID")
                .requires("event-id")
                .help("Provider GUID of the event to render."),
        )
        .arg(
            Arg::new("event-id")
                .long("event-id")
                .value_name("ID")
                .value_parser(value_parser!(u16))
                .requires("provider")
                .help("Event identifier."),
        )
        .arg(
            Arg::new("version")
                .long("version")
                .value_name("N")
                .value_parser(value_parser!(u8))
                .default_value("0")
                .help("Event version."),
        )
        .group(
            ArgGroup::new("target")
                .args(["template", "provider"])
                .required(true),
        )
        .arg(
            Arg::new("value")
                .long("value")
                .action(ArgAction::Append)
                .value_name("VALUE")
                .help("Substitution value, in slot order. Can be passed multiple times."),
        )
}

fn parse_guid(matches: &ArgMatches, id: &str) -> Result<Option<Guid>> {
    matches
        .get_one::<String>(id)
        .map(|s| {
            s.parse::<Guid>()
                .with_context(|| format!("invalid GUID for --{id}: `{s}`"))
        })
        .transpose()
}

pub fn run(matches: &ArgMatches) -> Result<()> {
    let path = matches
        .get_one::<String>("cache")
        .context("--cache is required")?;
    let cache = WevtCache::load(path).with_context(|| format!("failed to load `{path}`"))?;

    let template_guid = match (
        parse_guid(matches, "template")?,
        parse_guid(matches, "provider")?,
    ) {
        (Some(template), _) => template,
        (None, Some(provider)) => {
            let event_id = *matches
                .get_one::<u16>("event-id")
                .context("--event-id is required with --provider")?;
            let version = matches.get_one::<u8>("version").copied().unwrap_or(0);
            cache.resolve_template_guid(&provider, event_id, version)?
        }
        (None, None) => bail!("either --template or --provider is required"),
    };
    log::debug!("rendering template {template_guid}");

    let values: Vec<SubstitutionValue> = matches
        .get_many::<String>("value")
        .into_iter()
        .flatten()
        .map(|v| SubstitutionValue::String(v.clone()))
        .collect();

    let xml = if values.is_empty() {
        cache.template_xml(&template_guid)?
    } else {
        cache.render_template_xml(&template_guid, &values)?
    };
    println!("{xml}");

    Ok(())
}
