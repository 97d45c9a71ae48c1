use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use dialoguer::Confirm;
use indoc::indoc;
use serde::Serialize;
use std::path::{Path, PathBuf};

use wevt_templates::WevtCache;

pub fn command() -> Command {
    Command::new("build-cache")
        .about("Build a `.wevtcache` file from provider binaries")
        .long_about(indoc!(r#"
            Build a `.wevtcache` file from provider binaries.

            Inputs may be files or directories. Directories are scanned for files with one
            of `--extensions`, optionally recursively. Every input must carry a valid
            `WEVT_TEMPLATE` resource, the first failing input aborts the build and nothing
            is written.
        "#))
        .arg(
            Arg::new("input")
                .long("input")
                .short('i')
                .action(ArgAction::Append)
                .value_name("PATH")
                .help("Input PE file or directory. Can be passed multiple times."),
        )
        .arg(
            Arg::new("glob")
                .long("glob")
                .action(ArgAction::Append)
                .value_name("PATTERN")
                .help("Glob pattern for input files. Can be passed multiple times."),
        )
        .arg(
            Arg::new("recursive")
                .long("recursive")
                .short('r')
                .action(ArgAction::SetTrue)
                .help("Recurse into subdirectories of directory inputs."),
        )
        .arg(
            Arg::new("extensions")
                .long("extensions")
                .value_name("EXT,...")
                .default_value("exe,dll,sys")
                .help("Comma-separated file extensions to pick up from directories."),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .required(true)
                .value_name("FILE")
                .help("Path of the `.wevtcache` file to write."),
        )
        .arg(
            Arg::new("overwrite")
                .long("overwrite")
                .action(ArgAction::SetTrue)
                .help("Overwrite the output file without prompting."),
        )
}

#[derive(Debug, Serialize)]
struct Summary<'a> {
    output: &'a Path,
    entries: u32,
    events: usize,
    templates: usize,
}

pub fn run(matches: &ArgMatches) -> Result<()> {
    let output = PathBuf::from(
        matches
            .get_one::<String>("output")
            .context("--output is required")?,
    );
    let recursive = matches.get_flag("recursive");
    let extensions: Vec<String> = matches
        .get_one::<String>("extensions")
        .map(|s| {
            s.split(',')
                .map(|e| e.trim().trim_start_matches('.').to_string())
                .filter(|e| !e.is_empty())
                .collect()
        })
        .unwrap_or_default();
    let extensions: Vec<&str> = extensions.iter().map(String::as_str).collect();

    let mut inputs: Vec<PathBuf> = matches
        .get_many::<String>("input")
        .into_iter()
        .flatten()
        .map(PathBuf::from)
        .collect();

    for pattern in matches.get_many::<String>("glob").into_iter().flatten() {
        let entries = glob::glob(pattern).with_context(|| format!("invalid glob `{pattern}`"))?;
        for entry in entries {
            let path = entry.with_context(|| format!("failed to expand glob `{pattern}`"))?;
            if path.is_file() {
                inputs.push(path);
            }
        }
    }

    if inputs.is_empty() {
        bail!("no inputs given, pass `--input` or `--glob`");
    }

    let overwrite = confirm_overwrite(&output, matches.get_flag("overwrite"))?;

    let cache = WevtCache::new();
    for input in &inputs {
        let added = if input.is_dir() {
            cache
                .add_dir(input, recursive, &extensions)
                .with_context(|| format!("failed to add directory `{}`", input.display()))?
        } else {
            cache
                .add_dll(input)
                .with_context(|| format!("failed to add `{}`", input.display()))?
        };
        log::info!("`{}`: {added} template(s)", input.display());
    }

    let entries = cache
        .dump(&output, overwrite)
        .with_context(|| format!("failed to write `{}`", output.display()))?;

    let summary = Summary {
        output: &output,
        entries,
        events: cache.event_count(),
        templates: cache.template_count(),
    };
    println!("{}", serde_json::to_string(&summary)?);

    Ok(())
}

/// Whether an existing output may be replaced. Prompts when stdin is interactive.
fn confirm_overwrite(output: &Path, overwrite: bool) -> Result<bool> {
    if overwrite || !output.exists() {
        return Ok(overwrite);
    }

    let confirmed = Confirm::new()
        .with_prompt(format!(
            "Are you sure you want to override output file `{}`?",
            output.display()
        ))
        .default(false)
        .interact()
        .with_context(|| {
            format!(
                "output file `{}` exists, pass `--overwrite` to replace it",
                output.display()
            )
        })?;

    if !confirmed {
        bail!("refusing to overwrite `{}`", output.display());
    }
    Ok(true)
}
