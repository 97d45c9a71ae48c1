use anyhow::{Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use indoc::indoc;
use log::LevelFilter;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use std::process::exit;

mod build_cache;
mod manifest;
mod render;

fn cli() -> Command {
    Command::new("wevt_dump")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Omer B. <omerbenamram@gmail.com>")
        .about("Inspect WEVT_TEMPLATE manifests and build offline template caches")
        .long_about(indoc!(r#"
            Inspect WEVT_TEMPLATE manifests and build offline template caches.

            Provider binaries (EXE/DLL/SYS) embed their event definitions as a CRIM
            blob inside a `WEVT_TEMPLATE` resource. This tool decodes those blobs,
            writes `.wevtcache` files, and renders cached templates to XML.
        "#))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .global(true)
                .help(indoc!("
                    -v - info, -vv - debug, -vvv - trace.
                    trace output is only available in debug builds, as it is extremely verbose")),
        )
        .subcommand(manifest::command())
        .subcommand(build_cache::command())
        .subcommand(render::command())
}

fn init_logging(matches: &ArgMatches) {
    let level = match matches.get_count("verbose") {
        0 => return,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        3 => LevelFilter::Trace,
        _ => {
            eprintln!("using more than -vvv does not affect verbosity level");
            LevelFilter::Trace
        }
    };

    if let Err(e) = TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    ) {
        eprintln!("Failed to initialize logging: {e}");
    }
}

fn run(matches: &ArgMatches) -> Result<()> {
    init_logging(matches);

    match matches.subcommand() {
        Some(("manifest", sub)) => manifest::run(sub),
        Some(("build-cache", sub)) => build_cache::run(sub),
        Some(("render", sub)) => render::run(sub),
        Some((other, _)) => bail!("unknown subcommand `{other}`"),
        None => bail!("a subcommand is required"),
    }
}

fn main() {
    let matches = cli().get_matches();

    if let Err(e) = run(&matches) {
        eprintln!("{e:?}");
        exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        cli().debug_assert();
    }
}
