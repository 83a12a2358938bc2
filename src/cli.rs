use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

#[derive(Debug, PartialEq)]
pub enum Mode {
    Serve,
    Watch { url: String },
}

#[derive(Debug)]
pub struct Cli {
    pub config: Option<PathBuf>,
    pub mode: Mode,
}

impl From<ArgMatches> for Cli {
    fn from(matches: ArgMatches) -> Self {
        let mode = match matches.subcommand() {
            Some(("watch", sub)) => Mode::Watch {
                url: sub.get_one::<String>("url").cloned().unwrap_or_default(),
            },
            _ => Mode::Serve,
        };
        Cli {
            config: matches.get_one::<PathBuf>("config").cloned(),
            mode,
        }
    }
}

pub(crate) fn command() -> Command {
    Command::new("boinc-monitor")
        .version(env!("CARGO_PKG_VERSION"))
        .about("stream live BOINC task progress of your hosts to the browser")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("TOML configuration file, overridden by BOINC_MONITOR_* variables")
                .value_name("FILE")
                .global(true)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .subcommand(
            Command::new("serve")
                .about("poll the configured clients and serve /results (default)"),
        )
        .subcommand(
            Command::new("watch")
                .about("follow the /results stream of a running monitor in the terminal")
                .arg(
                    Arg::new("url")
                        .help("e.g. http://127.0.0.1:8080/results")
                        .required(true),
                ),
        )
}

pub fn configure_cli() -> Cli {
    command().get_matches().into()
}
