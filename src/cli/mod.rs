pub mod actions;
pub mod config;
pub mod report;

use clap::{Arg, ArgMatches, Command};

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    build_command().get_matches()
}

pub fn build_command() -> Command {
    Command::new("invpoll")
        .about("Poll registers of energy-storage and inverter hardware")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Device configuration file (.json or .toml)")
                .value_name("FILE")
                .required(true),
        )
        .arg(
            Arg::new("once")
                .long("once")
                .short('o')
                .help("Poll a single cycle and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .short('j')
                .help("Output one JSON object per poll")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("interval-ms")
                .long("interval-ms")
                .short('i')
                .help("Delay between the starts of two polls in persistent mode")
                .value_name("MS")
                .value_parser(clap::value_parser!(u64))
                .default_value("5000"),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .help("Write logs to this file instead of stderr")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("plan")
                .long("plan")
                .help("Print the read plan and exit")
                .action(clap::ArgAction::SetTrue)
                .conflicts_with("once"),
        )
}
