use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod decode;
pub mod serve;
pub mod status;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the gateway daemon.
    Serve(ServeArgs),
    /// Query a running gateway over its bridge socket.
    Status(StatusArgs),
    /// Decode a captured byte dump of printer frames.
    Decode(DecodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args),
        Command::Status(args) => status::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Configuration file.
    #[arg(
        long,
        short = 'c',
        value_name = "FILE",
        env = "FABGATE_CONFIG",
        default_value = "/etc/fabgate/config.json"
    )]
    pub config: PathBuf,

    /// Bridge socket path (overrides the configuration).
    #[arg(long, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// Run against a simulated printer instead of real hardware.
    #[arg(long)]
    pub simulate: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Bridge socket of the running gateway.
    #[arg(long, value_name = "PATH", default_value = "/run/fabgate.sock")]
    pub socket: PathBuf,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Capture file to decode.
    #[arg(required_unless_present = "hex")]
    pub file: Option<PathBuf>,

    /// Decode a hex string instead of a file.
    #[arg(long, value_name = "HEX", conflicts_with = "file")]
    pub hex: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
