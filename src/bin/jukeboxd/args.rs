use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub struct Args {
    /// Address to listen on for TCP clients.
    #[arg(short, long, default_value_t = IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)))]
    pub listen: IpAddr,
    /// TCP port to listen on.
    #[arg(short, long, default_value_t = 6600)]
    pub port: u16,
    /// Also listen on this UNIX domain socket path.
    #[arg(long)]
    pub socket: Option<PathBuf>,
    /// Config file (line-oriented `key value` pairs); see `config::load_config_file`.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Overrides `connection_timeout` (seconds).
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Overrides `max_connections`.
    #[arg(long = "max-connections")]
    pub max_connections: Option<usize>,
    /// Overrides `max_command_list_size` (KiB).
    #[arg(long = "max-command-list-size")]
    pub max_command_list_size: Option<u64>,
    /// Overrides `max_output_buffer_size` (KiB).
    #[arg(long = "max-output-buffer-size")]
    pub max_output_buffer_size: Option<u64>,
    /// Enables human-friendly logging.
    #[arg(short, long, default_value_t)]
    pub debug: bool,
}
