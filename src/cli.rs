use clap::Parser;
use std::path::PathBuf;

/// ctscope: TCP connection tracker and state-machine validator
#[derive(Parser, Debug)]
#[command(name = "ctscope", version, about)]
pub struct Cli {
    /// Network interface to capture on (e.g., "en0", "eth0").
    /// If neither this nor --read is given, the default interface is used.
    #[arg(short, long, conflicts_with = "read")]
    pub interface: Option<String>,

    /// Read frames from a pcap file instead of capturing live
    #[arg(short, long)]
    pub read: Option<PathBuf>,

    /// BPF filter expression (e.g., "tcp port 80", "host 192.168.1.1")
    #[arg(short, long)]
    pub filter: Option<String>,

    /// Maximum number of frames to process (0 = unlimited)
    #[arg(short = 'c', long)]
    pub count: Option<u64>,

    /// Accept out-of-window segments instead of rejecting them
    #[arg(long)]
    pub liberal: bool,

    /// Segments accepted unchecked after a mid-stream pickup (0 disables pickup)
    #[arg(long)]
    pub loose: Option<u32>,

    /// Retransmissions after which the timeout is capped
    #[arg(long)]
    pub max_retrans: Option<u32>,

    /// Skip TCP checksum verification
    #[arg(long)]
    pub no_checksum: bool,

    /// Number of worker shards (default: half the CPUs, at most 8)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Connections per worker before the least recently seen are evicted
    #[arg(long)]
    pub max_conns: Option<usize>,

    /// Write the final connection table to this path as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Print periodic counters
    #[arg(long)]
    pub stats: bool,

    /// Do not print rejected segments
    #[arg(short, long)]
    pub quiet: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// List available network interfaces and exit
    #[arg(short, long)]
    pub list_interfaces: bool,

    /// Load settings from a TOML file; flags override it
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn tracking_flags() {
        let cli = Cli::parse_from([
            "ctscope",
            "-r",
            "trace.pcap",
            "--liberal",
            "--loose",
            "0",
            "--no-checksum",
            "-vv",
        ]);
        assert_eq!(cli.read, Some(PathBuf::from("trace.pcap")));
        assert!(cli.liberal);
        assert_eq!(cli.loose, Some(0));
        assert!(cli.no_checksum);
        assert_eq!(cli.verbose, 2);
        assert!(cli.count.is_none());
    }

    #[test]
    fn interface_and_file_conflict() {
        assert!(Cli::try_parse_from(["ctscope", "-i", "eth0", "-r", "x.pcap"]).is_err());
    }
}
