use crate::client::{ClientConfig, TorrentClient};
use crate::error::Result;
use crate::util::DEFAULT_IP_ECHO_URL;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "torget")]
#[command(about = "A BitTorrent leecher written in Rust", long_about = None)]
pub struct Cli {
    /// Path to the .torrent file
    torrent: PathBuf,

    /// Directory to write the downloaded content into
    output: String,

    /// Port reported to trackers
    #[arg(short, long, default_value = "6881")]
    port: u16,

    /// Maximum number of concurrent peer sessions
    #[arg(short, long, default_value = "10")]
    max_peers: usize,

    /// HTTP service that echoes our external IP
    #[arg(long, default_value = DEFAULT_IP_ECHO_URL)]
    ip_echo_url: String,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub async fn run(&self) -> Result<()> {
        let config = ClientConfig {
            download_dir: self.output.clone(),
            listen_port: self.port,
            max_peers: self.max_peers,
            ip_echo_url: self.ip_echo_url.clone(),
            ..Default::default()
        };

        let client = TorrentClient::new(config);
        client.download(&self.torrent).await
    }
}
