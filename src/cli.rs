//! Command-line adapter over [`TranslatorConfig`]. The facade's constructor
//! is the single source of truth for configuration; this is a thin `clap`
//! parser in front of it.

use crate::config::TranslatorConfig;
use std::time::Duration;

#[derive(clap::Parser, Debug)]
#[command(about = "FUSE-to-NFSv4 protocol translator for virtio-fs hosts")]
pub struct Args {
    /// Address of the backing NFSv4 server.
    #[arg(long)]
    pub server: String,

    /// Absolute path of the export to mount, e.g. /srv/data.
    #[arg(long)]
    pub export: String,

    /// Enable debug-level logging.
    #[arg(long)]
    pub debug: bool,

    /// Attribute cache timeout advertised to the host, in seconds.
    #[arg(long, default_value_t = 1)]
    pub timeout: u64,

    /// Advisory worker thread count.
    #[arg(long, default_value_t = 4)]
    pub nthreads: usize,

    /// Number of continuation records to pre-allocate.
    #[arg(long, default_value_t = 1024)]
    pub pool_capacity: usize,
}

impl Args {
    pub fn into_config(self) -> TranslatorConfig {
        TranslatorConfig {
            server: self.server,
            export: self.export,
            debug: self.debug,
            timeout: Duration::from_secs(self.timeout),
            nthreads: self.nthreads,
            pool_capacity: self.pool_capacity,
        }
    }
}
