use clap::Parser;
use utils::version;

use crate::config::daemon::DaemonArgs;

/// Exposes host character devices to the kubelet as schedulable resources
#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(flatten)]
    pub daemon: DaemonArgs,
}
