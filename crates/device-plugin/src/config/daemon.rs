use std::path::PathBuf;

use clap::Parser;

use crate::config::default_instance_count;
use crate::config::devices::parse_device_table;
use crate::config::devices::DeviceTable;

#[derive(Parser, Clone, Debug)]
pub struct DaemonArgs {
    #[arg(
        long,
        env = "DEVICE_PLUGIN_PATH",
        default_value = "/var/lib/kubelet/device-plugins/",
        value_hint = clap::ValueHint::DirPath,
        help = "Kubelet device plugin directory, plugin sockets are created here"
    )]
    pub device_plugin_path: PathBuf,

    #[arg(
        long,
        env = "KUBELET_SOCKET_NAME",
        default_value = "kubelet.sock",
        help = "File name of the kubelet registration socket inside the device plugin directory"
    )]
    pub kubelet_socket: String,

    #[arg(
        long,
        env = "RESOURCE_NAME_PREFIX",
        default_value = "openvmi/",
        help = "Prefix of the advertised resource names, e.g. openvmi/ gives openvmi/fuse"
    )]
    pub resource_prefix: String,

    #[arg(
        long,
        env = "DEVICE_INSTANCES",
        help = "Number of instances advertised per device (defaults to the host CPU count)"
    )]
    pub instances: Option<usize>,

    #[arg(
        long,
        env = "DEVICE_TABLE",
        help = "Devices to expose as JSON, e.g. [{\"path\":\"/dev/fuse\",\"permissions\":\"rwm\"}] (defaults to fuse, ashmem and binder)",
        value_parser = parse_device_table
    )]
    pub devices: Option<DeviceTable>,

    #[arg(
        long,
        env = "HOST_DEVICE_INIT_SCRIPT",
        default_value = "/opt/openvmi/k8s-plugins/k8s-dev-init.sh",
        value_hint = clap::ValueHint::FilePath,
        help = "Script preparing the host device nodes, called with the instance count"
    )]
    pub init_script: PathBuf,

    #[arg(
        long,
        default_value = "/bin/bash",
        value_hint = clap::ValueHint::ExecutablePath,
        help = "Interpreter used to run the host device init script"
    )]
    pub init_interpreter: PathBuf,

    #[arg(
        long,
        help = "Skip the host device init script",
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    pub skip_host_init: bool,

    #[arg(
        long,
        env = "DEV_PLUGIN_LOCK_FILE",
        default_value = "/run/k8s_dev_plugin_service.pid",
        value_hint = clap::ValueHint::FilePath,
        help = "Lock file guarding against a second running instance"
    )]
    pub lock_file: PathBuf,

    #[arg(
        long,
        default_value = "5",
        help = "Seconds to wait before retrying a failed kubelet registration"
    )]
    pub registration_retry_secs: u64,
}

impl DaemonArgs {
    pub fn instance_count(&self) -> usize {
        self.instances.unwrap_or_else(default_instance_count)
    }
}
