use anyhow::Context;
use anyhow::Result;

use crate::app::events::EventMultiplexer;
use crate::app::orchestrator::Orchestrator;
use crate::config::DaemonArgs;
use crate::config::PluginSettings;
use crate::infrastructure::host_init::init_host_devices;
use crate::infrastructure::pid_lock::PidLock;

/// Application core structure
pub struct Application {
    daemon_args: DaemonArgs,
    settings: PluginSettings,
}

impl Application {
    pub fn new(daemon_args: DaemonArgs) -> Self {
        let settings = PluginSettings::from(&daemon_args);
        Self {
            daemon_args,
            settings,
        }
    }

    /// Run the daemon until a terminal signal arrives
    pub async fn run(self) -> Result<()> {
        let _lock = PidLock::acquire(&self.daemon_args.lock_file)
            .context("failed to acquire the single instance lock")?;

        if self.daemon_args.skip_host_init {
            tracing::info!("Skipping host device init");
        } else {
            init_host_devices(
                &self.daemon_args.init_interpreter,
                &self.daemon_args.init_script,
                self.settings.instance_count,
            )
            .await
            .context("failed to initialize host devices")?;
        }

        let events = EventMultiplexer::new(&self.settings.plugin_dir)
            .context("failed to set up event sources")?;

        tracing::info!(
            "Serving {} devices with {} instances each",
            self.settings.devices.len(),
            self.settings.instance_count
        );
        let mut orchestrator = Orchestrator::new(self.settings, events);
        orchestrator
            .run()
            .await
            .context("device plugin loop failed")?;

        tracing::info!("Application run completed");
        Ok(())
    }
}
