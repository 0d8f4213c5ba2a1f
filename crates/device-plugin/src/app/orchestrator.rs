use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::app::events::EventSource;
use crate::app::state::transition;
use crate::app::state::LoopState;
use crate::app::state::Transition;
use crate::app::state::Trigger;
use crate::config::PluginSettings;
use crate::k8s::DevicePluginManager;
use crate::k8s::PluginError;

/// Control loop owning the device plugin manager.
///
/// Every (re)start builds a fresh [`DevicePluginManager`] generation; the
/// previous one is fully stopped before its sockets are bound again.
pub struct Orchestrator<E> {
    settings: PluginSettings,
    events: E,
    state: LoopState,
    manager: Option<DevicePluginManager>,
    generation: u64,
}

impl<E: EventSource> Orchestrator<E> {
    pub fn new(settings: PluginSettings, events: E) -> Self {
        Self {
            settings,
            events,
            state: LoopState::NeedStart,
            manager: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Number of manager generations started so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn manager(&self) -> Option<&DevicePluginManager> {
        self.manager.as_ref()
    }

    /// Run until a terminal signal arrives or the event sources close.
    ///
    /// Registration failures are retried forever; a plugin server that
    /// cannot start is fatal.
    pub async fn run(&mut self) -> Result<(), PluginError> {
        while self.state != LoopState::Terminated {
            let trigger = match self.state {
                LoopState::NeedStart => self.start_cycle().await?,
                _ => self.next_trigger().await,
            };
            if self.apply(trigger).await.backoff {
                self.wait_retry_delay().await;
            }
        }
        info!("Device plugin loop terminated");
        Ok(())
    }

    async fn start_cycle(&mut self) -> Result<Trigger, PluginError> {
        if let Some(mut previous) = self.manager.take() {
            previous.stop_all().await;
        }

        self.generation += 1;
        info!("Starting device plugins (generation {})", self.generation);

        let mut manager = DevicePluginManager::new(&self.settings)?;
        if let Err(e) = manager.start_all().await {
            manager.stop_all().await;
            return Err(e);
        }

        let trigger = match manager.register_all().await {
            Ok(()) => {
                info!("Registered {} device plugins", manager.plugins().len());
                Trigger::Registered
            }
            Err(e) => {
                warn!("Could not register device plugins: {e}");
                Trigger::RegistrationFailed
            }
        };
        self.manager = Some(manager);
        Ok(trigger)
    }

    async fn next_trigger(&mut self) -> Trigger {
        let event = self.events.next_event().await;
        Trigger::from_event(event, self.settings.kubelet_socket_name())
    }

    async fn apply(&mut self, trigger: Trigger) -> Transition {
        let t = transition(self.state, trigger);
        if t.next != self.state {
            match trigger {
                Trigger::KubeletRestarted => info!(
                    "{:?} created, restarting device plugins",
                    self.settings.kubelet_socket
                ),
                Trigger::Hangup => info!("Received SIGHUP, restarting device plugins"),
                Trigger::Shutdown => info!("Shutting down device plugins"),
                _ => debug!("{:?} -> {:?} on {:?}", self.state, t.next, trigger),
            }
        }

        if t.stop_plugins {
            if let Some(manager) = self.manager.as_mut() {
                manager.stop_all().await;
            }
        }
        self.state = t.next;
        t
    }

    /// Sleep before the next registration attempt while still honoring
    /// shutdown and restart requests.
    async fn wait_retry_delay(&mut self) {
        info!(
            "Retrying device plugin registration in {:?}",
            self.settings.retry_delay
        );
        let delay = tokio::time::sleep(self.settings.retry_delay);
        tokio::pin!(delay);

        loop {
            let trigger = tokio::select! {
                () = &mut delay => return,
                trigger = self.next_trigger() => trigger,
            };
            match trigger {
                Trigger::WatchError | Trigger::Ignored => continue,
                trigger => {
                    self.apply(trigger).await;
                    return;
                }
            }
        }
    }
}
