//! Restart state machine of the orchestration loop.

use std::ffi::OsStr;

use tracing::warn;

use crate::app::events::Event;

/// Where the orchestration loop stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// a new manager generation must be built, started and registered
    NeedStart,
    /// all plugins are serving and registered
    Running,
    Terminated,
}

/// What just happened, as far as the loop cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Registered,
    RegistrationFailed,
    /// the kubelet socket was (re)created, i.e. kubelet restarted
    KubeletRestarted,
    Hangup,
    Shutdown,
    WatchError,
    /// an event nobody acts on
    Ignored,
}

impl Trigger {
    /// Classify a multiplexer event. `None` (sources gone) shuts down.
    pub fn from_event(event: Option<Event>, kubelet_socket_name: Option<&OsStr>) -> Self {
        match event {
            Some(Event::SocketCreated(path)) => {
                if kubelet_socket_name.is_some() && path.file_name() == kubelet_socket_name {
                    Trigger::KubeletRestarted
                } else {
                    Trigger::Ignored
                }
            }
            Some(Event::WatchError(e)) => {
                warn!("Inotify: {e}");
                Trigger::WatchError
            }
            Some(Event::Signal(signal)) if signal.is_terminal() => Trigger::Shutdown,
            Some(Event::Signal(_)) => Trigger::Hangup,
            None => {
                warn!("Event sources closed, shutting down");
                Trigger::Shutdown
            }
        }
    }
}

/// Outcome of applying a trigger to a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: LoopState,
    /// run `stop_all` on the current manager
    pub stop_plugins: bool,
    /// wait the retry delay before the next start attempt
    pub backoff: bool,
}

impl Transition {
    fn stay(state: LoopState) -> Self {
        Self {
            next: state,
            stop_plugins: false,
            backoff: false,
        }
    }

    fn to(next: LoopState, stop_plugins: bool) -> Self {
        Self {
            next,
            stop_plugins,
            backoff: false,
        }
    }
}

/// The full transition table.
pub fn transition(state: LoopState, trigger: Trigger) -> Transition {
    use LoopState::*;
    use Trigger::*;

    match (state, trigger) {
        (Terminated, _) => Transition::stay(Terminated),
        (NeedStart | Running, Shutdown) => Transition::to(Terminated, true),
        (NeedStart, Registered) => Transition::to(Running, false),
        (NeedStart, RegistrationFailed) => Transition {
            next: NeedStart,
            stop_plugins: true,
            backoff: true,
        },
        // plugins are already down, retry right away
        (NeedStart, KubeletRestarted | Hangup) => Transition::stay(NeedStart),
        (Running, KubeletRestarted | Hangup) => Transition::to(NeedStart, true),
        // registration outcomes only exist while starting
        (Running, Registered | RegistrationFailed) => Transition::stay(Running),
        (NeedStart | Running, WatchError | Ignored) => Transition::stay(state),
    }
}
