use std::collections::VecDeque;
use std::future::Future;
use std::path::Path;
use std::path::PathBuf;

use notify::EventKind;
use notify::RecommendedWatcher;
use notify::RecursiveMode;
use notify::Watcher;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;

use crate::infrastructure::StartupError;

/// OS signals the daemon reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGHUP, restart all plugins
    Hangup,
    Interrupt,
    Terminate,
    Quit,
}

impl Signal {
    /// Everything but SIGHUP shuts the daemon down.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Signal::Hangup)
    }
}

/// One wake-up of the orchestration loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// a file was created in the plugin directory
    SocketCreated(PathBuf),
    WatchError(String),
    Signal(Signal),
}

/// Single wait point over all event sources.
///
/// No ordering is guaranteed between distinct sources.
pub trait EventSource {
    /// Wait for the next event; `None` once every source is gone.
    fn next_event(&mut self) -> impl Future<Output = Option<Event>> + Send;
}

/// Merges plugin directory notifications and OS signals.
pub struct EventMultiplexer {
    fs_events: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    /// a single notify event may carry several paths
    pending: VecDeque<Event>,
    hangup: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
    _watcher: RecommendedWatcher,
}

impl EventMultiplexer {
    /// Start watching `plugin_dir` and install the signal handlers.
    pub fn new(plugin_dir: &Path) -> Result<Self, StartupError> {
        let watcher_err = |source: notify::Error| StartupError::Watcher {
            path: plugin_dir.to_path_buf(),
            source,
        };

        info!("Starting FS watcher on {:?}", plugin_dir);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            // receiver dropped means the loop is gone
            let _ = tx.send(res);
        })
        .map_err(watcher_err)?;
        watcher
            .watch(plugin_dir, RecursiveMode::NonRecursive)
            .map_err(watcher_err)?;

        info!("Starting OS watcher");
        let install = |kind: SignalKind| signal(kind).map_err(StartupError::SignalHandler);

        Ok(Self {
            fs_events: rx,
            pending: VecDeque::new(),
            hangup: install(SignalKind::hangup())?,
            interrupt: install(SignalKind::interrupt())?,
            terminate: install(SignalKind::terminate())?,
            quit: install(SignalKind::quit())?,
            _watcher: watcher,
        })
    }

    fn queue_fs_event(&mut self, event: notify::Event) {
        if !matches!(event.kind, EventKind::Create(_)) {
            debug!("ignoring filesystem event: {:?}", event);
            return;
        }
        self.pending
            .extend(event.paths.into_iter().map(Event::SocketCreated));
    }
}

impl EventSource for EventMultiplexer {
    async fn next_event(&mut self) -> Option<Event> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }

            tokio::select! {
                res = self.fs_events.recv() => match res {
                    Some(Ok(event)) => self.queue_fs_event(event),
                    Some(Err(e)) => return Some(Event::WatchError(e.to_string())),
                    None => return None,
                },
                Some(()) = self.hangup.recv() => return Some(Event::Signal(Signal::Hangup)),
                Some(()) = self.interrupt.recv() => return Some(Event::Signal(Signal::Interrupt)),
                Some(()) = self.terminate.recv() => return Some(Event::Signal(Signal::Terminate)),
                Some(()) = self.quit.recv() => return Some(Event::Signal(Signal::Quit)),
            }
        }
    }
}

/// Replays events pushed through a channel; lets callers script the loop.
#[derive(Debug)]
pub struct ChannelEventSource {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl ChannelEventSource {
    pub fn channel() -> (mpsc::UnboundedSender<Event>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

impl EventSource for ChannelEventSource {
    async fn next_event(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}
