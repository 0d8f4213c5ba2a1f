//! Application module
//!
//! Process lifecycle: single instance lock, host device init, then the
//! orchestration loop restarting the device plugins on kubelet restarts and
//! SIGHUP.

pub mod core;
pub mod events;
pub mod orchestrator;
pub mod state;

pub use self::core::Application;
pub use events::ChannelEventSource;
pub use events::Event;
pub use events::EventMultiplexer;
pub use events::EventSource;
pub use events::Signal;
pub use orchestrator::Orchestrator;
pub use state::LoopState;
