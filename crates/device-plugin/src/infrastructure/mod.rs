pub mod error;
pub mod host_init;
pub mod logging;
pub mod pid_lock;

pub use error::StartupError;
