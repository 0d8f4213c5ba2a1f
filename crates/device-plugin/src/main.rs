use anyhow::Result;
use clap::Parser;
use device_plugin::app::Application;
use device_plugin::config::Cli;
use device_plugin::infrastructure::logging;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    let _guard = logging::init();

    tracing::info!("Starting k8s device plugin {}", &**version::VERSION);

    let app = Application::new(cli.daemon);
    if let Err(e) = app.run().await {
        tracing::error!("{e:#}");
        return Err(e);
    }

    Ok(())
}
