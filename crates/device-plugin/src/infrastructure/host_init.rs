use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;
use tracing::info;

use crate::infrastructure::StartupError;

/// Prepare the host device nodes (e.g. one binder node per instance).
///
/// Runs `<interpreter> <script> <instance_count>` once; a non-zero exit is
/// reported with the script's stderr.
pub async fn init_host_devices(
    interpreter: &Path,
    script: &Path,
    instance_count: usize,
) -> Result<(), StartupError> {
    info!(
        "Running host device init script {:?} with {} instances",
        script, instance_count
    );

    let output = Command::new(interpreter)
        .arg(script)
        .arg(instance_count.to_string())
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| StartupError::HostInitSpawn {
            script: script.to_path_buf(),
            source,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        debug!("host device init output: {}", stdout.trim());
    }

    if !output.status.success() {
        return Err(StartupError::HostInit {
            script: script.to_path_buf(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    info!("Host devices initialized");
    Ok(())
}
