use std::env;

fn main() {
    // a tarball build has no git metadata, the version then lacks the sha
    if let Err(err) = emit_git_sha() {
        println!("cargo:warning=vergen: {err}");
    }

    let version = env::var("VERSION").unwrap_or_else(|_| "latest".to_string());
    println!("cargo:rustc-env=IMAGE_VERSION={version}");
    println!("cargo:rerun-if-env-changed=VERSION");
}

/// Emits VERGEN_GIT_SHA and VERGEN_GIT_DIRTY for the version string.
fn emit_git_sha() -> anyhow::Result<()> {
    let git2 = vergen_git2::Git2Builder::default()
        .sha(true)
        .dirty(true)
        .build()?;

    vergen_git2::Emitter::default()
        .fail_on_error()
        .add_instructions(&git2)?
        .emit()
}
