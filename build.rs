#![forbid(unsafe_code)]

// Build information is captured into compile time environment variables that
// the version endpoint and the startup banner read with env!().  Source trees
// that are not git checkouts still build; the git values become "unknown".
const UNKNOWN: &str = "unknown";

fn main() {
    set_env("GIT_BRANCH", build_data::get_git_branch());
    set_env("GIT_COMMIT_SHORT", build_data::get_git_commit_short());
    set_env("GIT_DIRTY", build_data::get_git_dirty().map(|d| d.to_string()));
    set_env("SOURCE_TIMESTAMP", build_data::get_source_time().map(|t| t.to_string()));
    set_env("RUSTC_VERSION", build_data::get_rustc_version());

    // Tells cargo not to rebuild build.rs during debug builds when other files change.
    // This speeds up development builds.
    //build_data::no_debug_rebuilds();
}

fn set_env(name: &str, value: Result<String, String>) {
    let value = value.unwrap_or_else(|_| UNKNOWN.to_string());
    println!("cargo:rustc-env={}={}", name, value);
}
