use std::{env, fs, path::PathBuf, process::Command};

fn main() {
    write_version().expect("write version.rs");

    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-changed=../../.git/refs");
}

fn write_version() -> anyhow::Result<()> {
    let pkg_version = env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());
    let git_sha = env::var("GIT_SHA")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(git_short_sha)
        .unwrap_or_else(|| "unknown".to_string());
    let build_timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let long_version = format!("{pkg_version} (git {git_sha}, built {build_timestamp})");

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"));
    let dest = out_dir.join("version.rs");
    let contents = format!(
        "pub const VERSION: &str = \"{pkg_version}\";\n\
         pub const GIT_SHA: &str = \"{git_sha}\";\n\
         pub const BUILD_TIMESTAMP: &str = \"{build_timestamp}\";\n\
         pub const FULL_VERSION: &str = \"{long_version}\";\n"
    );
    fs::write(&dest, contents)?;
    Ok(())
}

fn git_short_sha() -> Option<String> {
    Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
            } else {
                None
            }
        })
}
