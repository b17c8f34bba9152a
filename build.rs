use std::env;
use std::process::Command;

/// Set by packagers building outside a git checkout.
const VERSION_OVERRIDE: &str = "SPSA_TUNE_BUILD_DESCRIBE";

fn git_describe() -> Option<String> {
    let out = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let describe = String::from_utf8(out.stdout).ok()?;
    let describe = describe.trim();
    (!describe.is_empty()).then(|| describe.to_string())
}

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs");
    println!("cargo:rerun-if-changed=.git/index");
    println!("cargo:rerun-if-env-changed={VERSION_OVERRIDE}");

    let pkg_version = env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".into());
    let describe = env::var(VERSION_OVERRIDE)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(git_describe);

    let app_version = match describe {
        Some(describe) => format!("{pkg_version} ({describe})"),
        None => pkg_version,
    };
    println!("cargo:rustc-env=APP_VERSION={app_version}");
}
