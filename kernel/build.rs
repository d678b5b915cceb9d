use std::{env, process::Command};

fn main() {
    // Git hash and build timestamp are stamped into the `version` shell
    // command the way the teacher's build.rs does for its boot banner.
    let git_hash = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=GIT_HASH={}", git_hash.trim());

    let build_timestamp = Command::new("date")
        .args(["+%s"])
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .unwrap_or_else(|| "0".to_string());
    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", build_timestamp.trim());

    // The linker script itself is passed via rustflags in .cargo/config.toml
    // (it must apply to every crate in the link, not just this build script's
    // owning crate), but we still want a rebuild if it changes.
    println!("cargo:rerun-if-changed=linker.ld");
    println!("cargo:rerun-if-changed=../limine.conf");

    let _ = env::var("TARGET");
}
