use std::process::Command;

fn main() {
  println!("cargo:rerun-if-changed=VERSION");
  println!("cargo:rerun-if-changed=.git/HEAD");

  let version = std::fs::read_to_string("VERSION")
    .map(|v| v.trim().to_string())
    .ok()
    .filter(|v| !v.is_empty())
    .unwrap_or_else(|| std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".into()));

  let revision = Command::new("git")
    .args(["rev-parse", "--short=7", "HEAD"])
    .output()
    .ok()
    .filter(|out| out.status.success())
    .and_then(|out| String::from_utf8(out.stdout).ok())
    .map(|rev| rev.trim().to_string())
    .filter(|rev| !rev.is_empty())
    .unwrap_or_else(|| "dev".to_string());

  println!("cargo:rustc-env=QBC_BUILD_VERSION={}-{}", version, revision);
}
