use std::process::Command;

fn main() {
    let version = Command::new("git")
        .args(["describe", "--always", "--dirty"])
        .output()
        .ok()
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

    let path_res = Command::new("git")
        .args(["rev-parse", "--path-format=relative", "--git-dir"])
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string());

    println!("cargo:rustc-env=VERSION={version}");
    if let Ok(path) = path_res {
        if !path.is_empty() {
            println!("cargo:rerun-if-changed={path}/HEAD");
            // default rerun paths get lost once any have been added.
            println!("cargo:rerun-if-changed=.");
        }
    }
}
