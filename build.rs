use std::process::Command;

fn main() {
    // Packaged builds have no .git directory; they pass the hash explicitly.
    println!("cargo:rerun-if-env-changed=SCRIBE_GIT_HASH");
    if let Ok(hash) = std::env::var("SCRIBE_GIT_HASH") {
        println!("cargo:rustc-env=GIT_HASH={}", hash.trim());
        return;
    }

    // Get the short git commit hash
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok();

    let git_hash = output
        .and_then(|o| {
            if o.status.success() {
                String::from_utf8(o.stdout).ok()
            } else {
                None
            }
        })
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=GIT_HASH={}", git_hash);

    // Re-run if git HEAD changes
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/");
}
