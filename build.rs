//! Build script for convenios
//!
//! Exposes the git commit and build time to `/version`. Container builds
//! without a `.git` directory can pass the commit in `SOURCE_COMMIT`.

use std::process::Command;

/// Trimmed stdout of a successful git invocation
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn main() {
    let full = std::env::var("SOURCE_COMMIT")
        .ok()
        .filter(|c| !c.trim().is_empty())
        .or_else(|| git(&["rev-parse", "HEAD"]));

    let short = match &full {
        Some(commit) => commit.chars().take(7).collect(),
        None => "unknown".to_string(),
    };

    println!("cargo:rustc-env=GIT_COMMIT_SHORT={short}");
    println!(
        "cargo:rustc-env=GIT_COMMIT_FULL={}",
        full.as_deref().unwrap_or("unknown")
    );
    println!(
        "cargo:rustc-env=BUILD_TIMESTAMP={}",
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ")
    );

    println!("cargo:rerun-if-env-changed=SOURCE_COMMIT");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/");
}
