//! Build script for btk-tagger
//!
//! Exports two compile-time values:
//! - `BTK_USER_AGENT`: `btk-tagger/<version>+<commit>`, sent with every
//!   board and provider request
//! - `BTK_BUILD_INFO`: profile and UTC build date, logged at startup
//!
//! Reruns only when the checked-out commit moves.

use std::path::Path;
use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    Some(text.trim().to_string()).filter(|t| !t.is_empty())
}

fn main() {
    let version = std::env::var("CARGO_PKG_VERSION").unwrap_or_default();
    let commit = git(&["rev-parse", "--short=8", "HEAD"]);
    let dirty = git(&["status", "--porcelain", "--untracked-files=no"]).is_some();

    let user_agent = match commit {
        Some(commit) if dirty => format!("btk-tagger/{}+{}.dirty", version, commit),
        Some(commit) => format!("btk-tagger/{}+{}", version, commit),
        None => format!("btk-tagger/{}", version),
    };

    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    let build_date = chrono::Utc::now().format("%Y-%m-%d");

    println!("cargo:rustc-env=BTK_USER_AGENT={}", user_agent);
    println!("cargo:rustc-env=BTK_BUILD_INFO={} build {}", profile, build_date);

    if let Some(git_dir) = git(&["rev-parse", "--git-dir"]) {
        let head = Path::new(&git_dir).join("HEAD");
        println!("cargo:rerun-if-changed={}", head.display());
        if let Some(reference) = git(&["symbolic-ref", "-q", "HEAD"]) {
            println!("cargo:rerun-if-changed={}", Path::new(&git_dir).join(reference).display());
        }
    }
    println!("cargo:rerun-if-changed=build.rs");
}
