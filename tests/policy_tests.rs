#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Project policy tests for Lobby Swarm.
//!
//! These tests verify that Cargo.toml and the crate layout conform to project
//! policy. If any test fails, the manifest has drifted from the agreed-upon
//! standards.
//!
//! All checks are synchronous filesystem reads — no network access or async
//! runtime needed.

use std::path::PathBuf;

/// Returns the project root directory (where Cargo.toml lives).
fn project_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

/// Reads a file relative to the project root and returns its contents.
fn read_project_file(relative_path: &str) -> String {
    let path = project_root().join(relative_path);
    std::fs::read_to_string(&path).unwrap_or_else(|e| {
        panic!(
            "Failed to read '{}': {}. This file is required by project policy.",
            path.display(),
            e
        )
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Module: panic_policy
// ─────────────────────────────────────────────────────────────────────────────

mod panic_policy {
    use super::*;

    const REQUIRED_DENY_LINTS: &[&str] = &[
        "unwrap_used",
        "expect_used",
        "panic",
        "todo",
        "unimplemented",
        "indexing_slicing",
    ];

    #[test]
    fn cargo_toml_has_all_panic_free_lints() {
        let cargo = read_project_file("Cargo.toml");

        for lint in REQUIRED_DENY_LINTS {
            let pattern = format!("{lint} = \"deny\"");
            assert!(
                cargo.contains(&pattern),
                "Cargo.toml is missing `{pattern}` in [lints.clippy]. \
                 A unit must never bring the swarm down by panicking."
            );
        }
    }

    #[test]
    fn cargo_toml_has_lints_clippy_section() {
        let cargo = read_project_file("Cargo.toml");
        assert!(
            cargo.contains("[lints.clippy]"),
            "Cargo.toml is missing [lints.clippy] section."
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module: manifest_policy
// ─────────────────────────────────────────────────────────────────────────────

mod manifest_policy {
    use super::*;

    #[test]
    fn rust_version_is_declared() {
        let cargo = read_project_file("Cargo.toml");
        let version = cargo
            .lines()
            .find(|line| line.starts_with("rust-version"))
            .and_then(|line| line.split('"').nth(1))
            .expect("Cargo.toml must declare a quoted rust-version");
        assert!(
            version.split('.').all(|part| part.parse::<u32>().is_ok()),
            "rust-version '{version}' is not a plain version number"
        );
    }

    #[test]
    fn websocket_transport_is_default() {
        let cargo = read_project_file("Cargo.toml");
        assert!(
            cargo.contains(r#"default = ["transport-websocket"]"#),
            "The binary needs the WebSocket transport; it must stay a default feature."
        );
    }

    #[test]
    fn fuzz_crate_targets_this_crate() {
        let fuzz = read_project_file("fuzz/Cargo.toml");
        assert!(fuzz.contains("[dependencies.lobby-swarm]"));
        assert!(fuzz.contains("cargo-fuzz = true"));
    }
}
