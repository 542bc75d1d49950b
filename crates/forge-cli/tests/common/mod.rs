//! Shared test utilities for forge-cli integration tests.

use assert_cmd::Command;

/// Get a Command for the novelforge binary with a clean environment.
///
/// Provider keys and `NOVELFORGE_*` variables from the developer's shell are
/// removed so tests never reach a real model endpoint.
#[allow(deprecated)]
pub fn novelforge_cmd() -> Command {
    let mut cmd = Command::cargo_bin("novelforge").expect("novelforge binary should exist");
    for var in [
        "GEMINI_API_KEY",
        "OPENAI_API_KEY",
        "NOVELFORGE_CONFIG",
        "NOVELFORGE_PROJECT",
        "NOVELFORGE_VERBOSE",
        "NOVELFORGE_QUIET",
        "NOVELFORGE_COLOR",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd.env("NO_COLOR", "1");
    cmd
}
