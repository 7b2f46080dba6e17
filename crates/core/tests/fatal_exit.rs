//! `fatal` terminates the process with a failure status.

use std::process::Command;

use raytracer_core::{ErrorCode, ErrorModule, fatal};

/// Set in the child process that actually calls `fatal`.
const CHILD_ENV: &str = "RAYTRACER_FATAL_CHILD";

#[test]
fn test_fatal_exits_with_failure_status() {
    if std::env::var_os(CHILD_ENV).is_some() {
        fatal(
            ErrorCode::new(ErrorModule::Shader, 0x00),
            "shader module failed to build",
        );
    }

    let exe = std::env::current_exe().unwrap();
    let status = Command::new(exe)
        .args(["--exact", "test_fatal_exits_with_failure_status"])
        .env(CHILD_ENV, "1")
        .status()
        .unwrap();

    assert!(!status.success());
    assert_eq!(status.code(), Some(i32::from(ErrorModule::Shader as u8)));
}
