//! End-to-end tests for the `up` command line.

use std::path::PathBuf;
use std::process::Command;

use tempfile::TempDir;

/// Runs `up` against a throwaway home, cache and working directory.
struct TestContext {
    temp_dir: TempDir,
    up_home: PathBuf,
    work: PathBuf,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let up_home = temp_dir.path().join(".up");
        let work = temp_dir.path().join("work");
        std::fs::create_dir_all(&up_home).expect("failed to create up home");
        std::fs::create_dir_all(&work).expect("failed to create work dir");
        Self {
            temp_dir,
            up_home,
            work,
        }
    }

    fn up_cmd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_up"));
        cmd.current_dir(&self.work);
        cmd.env("HOME", self.temp_dir.path());
        cmd.env("UP_HOME", &self.up_home);
        cmd.env("UP_CACHE_DIR", self.up_home.join("cache"));
        cmd.env_remove("RUST_LOG");
        cmd
    }
}

#[test]
fn test_help_lists_commands() {
    let ctx = TestContext::new();
    let output = ctx.up_cmd().arg("--help").output().expect("failed to run up");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("dependency"));
    assert!(stdout.contains("function"));
}

#[test]
fn test_add_outside_project_fails() {
    let ctx = TestContext::new();
    let output = ctx
        .up_cmd()
        .args(["--quiet", "dependency", "add", "xpkg.upbound.io/upbound/provider-aws-s3"])
        .output()
        .expect("failed to run up");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("this is not a project directory"), "{stderr}");
}

#[test]
fn test_clean_cache() {
    let ctx = TestContext::new();
    let stale = ctx.up_home.join("cache/xpkg.upbound.io/upbound/provider-aws-s3");
    std::fs::create_dir_all(&stale).unwrap();

    let output = ctx
        .up_cmd()
        .args(["--quiet", "dependency", "clean-cache"])
        .output()
        .expect("failed to run up");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("xpkg cache cleaned"));
    assert!(!stale.exists());
    assert!(ctx.up_home.join("cache").is_dir());
}

#[test]
fn test_identify_function() {
    let ctx = TestContext::new();
    let function = ctx.work.join("functions/compose");
    std::fs::create_dir_all(&function).unwrap();
    std::fs::write(function.join("main.py"), "def compose(req, rsp): pass\n").unwrap();

    let output = ctx
        .up_cmd()
        .args(["--quiet", "function", "identify", "functions/compose"])
        .output()
        .expect("failed to run up");
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "python");

    std::fs::remove_file(function.join("main.py")).unwrap();
    std::fs::write(function.join("README.md"), "# empty\n").unwrap();
    let output = ctx
        .up_cmd()
        .args(["--quiet", "function", "identify", "functions/compose"])
        .output()
        .expect("failed to run up");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no suitable builder found"));
}
