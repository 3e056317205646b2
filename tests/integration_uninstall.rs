//! Uninstall and info verbs.

mod common;

use common::*;
use predicates::prelude::*;

#[test]
fn test_uninstall_removes_managed_files_keeps_user_data() {
    let server = MockServer::start();
    let sandbox = Sandbox::new("itch");
    sandbox.create_with_ready_pending("1.0.0", "2.0.0");

    let base = sandbox.base_dir();
    let setup_binary = itch_setup::utils::platform::setup_binary_name("itch");
    std::fs::write(base.join("itch.png"), b"icon").unwrap();
    std::fs::write(base.join(&setup_binary), b"installer copy").unwrap();
    std::fs::create_dir_all(base.join("db")).unwrap();
    std::fs::write(base.join("db/library.sqlite"), b"user data").unwrap();

    sandbox.command(&server).arg("--uninstall").assert().success();

    assert!(!base.join("state.json").exists());
    assert!(!base.join("app-1.0.0").exists());
    assert!(!base.join("app-2.0.0").exists());
    assert!(!base.join("itch.png").exists());
    assert!(!base.join(&setup_binary).exists(), "setup binary copy cleared");
    assert!(base.join("db/library.sqlite").is_file(), "user data preserved");
}

#[test]
fn test_uninstall_on_empty_base_succeeds() {
    let server = MockServer::start();
    let sandbox = Sandbox::new("itch");

    sandbox.command(&server).arg("--uninstall").assert().success();
}

#[test]
fn test_info_prints_state() {
    let server = MockServer::start();
    let sandbox = Sandbox::new("itch");
    sandbox.create_with_ready_pending("1.0.0", "2.0.0");

    sandbox
        .command(&server)
        .arg("--info")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"current\":\"1.0.0\""))
        .stdout(predicate::str::contains("\"ready\":\"2.0.0\""));

    // Info is read-only: no network traffic.
    assert!(server.requests().is_empty());
}
