//! End-to-end upgrade scenarios against a mock broth server: no-update,
//! ready-pending, archive plan, patch chain, and failure handling.

mod common;

use common::*;

#[test]
fn test_no_update_available() {
    let server = MockServer::start();
    let sandbox = Sandbox::new("itch");
    sandbox.create_full_setup("1.0.0");
    server.set_latest("itch", "1.0.0");

    let output = sandbox.command(&server).arg("--upgrade").assert().success();

    let events = parse_events(&output.get_output().stderr);
    assert_eq!(events_of_kind(&events, "no-update-available").len(), 1);
    assert!(events_of_kind(&events, "installing-update").is_empty());
    assert!(events_of_kind(&events, "update-ready").is_empty());

    let state = sandbox.read_state().unwrap();
    assert_eq!(state.current, "1.0.0");
    assert_eq!(state.ready, "");
}

#[test]
fn test_ready_pending_equals_latest() {
    let server = MockServer::start();
    let sandbox = Sandbox::new("itch");
    sandbox.create_with_ready_pending("1.0.0", "2.0.0");
    server.set_latest("itch", "2.0.0");

    let output = sandbox.command(&server).arg("--upgrade").assert().success();

    let events = parse_events(&output.get_output().stderr);
    let ready = events_of_kind(&events, "update-ready");
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].payload["version"], "2.0.0");
    assert!(events_of_kind(&events, "installing-update").is_empty());
    assert!(events_of_kind(&events, "progress").is_empty());

    let state = sandbox.read_state().unwrap();
    assert_eq!(state.current, "1.0.0");
    assert_eq!(state.ready, "2.0.0");
}

#[test]
fn test_archive_plan_when_cheaper() {
    let server = MockServer::start();
    let sandbox = Sandbox::new("itch");
    sandbox.create_full_setup("1.0.0");

    // Build 2.0.0 and serve it: patches advertised at 10000 bytes, the
    // archive cheaper, so the archive plan must win.
    let fixture = tempfile::TempDir::new().unwrap();
    let v2 = fixture.path().join("v2");
    write_build_tree(&v2, "itch", "2.0.0");
    let archive = zip_dir(&v2);

    server.set_latest("itch", "2.0.0");
    server.set_upgrade_path("itch", "1.0.0", "2.0.0", &[("2.0.0", 10_000)]);
    server.set_build_info("itch", "2.0.0", archive.len() as u64);
    server.set_archive("itch", "2.0.0", archive);

    let output = sandbox.command(&server).arg("--upgrade").assert().success();

    let events = parse_events(&output.get_output().stderr);
    assert_event_order(&events, &["installing-update", "progress", "update-ready"]);
    let installing = events_of_kind(&events, "installing-update");
    assert_eq!(installing.len(), 1);
    assert_eq!(installing[0].payload["version"], "2.0.0");
    assert_eq!(events_of_kind(&events, "update-ready")[0].payload["version"], "2.0.0");

    // The upgrade verb stages; promotion happens at relaunch.
    let state = sandbox.read_state().unwrap();
    assert_eq!(state.current, "1.0.0");
    assert_eq!(state.ready, "2.0.0");
    assert!(sandbox.base_dir().join("app-2.0.0/itch").is_file());
    assert!(!sandbox.base_dir().join("staging").exists(), "staging cleaned");

    // No patch bytes were fetched.
    assert!(server.requests().iter().all(|r| !r.contains("/patch/")));
}

#[test]
fn test_patch_plan_with_two_hops() {
    let server = MockServer::start();
    let sandbox = Sandbox::new("itch");
    sandbox.create_full_setup("1.0.0");

    // Fixture builds for every hop; the installed 1.0.0 must match its
    // signature exactly, so derive the fixture from the sandbox itself.
    let current_dir = sandbox.base_dir().join("app-1.0.0");
    let fixture = tempfile::TempDir::new().unwrap();
    let v15 = fixture.path().join("v15");
    let v2 = fixture.path().join("v2");
    write_build_tree(&v15, "itch", "1.5.0");
    write_build_tree(&v2, "itch", "2.0.0");

    let patch_a = patch_between(&current_dir, &v15);
    let patch_b = patch_between(&v15, &v2);

    server.set_latest("itch", "2.0.0");
    server.set_upgrade_path(
        "itch",
        "1.0.0",
        "2.0.0",
        &[("1.5.0", patch_a.len() as u64), ("2.0.0", patch_b.len() as u64)],
    );
    // Archive is far more expensive than both patches together.
    server.set_build_info("itch", "2.0.0", 10_000_000);
    server.set_signature("itch", "1.0.0", signature_of(&current_dir));
    server.set_patch("itch", "1.5.0", "default", patch_a);
    server.set_patch("itch", "2.0.0", "default", patch_b);

    let output = sandbox.command(&server).arg("--upgrade").assert().success();

    let events = parse_events(&output.get_output().stderr);
    let installing = events_of_kind(&events, "installing-update");
    assert_eq!(installing.len(), 2);
    assert_eq!(installing[0].payload["version"], "1.5.0");
    assert_eq!(installing[1].payload["version"], "2.0.0");
    assert_event_order(&events, &["installing-update", "update-ready"]);

    let progress = progress_values(&events);
    assert!(!progress.is_empty());
    for pair in progress.windows(2) {
        assert!(pair[1] >= pair[0], "progress regressed: {pair:?}");
    }
    assert!(*progress.last().unwrap() > 0.999);

    let state = sandbox.read_state().unwrap();
    assert_eq!(state.current, "1.0.0");
    assert_eq!(state.ready, "2.0.0");

    // The staged build is exactly the 2.0.0 fixture.
    let staged = sandbox.base_dir().join("app-2.0.0");
    assert_eq!(
        std::fs::read(staged.join("resources/version.txt")).unwrap(),
        b"2.0.0"
    );
    assert!(staged.join("itch").is_file());
    assert!(!sandbox.base_dir().join("staging").exists(), "staging cleaned");

    // The archive was never downloaded.
    assert!(server.requests().iter().all(|r| !r.contains("/archive/")));
}

#[test]
fn test_corrupt_patch_falls_back_to_archive() {
    let server = MockServer::start();
    let sandbox = Sandbox::new("itch");
    sandbox.create_full_setup("1.0.0");

    let current_dir = sandbox.base_dir().join("app-1.0.0");
    let fixture = tempfile::TempDir::new().unwrap();
    let v2 = fixture.path().join("v2");
    write_build_tree(&v2, "itch", "2.0.0");
    let archive = zip_dir(&v2);

    server.set_latest("itch", "2.0.0");
    server.set_upgrade_path("itch", "1.0.0", "2.0.0", &[("2.0.0", 64)]);
    server.set_build_info("itch", "2.0.0", archive.len() as u64);
    server.set_signature("itch", "1.0.0", signature_of(&current_dir));
    server.set_patch("itch", "2.0.0", "default", b"these are not patch bytes".to_vec());
    server.set_archive("itch", "2.0.0", archive);

    let output = sandbox.command(&server).arg("--upgrade").assert().success();

    let events = parse_events(&output.get_output().stderr);
    assert_eq!(events_of_kind(&events, "update-ready").len(), 1);
    assert!(events_of_kind(&events, "update-failed").is_empty());

    let state = sandbox.read_state().unwrap();
    assert_eq!(state.ready, "2.0.0");
    assert!(server.requests().iter().any(|r| r.contains("/archive/")));
}

#[test]
fn test_damaged_install_demotes_patch_plan() {
    let server = MockServer::start();
    let sandbox = Sandbox::new("itch");
    sandbox.create_full_setup("1.0.0");

    let current_dir = sandbox.base_dir().join("app-1.0.0");
    // Signature of the pristine install...
    let signature = signature_of(&current_dir);
    // ...then the install rots on disk.
    std::fs::write(current_dir.join("resources/version.txt"), "mangled").unwrap();

    let fixture = tempfile::TempDir::new().unwrap();
    let v2 = fixture.path().join("v2");
    write_build_tree(&v2, "itch", "2.0.0");
    let archive = zip_dir(&v2);

    server.set_latest("itch", "2.0.0");
    server.set_upgrade_path("itch", "1.0.0", "2.0.0", &[("2.0.0", 64)]);
    server.set_build_info("itch", "2.0.0", archive.len() as u64);
    server.set_signature("itch", "1.0.0", signature);
    server.set_patch("itch", "2.0.0", "default", b"unused".to_vec());
    server.set_archive("itch", "2.0.0", archive);

    let output = sandbox.command(&server).arg("--upgrade").assert().success();

    let events = parse_events(&output.get_output().stderr);
    assert_eq!(events_of_kind(&events, "update-ready").len(), 1);
    assert_eq!(sandbox.read_state().unwrap().ready, "2.0.0");

    // The pre-patch check rejected the plan before any patch download.
    assert!(server.requests().iter().all(|r| !r.contains("/patch/")));
}

#[test]
fn test_upgrade_failure_emits_update_failed_and_cleans_staging() {
    let server = MockServer::start();
    let sandbox = Sandbox::new("itch");
    sandbox.create_full_setup("1.0.0");

    // Latest exists but there is no build info at all: planning fails.
    server.set_latest("itch", "2.0.0");

    let output = sandbox.command(&server).arg("--upgrade").assert().failure().code(1);

    let events = parse_events(&output.get_output().stderr);
    assert_eq!(events_of_kind(&events, "update-failed").len(), 1);
    assert!(events_of_kind(&events, "update-ready").is_empty());

    let state = sandbox.read_state().unwrap();
    assert_eq!(state.current, "1.0.0");
    assert_eq!(state.ready, "");
    assert!(!sandbox.base_dir().join("staging").exists());
}

#[test]
fn test_upgrade_with_nothing_installed_fails() {
    let server = MockServer::start();
    let sandbox = Sandbox::new("itch");
    server.set_latest("itch", "2.0.0");

    let output = sandbox.command(&server).arg("--upgrade").assert().failure().code(1);
    let events = parse_events(&output.get_output().stderr);
    assert_eq!(events_of_kind(&events, "update-failed").len(), 1);
}

#[test]
fn test_version_override_pins_latest() {
    let server = MockServer::start();
    let sandbox = Sandbox::new("itch");
    sandbox.create_full_setup("1.0.0");
    server.set_latest("itch", "2.0.0");

    // The override says we're already on the latest.
    let output = sandbox
        .command(&server)
        .env("ITCHSETUP_VERSION", "1.0.0")
        .arg("--upgrade")
        .assert()
        .success();

    let events = parse_events(&output.get_output().stderr);
    assert_eq!(events_of_kind(&events, "no-update-available").len(), 1);
}
