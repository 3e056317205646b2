//! Shared harness for integration tests: a mock broth server, build
//! fixtures, and helpers for driving the real binary and parsing its
//! emitted event stream.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use itch_setup::multiverse::MultiverseState;
use itch_setup::signature::Signature;
use itch_setup::utils::platform;

const BLOCK_SIZE: u64 = 4096;

/// A canned HTTP response.
#[derive(Clone)]
struct Response {
    status: u16,
    body: Vec<u8>,
}

/// Simulates the broth CDN for tests: routes are exact paths, archives
/// honor Range requests, and every request path is recorded.
pub struct MockServer {
    url: String,
    routes: Arc<Mutex<HashMap<String, Response>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let url = format!("http://{}", listener.local_addr().unwrap());
        let routes: Arc<Mutex<HashMap<String, Response>>> = Arc::default();
        let requests: Arc<Mutex<Vec<String>>> = Arc::default();

        {
            let routes = Arc::clone(&routes);
            let requests = Arc::clone(&requests);
            std::thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(stream) = stream else { break };
                    let routes = Arc::clone(&routes);
                    let requests = Arc::clone(&requests);
                    std::thread::spawn(move || serve(stream, &routes, &requests));
                }
            });
        }

        Self { url, routes, requests }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The channel tag the binary under test will compute.
    pub fn channel() -> String {
        platform::default_channel()
    }

    /// Every `METHOD path` seen so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn put(&self, path: String, status: u16, body: Vec<u8>) {
        self.routes.lock().unwrap().insert(path, Response { status, body });
    }

    pub fn set_latest(&self, app: &str, version: &str) {
        let channel = Self::channel();
        self.put(format!("/{app}/{channel}/LATEST"), 200, version.as_bytes().to_vec());
    }

    pub fn set_build_info(&self, app: &str, version: &str, archive_size: u64) {
        let body = serde_json::json!({
            "version": version,
            "files": [
                { "type": "archive", "subType": "default", "size": archive_size },
            ]
        });
        let channel = Self::channel();
        self.put(
            format!("/{app}/{channel}/{version}/info"),
            200,
            body.to_string().into_bytes(),
        );
    }

    pub fn set_archive(&self, app: &str, version: &str, bytes: Vec<u8>) {
        let channel = Self::channel();
        self.put(format!("/{app}/{channel}/{version}/archive/default"), 200, bytes);
    }

    pub fn set_signature(&self, app: &str, version: &str, bytes: Vec<u8>) {
        let channel = Self::channel();
        self.put(format!("/{app}/{channel}/{version}/signature/default"), 200, bytes);
    }

    pub fn set_patch(&self, app: &str, version: &str, sub_type: &str, bytes: Vec<u8>) {
        let channel = Self::channel();
        self.put(format!("/{app}/{channel}/{version}/patch/{sub_type}"), 200, bytes);
    }

    /// Declares an upgrade path whose steps carry the given
    /// `(version, default patch size)` pairs.
    pub fn set_upgrade_path(&self, app: &str, from: &str, to: &str, steps: &[(&str, u64)]) {
        let patches: Vec<serde_json::Value> = steps
            .iter()
            .map(|(version, size)| {
                serde_json::json!({
                    "version": version,
                    "files": [ { "subType": "default", "size": size } ]
                })
            })
            .collect();
        let body = serde_json::json!({ "patches": patches });
        let channel = Self::channel();
        self.put(
            format!("/{app}/{channel}/upgrade-paths/{from}/{to}"),
            200,
            body.to_string().into_bytes(),
        );
    }
}

fn serve(
    stream: TcpStream,
    routes: &Mutex<HashMap<String, Response>>,
    requests: &Mutex<Vec<String>>,
) {
    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(clone) => clone,
        Err(_) => return,
    });
    let mut line = String::new();
    if reader.read_line(&mut line).is_err() {
        return;
    }
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default();
    let path = target.split('?').next().unwrap_or_default().to_string();
    requests.lock().unwrap().push(format!("{method} {path}"));

    let mut range: Option<(u64, Option<u64>)> = None;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).is_err() || header.trim().is_empty() {
            break;
        }
        let lower = header.to_lowercase();
        if let Some(value) = lower.strip_prefix("range: bytes=") {
            if let Some((start, end)) = value.trim().split_once('-') {
                let start = start.parse().unwrap_or(0);
                let end = end.parse().ok();
                range = Some((start, end));
            }
        }
    }

    let response = routes.lock().unwrap().get(&path).cloned();
    let mut stream = stream;
    let Some(response) = response else {
        let _ = stream
            .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        return;
    };

    match range {
        Some((start, end)) if response.status == 200 && !response.body.is_empty() => {
            let len = response.body.len() as u64;
            let end = end.unwrap_or(len - 1).min(len - 1);
            let slice = &response.body[start as usize..=end as usize];
            let head = format!(
                "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {start}-{end}/{len}\r\nConnection: close\r\n\r\n",
                slice.len()
            );
            let _ = stream.write_all(head.as_bytes());
            if method != "HEAD" {
                let _ = stream.write_all(slice);
            }
        }
        _ => {
            let head = format!(
                "HTTP/1.1 {} X\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n",
                response.status,
                response.body.len()
            );
            let _ = stream.write_all(head.as_bytes());
            if method != "HEAD" {
                let _ = stream.write_all(&response.body);
            }
        }
    }
}

/// A sandboxed home directory with multiverse fixtures, mirroring what a
/// real user install looks like on disk.
pub struct Sandbox {
    pub temp: tempfile::TempDir,
    pub app_name: String,
}

impl Sandbox {
    pub fn new(app_name: &str) -> Self {
        Self { temp: tempfile::TempDir::new().unwrap(), app_name: app_name.to_string() }
    }

    pub fn home(&self) -> &Path {
        self.temp.path()
    }

    /// `$HOME/.{app}` , the base directory the binary will use on Linux.
    pub fn base_dir(&self) -> PathBuf {
        self.home().join(format!(".{}", self.app_name))
    }

    pub fn write_state(&self, current: &str, ready: &str) {
        std::fs::create_dir_all(self.base_dir()).unwrap();
        let state =
            MultiverseState { current: current.to_string(), ready: ready.to_string() };
        std::fs::write(
            self.base_dir().join("state.json"),
            serde_json::to_vec(&state).unwrap(),
        )
        .unwrap();
    }

    pub fn read_state(&self) -> Option<MultiverseState> {
        let raw = std::fs::read(self.base_dir().join("state.json")).ok()?;
        serde_json::from_slice(&raw).ok()
    }

    /// Creates `app-{version}` with a runnable executable plus some
    /// version-dependent payload.
    pub fn create_app_version(&self, version: &str) -> PathBuf {
        let dir = self.base_dir().join(format!("app-{version}"));
        write_build_tree(&dir, &self.app_name, version);
        dir
    }

    /// A complete install of `version`.
    pub fn create_full_setup(&self, version: &str) {
        self.create_app_version(version);
        self.write_state(version, "");
    }

    /// An install of `current` with `ready` already staged.
    pub fn create_with_ready_pending(&self, current: &str, ready: &str) {
        self.create_app_version(current);
        self.create_app_version(ready);
        self.write_state(current, ready);
    }

    /// The binary under test, wired to this sandbox and a mock server.
    pub fn command(&self, server: &MockServer) -> assert_cmd::Command {
        let mut cmd = assert_cmd::Command::cargo_bin("itch-setup").unwrap();
        cmd.env("HOME", self.home())
            .env("ITCH_BROTH_URL", server.url())
            .env_remove("ITCHSETUP_VERSION")
            .arg("--appname")
            .arg(&self.app_name);
        cmd
    }
}

/// Writes a realistic little build: a runnable shell script executable and
/// a couple of payload files that differ per version.
pub fn write_build_tree(dir: &Path, app_name: &str, version: &str) {
    std::fs::create_dir_all(dir.join("resources")).unwrap();
    let exe = dir.join(app_name);
    std::fs::write(&exe, format!("#!/bin/sh\necho '{app_name} {version}'\n")).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    std::fs::write(dir.join("resources/version.txt"), version).unwrap();
    std::fs::write(
        dir.join("resources/payload.bin"),
        // Mostly stable across versions, so patches stay small.
        [b"stable bytes ".repeat(1000), version.as_bytes().to_vec()].concat(),
    )
    .unwrap();
}

/// Zips a build directory the way the build pipeline would.
pub fn zip_dir(dir: &Path) -> Vec<u8> {
    let sig = Signature::compute(dir, BLOCK_SIZE).unwrap();
    let mut buf = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buf);
        for entry in &sig.files {
            let options = zip::write::FileOptions::default().unix_permissions(entry.mode);
            writer.start_file(entry.path.clone(), options).unwrap();
            let content = std::fs::read(dir.join(&entry.path)).unwrap();
            writer.write_all(&content).unwrap();
        }
        writer.finish().unwrap();
    }
    buf.into_inner()
}

/// The signature stream the CDN would serve for a build directory.
pub fn signature_of(dir: &Path) -> Vec<u8> {
    Signature::compute(dir, BLOCK_SIZE).unwrap().to_bytes().unwrap()
}

/// A patch stream between two build directories.
pub fn patch_between(source: &Path, target: &Path) -> Vec<u8> {
    let mut out = Vec::new();
    itch_setup::patcher::diff(source, target, BLOCK_SIZE, &mut out).unwrap();
    out
}

/// One parsed event line.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub kind: String,
    pub payload: serde_json::Value,
}

/// Extracts the `{"type": ..., "payload": ...}` lines out of stderr,
/// ignoring interleaved log output.
pub fn parse_events(stderr: &[u8]) -> Vec<EventRecord> {
    String::from_utf8_lossy(stderr)
        .lines()
        .filter_map(|line| {
            let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
            let kind = value.get("type")?.as_str()?.to_string();
            let payload = value.get("payload").cloned().unwrap_or(serde_json::Value::Null);
            Some(EventRecord { kind, payload })
        })
        .collect()
}

pub fn events_of_kind<'a>(events: &'a [EventRecord], kind: &str) -> Vec<&'a EventRecord> {
    events.iter().filter(|e| e.kind == kind).collect()
}

/// Asserts the given kinds appear in this relative order (other events may
/// interleave).
pub fn assert_event_order(events: &[EventRecord], expected: &[&str]) {
    let mut remaining = expected.iter();
    let mut want = remaining.next();
    for event in events {
        if Some(&event.kind.as_str()) == want {
            want = remaining.next();
        }
    }
    assert!(
        want.is_none(),
        "expected event order {expected:?} not satisfied; got {:?}",
        events.iter().map(|e| e.kind.as_str()).collect::<Vec<_>>()
    );
}

/// Progress fractions, in emission order.
pub fn progress_values(events: &[EventRecord]) -> Vec<f64> {
    events
        .iter()
        .filter(|e| e.kind == "progress")
        .filter_map(|e| e.payload.get("progress")?.as_f64())
        .collect()
}
