//! CLI subprocess integration tests.
//!
//! These tests invoke the `vmmirror` binary as a subprocess against an
//! in-process `vmmirror-server` and verify exit codes, stdout content, and
//! JSON output stability.

use std::path::Path;
use std::process::Command;
use vmmirror_server::TestServer;

const BUCKET: &str = "images";

fn vmmirror_bin(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_vmmirror"));
    cmd.env("HOME", home);
    cmd.env_remove("OPT_LOCAL_IMAGES_PATH");
    cmd.env_remove("VMMIRROR_LOG");
    cmd
}

fn seeded_server() -> (TestServer, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(dir.path().join("data"));
    let store = &server.store;
    for (image, caps) in [
        ("ubuntu1", &["capability:net", "capability:vsock"][..]),
        ("alpine", &[][..]),
    ] {
        let root = format!("microvm-images/{image}/");
        store.put_object(BUCKET, &root, b"").unwrap();
        store
            .put_object(BUCKET, &format!("{root}kernel/vmlinux.bin"), b"kernel")
            .unwrap();
        store
            .put_object(BUCKET, &format!("{root}fsfiles/{image}-rootfs.ext4"), b"rootfs")
            .unwrap();
        store
            .put_object(BUCKET, &format!("{root}fsfiles/{image}.id_rsa"), b"key")
            .unwrap();
        let tags: Vec<(&str, &str)> = caps.iter().map(|c| (*c, "")).collect();
        store.put_tags(BUCKET, &root, &tags).unwrap();
    }
    (server, dir)
}

fn remote_args<'a>(cmd: &'a mut Command, server: &TestServer) -> &'a mut Command {
    cmd.args(["--remote", server.url.as_str(), "--bucket", BUCKET])
}

#[test]
fn cli_version_exits_zero() {
    let home = tempfile::tempdir().unwrap();
    let output = vmmirror_bin(home.path()).arg("--version").output().unwrap();
    assert!(output.status.success(), "vmmirror --version must exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("vmmirror"),
        "version output must contain 'vmmirror': {stdout}"
    );
}

#[test]
fn cli_help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    let output = vmmirror_bin(home.path()).arg("--help").output().unwrap();
    assert!(output.status.success(), "vmmirror --help must exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["capabilities", "index", "list", "fetch", "completions"] {
        assert!(stdout.contains(command), "help must list '{command}'");
    }
}

#[test]
fn cli_capabilities_json() {
    let (server, _dir) = seeded_server();
    let home = tempfile::tempdir().unwrap();
    let mut cmd = vmmirror_bin(home.path());
    let output = remote_args(&mut cmd, &server)
        .args(["--json", "capabilities"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let caps: Vec<String> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(caps, vec!["net", "vsock"]);
}

#[test]
fn cli_list_filters_by_capability() {
    let (server, _dir) = seeded_server();
    let home = tempfile::tempdir().unwrap();

    let mut cmd = vmmirror_bin(home.path());
    let output = remote_args(&mut cmd, &server)
        .args(["--json", "list", "-c", "net", "-c", "vsock"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["images"], serde_json::json!(["ubuntu1"]));
    assert_eq!(json["filter"], serde_json::json!(["net", "vsock"]));

    let mut cmd = vmmirror_bin(home.path());
    let output = remote_args(&mut cmd, &server).arg("list").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines, vec!["alpine", "ubuntu1"]);
}

#[test]
fn cli_index_dumps_resources_and_capabilities() {
    let (server, _dir) = seeded_server();
    let home = tempfile::tempdir().unwrap();
    let mut cmd = vmmirror_bin(home.path());
    let output = remote_args(&mut cmd, &server)
        .args(["--json", "index"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(
        json["resources_by_image"]["alpine"],
        serde_json::json!([
            "fsfiles/",
            "fsfiles/alpine-rootfs.ext4",
            "fsfiles/alpine.id_rsa",
            "kernel/",
            "kernel/vmlinux.bin",
        ])
    );
    assert_eq!(
        json["images_by_capability"]["vsock"],
        serde_json::json!(["ubuntu1"])
    );

    let mut cmd = vmmirror_bin(home.path());
    let output = remote_args(&mut cmd, &server).arg("index").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ubuntu1 (5 resources)"), "{stdout}");
}

#[test]
fn cli_verbose_logs_resolved_remote() {
    let (server, _dir) = seeded_server();
    let home = tempfile::tempdir().unwrap();
    let mut cmd = vmmirror_bin(home.path());
    let output = remote_args(&mut cmd, &server)
        .args(["-v", "capabilities"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains(&format!("remote {} bucket '{BUCKET}'", server.url)),
        "{stderr}"
    );
}

#[test]
fn cli_list_unknown_capability_is_empty_not_error() {
    let (server, _dir) = seeded_server();
    let home = tempfile::tempdir().unwrap();
    let mut cmd = vmmirror_bin(home.path());
    let output = remote_args(&mut cmd, &server)
        .args(["--json", "list", "--capability", "gpu"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["images"], serde_json::json!([]));
}

#[test]
fn cli_fetch_populates_slot() {
    let (server, _dir) = seeded_server();
    let home = tempfile::tempdir().unwrap();
    let session = tempfile::tempdir().unwrap();
    let slot = session.path().join("slot0");

    let mut cmd = vmmirror_bin(home.path());
    let output = remote_args(&mut cmd, &server)
        .args(["--json", "fetch", "ubuntu1", "--slot"])
        .arg(&slot)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["report"]["image"], "ubuntu1");
    assert_eq!(json["report"]["resources_downloaded"], 3);
    let kernel = json["slot"]["kernel_file"].as_str().unwrap();
    assert_eq!(std::fs::read(kernel).unwrap(), b"kernel");
    assert!(json["slot"]["ssh_config"]["ssh_key_path"].is_string());
    let kinds: Vec<&str> = json["report"]["resources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["rootfs", "ssh_key", "kernel"]);

    assert!(slot.join("kernel/vmlinux.bin").is_file());
    assert!(session
        .path()
        .join("microvm-images/ubuntu1/fsfiles/ubuntu1-rootfs.ext4")
        .is_file());
}

#[test]
fn cli_fetch_uses_local_images_path() {
    let (server, _dir) = seeded_server();
    let home = tempfile::tempdir().unwrap();
    let session = tempfile::tempdir().unwrap();
    let mirror = tempfile::tempdir().unwrap();

    let mut cmd = vmmirror_bin(home.path());
    let output = remote_args(&mut cmd, &server)
        .env("OPT_LOCAL_IMAGES_PATH", mirror.path())
        .args(["fetch", "alpine", "--slot"])
        .arg(session.path().join("slot"))
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(mirror
        .path()
        .join("microvm-images/alpine/kernel/vmlinux.bin")
        .is_file());
    assert!(!session.path().join("microvm-images").exists());
}

#[test]
fn cli_fetch_unknown_image_exits_4() {
    let (server, _dir) = seeded_server();
    let home = tempfile::tempdir().unwrap();
    let session = tempfile::tempdir().unwrap();

    let mut cmd = vmmirror_bin(home.path());
    let output = remote_args(&mut cmd, &server)
        .args(["fetch", "debian", "--slot"])
        .arg(session.path().join("slot"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("image not found"), "{stderr}");
}

#[test]
fn cli_unreachable_remote_exits_3() {
    let home = tempfile::tempdir().unwrap();
    let output = vmmirror_bin(home.path())
        .args(["--remote", "http://127.0.0.1:1", "--bucket", BUCKET, "list"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn cli_without_remote_or_config_exits_1() {
    let home = tempfile::tempdir().unwrap();
    let output = vmmirror_bin(home.path()).arg("capabilities").output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no --remote and no config"), "{stderr}");
}

#[test]
fn cli_reads_remote_config_file() {
    let (server, _dir) = seeded_server();
    let home = tempfile::tempdir().unwrap();
    let config = serde_json::json!({ "url": server.url, "bucket": BUCKET });
    let path = home.path().join(".config/vmmirror/remote.json");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, config.to_string()).unwrap();

    let output = vmmirror_bin(home.path())
        .args(["--json", "list", "-c", "*"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["images"], serde_json::json!(["alpine", "ubuntu1"]));
}

#[test]
fn cli_completions_bash() {
    let home = tempfile::tempdir().unwrap();
    let output = vmmirror_bin(home.path())
        .args(["completions", "bash"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("vmmirror"));
}
