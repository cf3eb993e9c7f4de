use std::net::TcpListener;
use std::process::Command;

#[test]
fn test_server_exits_non_zero_when_bind_fails() {
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();
    let dir = tempfile::tempdir().unwrap();

    let status = Command::new(env!("CARGO_BIN_EXE_livelog"))
        .arg("server")
        .current_dir(dir.path())
        .env("LIVELOG__SERVER__RELAY_PORT", port.to_string())
        .env("LIVELOG__SERVER__INGEST_PORT", "0")
        .env("LIVELOG__SERVER__GATEWAY_PORT", "0")
        .status()
        .unwrap();

    assert!(!status.success());
    assert_eq!(status.code(), Some(1));
}

#[test]
fn test_invalid_configuration_exits_non_zero() {
    let dir = tempfile::tempdir().unwrap();

    let status = Command::new(env!("CARGO_BIN_EXE_livelog"))
        .args(["token", "--subscription", "s1", "--boundary", "b1", "--function", "f1", "--force"])
        .current_dir(dir.path())
        .env("LIVELOG__GATEWAY__KEEP_ALIVE_MS", "0")
        .status()
        .unwrap();

    assert_eq!(status.code(), Some(1));
}
