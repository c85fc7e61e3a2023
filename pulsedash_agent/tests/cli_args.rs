//! CLI and startup-configuration tests for the pulsedash agent binary.
use assert_cmd::Command;

fn agent() -> Command {
    let mut cmd = Command::cargo_bin("pulsedash_agent").expect("agent binary");
    cmd.env_remove("PULSEDASH_PORT").env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_prints_usage_and_exits_zero() {
    let out = agent().arg("--help").output().expect("run agent");
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Usage:"), "{stdout}");
    assert!(stdout.contains("--refresh-ms"));
    assert!(stdout.contains("PULSEDASH_NET_FILTER"));
}

#[test]
fn short_help_flag_is_accepted() {
    agent().arg("-h").assert().success();
}

#[test]
fn unparsable_interval_fails_before_binding() {
    let out = agent()
        .env("PULSEDASH_REFRESH_MS", "abc")
        .output()
        .expect("run agent");
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("PULSEDASH_REFRESH_MS"), "{stderr}");
}

#[test]
fn zero_capacity_is_rejected() {
    let out = agent()
        .env("PULSEDASH_CLIENT_BUFFER", "0")
        .output()
        .expect("run agent");
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("PULSEDASH_CLIENT_BUFFER"), "{stderr}");
}

#[test]
fn unknown_flag_is_rejected() {
    let out = agent().arg("--enableSSL").output().expect("run agent");
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("--enableSSL"), "{stderr}");
}

#[test]
fn bad_port_is_rejected() {
    agent().args(["--port", "notaport"]).assert().failure();
    agent().args(["-p"]).assert().failure();
}
