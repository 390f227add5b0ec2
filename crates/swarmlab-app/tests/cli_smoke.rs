use std::fs;
use std::process::Command;

fn swarmlab() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_swarmlab"));
    cmd.env("RUST_LOG", "off");
    cmd
}

#[test]
fn village_headless_smoke() {
    let output = swarmlab()
        .args(["village", "--seed", "3", "--ticks", "20"])
        .output()
        .expect("failed to run swarmlab binary");
    assert!(output.status.success(), "village run failed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("village finished at tick 20"));
    assert!(stdout.contains("lycanthropes"));
}

#[test]
fn demining_exports_reporters_and_frames() {
    let dir = tempfile::tempdir().expect("tempdir");
    let csv = dir.path().join("demining.csv");
    let frames = dir.path().join("frames.jsonl");
    let status = swarmlab()
        .args(["demining", "--seed", "11", "--ticks", "15"])
        .arg("--csv")
        .arg(&csv)
        .arg("--frames")
        .arg(&frames)
        .status()
        .expect("failed to run swarmlab binary");
    assert!(status.success(), "demining run failed");

    let table = fs::read_to_string(&csv).expect("csv");
    let header = table.lines().next().expect("header");
    assert!(header.starts_with("tick,"));
    assert!(header.contains("defused_mines"));

    let frames = fs::read_to_string(&frames).expect("frames");
    let first = frames.lines().next().expect("first frame");
    let value: serde_json::Value = serde_json::from_str(first).expect("json frame");
    assert_eq!(value["tick"], 0);
}

#[test]
fn threaded_auction_smoke() {
    let output = swarmlab()
        .args(["auction", "--threaded", "--first-price", "--seed", "9"])
        .output()
        .expect("failed to run swarmlab binary");
    assert!(output.status.success(), "auction run failed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("FirstPrice auction over 150 goods"));
    assert!(stdout.contains("target_agent"));
}

#[test]
fn invalid_config_fails_cleanly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = dir.path().join("ocean.json");
    fs::write(&config, r#"{ "width": -1.0 }"#).expect("write");
    let status = swarmlab()
        .arg("ocean")
        .arg("--config")
        .arg(&config)
        .status()
        .expect("failed to run swarmlab binary");
    assert!(!status.success());
}
