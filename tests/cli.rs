use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn snapfeed(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_snapfeed"))
        .args(args)
        .env_remove("SNAPFEED_TOOL")
        .env_remove("SNAPFEED_PROFILE")
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to execute snapfeed")
}

fn setup_upstream(temp_dir: &TempDir, payload: &str) -> (String, String) {
    let upstream = temp_dir.path().join("RKI_COVID19.csv");
    fs::write(&upstream, payload).unwrap();
    let data = temp_dir.path().join("data");
    (
        format!("file://{}", upstream.display()),
        data.to_str().unwrap().to_string(),
    )
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn payload_without_required_string_exits_with_validation_code() {
    let temp_dir = TempDir::new().unwrap();
    let (source, data) = setup_upstream(&temp_dir, "<html>503 Service Unavailable</html>");

    let output = snapfeed(&[
        "fetch",
        &source,
        &data,
        "cases",
        "Meldedatum",
        "--date",
        "2021-03-01",
    ]);

    assert_eq!(output.status.code(), Some(2), "stderr: {}", stderr(&output));
    let data = Path::new(&data);
    let quarantined = fs::read_dir(data)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".scheckfail"))
        .count();
    assert_eq!(quarantined, 1);
    assert!(!data.join("cases-2021-03-01.csv.gz").exists());
    assert!(!data.join("cases.csv.gz").exists());
}

#[test]
fn fetch_seals_snapshot_and_prints_json() {
    let temp_dir = TempDir::new().unwrap();
    let (source, data) = setup_upstream(&temp_dir, "Meldedatum,Faelle\n2021/03/01,12\n");

    let output = snapfeed(&[
        "--json",
        "fetch",
        &source,
        &data,
        "cases",
        "Meldedatum",
        "--date",
        "2021-03-01",
    ]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["current"], "cases-2021-03-01.csv.gz");
    assert!(Path::new(&data).join("cases-2021-03-01.csv.gz").exists());
}

#[cfg(unix)]
#[test]
fn second_run_on_same_snapshot_skips_and_succeeds() {
    let temp_dir = TempDir::new().unwrap();
    let (source, data) = setup_upstream(&temp_dir, "Meldedatum,Faelle\n2021/03/01,12\n");
    let args = [
        "--json",
        "run",
        &source,
        &data,
        "cases",
        "Meldedatum",
        "--date",
        "2021-03-01",
        "--",
        "true",
    ];

    let first = snapfeed(&args);
    assert!(first.status.success(), "stderr: {}", stderr(&first));
    let first: serde_json::Value = serde_json::from_slice(&first.stdout).unwrap();
    assert_eq!(first["gate"]["status"], "ran");

    let second = snapfeed(&args);
    assert_eq!(second.status.code(), Some(0), "stderr: {}", stderr(&second));
    let second: serde_json::Value = serde_json::from_slice(&second.stdout).unwrap();
    assert_eq!(second["gate"]["status"], "skipped");
    assert_eq!(second["gate"]["current"], "cases-2021-03-01.csv.gz");

    let marker = fs::read_to_string(Path::new(&data).join("cases.marker")).unwrap();
    assert_eq!(marker.trim(), "cases-2021-03-01.csv.gz");
}

#[cfg(unix)]
#[test]
fn failing_downstream_command_exits_with_downstream_code() {
    let temp_dir = TempDir::new().unwrap();
    let (source, data) = setup_upstream(&temp_dir, "Meldedatum,Faelle\n2021/03/01,12\n");

    let output = snapfeed(&[
        "run", &source, &data, "cases", "--date", "2021-03-01", "--", "false",
    ]);

    assert_eq!(output.status.code(), Some(5), "stderr: {}", stderr(&output));
    assert!(!Path::new(&data).join("cases.marker").exists());
}

#[test]
fn unknown_flag_is_a_usage_error() {
    let output = snapfeed(&["fetch", "--bogus"]);

    assert_eq!(output.status.code(), Some(64));
    assert!(stderr(&output).contains("--bogus"));
}

#[test]
fn help_exits_successfully() {
    let output = snapfeed(&["--help"]);

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Usage"));
}
