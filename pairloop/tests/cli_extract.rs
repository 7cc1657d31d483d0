//! CLI tests for `pairloop extract` and `pairloop init`.
//!
//! Spawns the pairloop binary and checks output and exit codes.

use std::io::Write;
use std::process::{Command, Output, Stdio};

use pairloop::exit_codes;
use pairloop::io::config::{DEFAULT_CONFIG_FILE, PairloopConfig, load_config};

fn pairloop(dir: &std::path::Path, args: &[&str], stdin: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_pairloop"))
        .current_dir(dir)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn pairloop");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(stdin.as_bytes())
        .expect("write stdin");
    child.wait_with_output().expect("pairloop output")
}

#[test]
fn extract_prints_first_block() {
    let temp = tempfile::tempdir().expect("tempdir");
    let text = "Plan:\n```r\nx <- read.csv('dsc.csv')\nmean(x$aorta)\n```\n```r\nignored\n```\n";

    let output = pairloop(temp.path(), &["extract"], text);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "x <- read.csv('dsc.csv')\nmean(x$aorta)\n"
    );
}

#[test]
fn extract_without_block_exits_with_no_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = pairloop(temp.path(), &["extract"], "no code here\n```\n");
    assert_eq!(output.status.code(), Some(exit_codes::NO_CODE));
    assert!(output.stdout.is_empty());
}

#[test]
fn init_writes_default_config_and_refuses_to_overwrite() {
    let temp = tempfile::tempdir().expect("tempdir");

    let first = pairloop(temp.path(), &["init"], "");
    assert_eq!(first.status.code(), Some(exit_codes::OK));
    let path = temp.path().join(DEFAULT_CONFIG_FILE);
    assert_eq!(load_config(&path).expect("load"), PairloopConfig::default());

    let second = pairloop(temp.path(), &["init"], "");
    assert_eq!(second.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&second.stderr).contains("already exists"));

    let forced = pairloop(temp.path(), &["init", "--force"], "");
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
}

#[test]
fn extract_honors_configured_fence() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        temp.path().join("py.toml"),
        "[agents]\nlanguage = \"Python\"\nfence_open = \"```python\"\n",
    )
    .expect("write config");

    let output = pairloop(
        temp.path(),
        &["extract", "--config", "py.toml"],
        "```r\nr_code()\n```\n```python\nprint(1)\n```\n",
    );
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "print(1)\n");
}

#[test]
fn run_without_task_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = pairloop(temp.path(), &["run"], "");
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no task given"));
}
