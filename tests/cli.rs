//! Command-line behaviour of the `pyground` binary

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::NamedTempFile;

fn pyground() -> Command {
    let mut cmd = Command::cargo_bin("pyground").unwrap();
    for var in ["PYGROUND_TIMEOUT_MS", "PYGROUND_RECURSION_LIMIT", "PYGROUND_MAX_OUTPUT", "RUST_LOG"] {
        cmd.env_remove(var);
    }
    cmd
}

fn program(source: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(source.as_bytes()).unwrap();
    file
}

#[test]
fn test_run_grading_program() {
    pyground()
        .args(["run", "tests/programs/grading.py", "--stdin", "86"])
        .assert()
        .success()
        .stdout("B\n")
        .stderr("");
}

#[test]
fn test_run_with_stdin_file() {
    let input = program("1900\n");
    pyground()
        .args(["run", "tests/programs/leap_year.py", "--stdin-file"])
        .arg(input.path())
        .assert()
        .success()
        .stdout("Not Leap Year\n");
}

#[test]
fn test_run_program_from_stdin() {
    pyground()
        .args(["run", "-", "--stdin", "3"])
        .write_stdin("n = int(input())\nprint(n * n)\n")
        .assert()
        .success()
        .stdout("9\n");
}

#[test]
fn test_fault_exits_with_one() {
    let file = program("print('partial')\nprint(undefined_name)\n");
    pyground()
        .arg("run")
        .arg(file.path())
        .assert()
        .code(1)
        .stdout("partial\n")
        .stderr(predicate::str::ends_with(
            "NameError: name 'undefined_name' is not defined\n",
        ));
}

#[test]
fn test_system_exit_is_a_name_error() {
    let file = program("raise SystemExit('bye')\n");
    pyground()
        .arg("run")
        .arg(file.path())
        .assert()
        .code(1)
        .stdout("")
        .stderr(predicate::str::ends_with(
            "NameError: name 'SystemExit' is not defined\n",
        ));
}

#[test]
fn test_timeout_exit_code() {
    let file = program("while True:\n    pass\n");
    pyground()
        .args(["--timeout-ms", "200", "run"])
        .arg(file.path())
        .assert()
        .code(124)
        .stderr(predicate::str::contains("TimeoutError: execution exceeded the time limit of 200ms"));
}

#[test]
fn test_timeout_from_environment() {
    let file = program("while True:\n    pass\n");
    pyground()
        .env("PYGROUND_TIMEOUT_MS", "150")
        .arg("run")
        .arg(file.path())
        .assert()
        .code(124);
}

#[test]
fn test_json_report() {
    let file = program("print(input())\n");
    pyground()
        .args(["--json", "run", "--stdin", "hello"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"outcome\": \"completed\""))
        .stdout(predicate::str::contains("\"stdout\": \"hello\\n\""));
}

#[test]
fn test_missing_file() {
    pyground()
        .args(["run", "no/such/program.py"])
        .assert()
        .code(1)
        .stderr(predicate::str::starts_with("Error: failed to read program no/such/program.py"));
}

#[test]
fn test_check_reports_issues() {
    let file = program("import math\nprint(math.pi, open)\n");
    pyground()
        .arg("check")
        .arg(file.path())
        .assert()
        .code(1)
        .stdout(predicate::str::contains(
            "ERROR (line 1): import of 'math' is not available in the sandbox",
        ));
}

#[test]
fn test_check_clean_program() {
    pyground()
        .args(["check", "tests/programs/grading.py"])
        .assert()
        .success()
        .stdout("No issues found\n");
}

#[test]
fn test_check_syntax_error() {
    let file = program("print('a'\n");
    pyground()
        .arg("check")
        .arg(file.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("SyntaxError"));
}

#[test]
fn test_builtins_listing() {
    pyground()
        .args(["--json", "builtins"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"isinstance\""))
        .stdout(predicate::str::contains("\"EOFError\""))
        .stdout(predicate::str::contains("\"open\"").not());
}
