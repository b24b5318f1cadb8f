//! Integration tests for the vigil CLI

use assert_cmd::cargo;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command for the vigil binary
fn vigil() -> Command {
    Command::new(cargo::cargo_bin!("vigil"))
}

/// Whether a python3 interpreter is reachable; sweep tests need one.
fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .is_ok()
}

/// A project with one root module and two test files: `test_a` passes,
/// `test_b` has one failure.
fn fixture_project() -> TempDir {
    let temp = TempDir::new().unwrap();
    std::fs::write(
        temp.path().join("mathlib.py"),
        "def add(a, b):\n    return a + b\n\ndef sub(a, b):\n    return a + b\n",
    )
    .unwrap();

    let tests = temp.path().join("tests");
    std::fs::create_dir(&tests).unwrap();
    std::fs::write(
        tests.join("test_a.py"),
        "\
import unittest
from mathlib import add

class TestAdd(unittest.TestCase):
    def test_add_small(self):
        self.assertEqual(add(1, 2), 3)

    def test_add_zero(self):
        self.assertEqual(add(0, 0), 0)
",
    )
    .unwrap();
    std::fs::write(
        tests.join("test_b.py"),
        "\
import unittest
from mathlib import sub

class TestSub(unittest.TestCase):
    def test_sub_breaks(self):
        self.assertEqual(sub(5, 3), 2)

    def test_sub_trivial(self):
        self.assertEqual(sub(0, 0), 0)
",
    )
    .unwrap();
    temp
}

#[test]
fn test_help() {
    vigil()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Continuous test-watch dashboard"));
}

#[test]
fn test_version() {
    vigil()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_status_without_any_run() {
    let temp = TempDir::new().unwrap();

    vigil()
        .arg("--project")
        .arg(temp.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No persisted state"));
}

#[test]
fn test_clean_with_nothing_to_clean() {
    let temp = TempDir::new().unwrap();

    vigil()
        .arg("--project")
        .arg(temp.path())
        .arg("clean")
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to clean"));
}

#[test]
fn test_missing_project_dir_fails() {
    vigil()
        .arg("--project")
        .arg("/definitely/not/a/path")
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_run_all_reports_every_file() {
    if !python_available() {
        return;
    }
    let temp = fixture_project();

    vigil()
        .arg("--project")
        .arg(temp.path())
        .arg("run")
        .arg("-a")
        .assert()
        .success()
        .stdout(predicate::str::contains("test_a"))
        .stdout(predicate::str::contains("test_b"))
        .stdout(predicate::str::contains("test_sub_breaks"))
        .stdout(predicate::str::contains("FIRST FAILURE"));

    // Completed runs persist state into the scratch directory.
    let status = std::fs::read_to_string(temp.path().join("_vigil_/.status")).unwrap();
    assert!(status.contains("test_a::test_add_small=pass"));
    assert!(status.contains("test_b::test_sub_breaks=fail"));

    let outcomes = std::fs::read_to_string(temp.path().join("_vigil_/.failed_files")).unwrap();
    assert_eq!(outcomes, "test_b=1\n");
}

#[test]
fn test_stop_on_first_failure_skips_later_files() {
    if !python_available() {
        return;
    }
    let temp = fixture_project();
    // A file sorting after test_b; it must not execute under the default
    // stop-on-first-failure policy.
    std::fs::write(
        temp.path().join("tests/test_c.py"),
        "\
import unittest

class TestC(unittest.TestCase):
    def test_never_reached(self):
        self.assertTrue(True)
",
    )
    .unwrap();

    vigil()
        .arg("--project")
        .arg(temp.path())
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("test_sub_breaks"))
        .stdout(predicate::str::contains("test_never_reached").not());

    let status = std::fs::read_to_string(temp.path().join("_vigil_/.status")).unwrap();
    assert!(!status.contains("test_never_reached"));
}

#[test]
fn test_failed_only_rerun_covers_only_failing_file() {
    if !python_available() {
        return;
    }
    let temp = fixture_project();

    vigil()
        .arg("--project")
        .arg(temp.path())
        .arg("run")
        .arg("-a")
        .assert()
        .success();

    // Fix the bug, then rerun only what failed.
    std::fs::write(
        temp.path().join("mathlib.py"),
        "def add(a, b):\n    return a + b\n\ndef sub(a, b):\n    return a - b\n",
    )
    .unwrap();

    vigil()
        .arg("--project")
        .arg(temp.path())
        .arg("run")
        .arg("-a")
        .arg("-f")
        .assert()
        .success()
        .stdout(predicate::str::contains("test_b"))
        .stdout(predicate::str::contains("test_add_small").not());

    // The fixed test clears the file outcome; untouched statuses carry over.
    let outcomes = std::fs::read_to_string(temp.path().join("_vigil_/.failed_files")).unwrap();
    assert_eq!(outcomes, "");
    let status = std::fs::read_to_string(temp.path().join("_vigil_/.status")).unwrap();
    assert!(status.contains("test_a::test_add_small=pass"));
    assert!(status.contains("test_b::test_sub_breaks=pass"));
}

#[test]
fn test_syntax_error_blocks_run_and_preserves_state() {
    if !python_available() {
        return;
    }
    let temp = fixture_project();

    vigil()
        .arg("--project")
        .arg(temp.path())
        .arg("run")
        .arg("-a")
        .assert()
        .success();
    let before = std::fs::read_to_string(temp.path().join("_vigil_/.status")).unwrap();

    std::fs::write(
        temp.path().join("tests/test_a.py"),
        "import unittest\n\nclass Broken(unittest.TestCase:\n    pass\n",
    )
    .unwrap();

    vigil()
        .arg("--project")
        .arg(temp.path())
        .arg("run")
        .arg("-a")
        .assert()
        .success()
        .stdout(predicate::str::contains("SYNTAX ERROR"));

    // The blocked run committed nothing.
    let after = std::fs::read_to_string(temp.path().join("_vigil_/.status")).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_crash_aborts_run_and_preserves_state() {
    if !python_available() {
        return;
    }
    let temp = fixture_project();

    vigil()
        .arg("--project")
        .arg(temp.path())
        .arg("run")
        .arg("-a")
        .assert()
        .success();
    let before = std::fs::read_to_string(temp.path().join("_vigil_/.status")).unwrap();

    // Valid syntax, but the import explodes before any test can run: the
    // harness emits zero recognized events plus a traceback.
    std::fs::write(
        temp.path().join("tests/test_a.py"),
        "import module_that_does_not_exist_anywhere\n",
    )
    .unwrap();

    vigil()
        .arg("--project")
        .arg(temp.path())
        .arg("run")
        .arg("-a")
        .assert()
        .success()
        .stdout(predicate::str::contains("CRASH"))
        .stdout(predicate::str::contains("test_a"));

    // The crashed run committed nothing; the snapshot is byte-identical.
    let after = std::fs::read_to_string(temp.path().join("_vigil_/.status")).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_status_json_after_run() {
    if !python_available() {
        return;
    }
    let temp = fixture_project();

    vigil()
        .arg("--project")
        .arg(temp.path())
        .arg("run")
        .arg("-a")
        .assert()
        .success();

    vigil()
        .arg("--project")
        .arg(temp.path())
        .arg("status")
        .arg("--json")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"test_b::test_sub_breaks\": \"fail\""))
        .stdout(predicate::str::contains("\"failed_files\""));
}

#[test]
fn test_clean_removes_scratch_dir() {
    if !python_available() {
        return;
    }
    let temp = fixture_project();

    vigil()
        .arg("--project")
        .arg(temp.path())
        .arg("run")
        .arg("-a")
        .assert()
        .success();
    assert!(temp.path().join("_vigil_").exists());

    vigil()
        .arg("--project")
        .arg(temp.path())
        .arg("clean")
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed"));
    assert!(!temp.path().join("_vigil_").exists());
}
