//! Integration Test: Blocking Sleep Prohibition
//!
//! **Policy**: Production code in the streaming core MUST NOT call
//! `std::thread::sleep`. The pipeline is async end to end; a blocking sleep
//! stalls an executor thread and with it every stream scheduled on it.
//! Waiting happens on async timers or on I/O.
//!
//! **Exceptions**: Test code (trailing `#[cfg(test)]` modules and `tests/`
//! trees are not scanned).

use std::fs;
use std::path::{Path, PathBuf};

/// Test that production code does not contain blocking sleep calls
#[test]
fn test_no_blocking_sleep_in_production_code() {
    let violations = find_blocking_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking sleep calls found in production code!");

        for violation in &violations {
            eprintln!("  ❌ {}", violation);
        }

        eprintln!("\n✅ ACCEPTABLE ways to wait:");
        eprintln!("  - tokio::time::sleep / sleep_until (async timers)");
        eprintln!("  - tokio::time::timeout around a producer pull");
        eprintln!("  - Awaiting channels, sockets, or notify handles");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - std::thread::sleep anywhere outside test code");

        panic!(
            "\nFound {} blocking sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Find all blocking sleep calls in production code
fn find_blocking_sleep_violations() -> Vec<String> {
    let mut violations = Vec::new();
    check_directory(&workspace_root().join("conduit/core/src"), &mut violations);
    violations
}

/// Resolve the workspace root from this package's manifest directory
fn workspace_root() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // <root>/tests/architectural-enforcement -> <root>
    manifest
        .ancestors()
        .nth(2)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| manifest.to_path_buf())
}

fn check_directory(path: &Path, violations: &mut Vec<String>) {
    assert!(
        path.exists(),
        "scanned directory {} is missing; the enforcement test is scanning the wrong tree",
        path.display()
    );

    for entry in walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
            check_file(entry.path(), violations);
        }
    }
}

fn check_file(path: &Path, violations: &mut Vec<String>) {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for (idx, line) in production_lines(&content).iter().enumerate() {
        let line_number = idx + 1;

        // Skip comments
        let code_part = line.split("//").next().unwrap_or(line);

        if code_part.contains("thread::sleep(") {
            violations.push(format!(
                "{}:{} - {}",
                path.display(),
                line_number,
                line.trim()
            ));
        }
    }
}

/// Lines before the file's trailing `#[cfg(test)]` module
///
/// Production sources in this workspace keep their unit tests in one
/// trailing test module, so everything after the marker is test code.
fn production_lines(content: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    for line in content.lines() {
        if line.trim_start().starts_with("#[cfg(test)]") {
            break;
        }
        lines.push(line);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_flags_blocking_sleep() {
        let source = "fn bad_wait() {\n    std::thread::sleep(Duration::from_millis(10));\n}\n";
        let lines = production_lines(source);
        assert!(
            lines.iter().any(|l| l.contains("thread::sleep(")),
            "detector must see the blocking sleep"
        );
    }

    #[test]
    fn test_detector_stops_at_test_module() {
        let source = "fn fine() {}\n\n#[cfg(test)]\nmod tests {\n    fn helper() {\n        std::thread::sleep(Duration::from_millis(1));\n    }\n}\n";
        let lines = production_lines(source);
        assert!(
            !lines.iter().any(|l| l.contains("thread::sleep(")),
            "sleeps inside the trailing test module are out of scope"
        );
        assert_eq!(lines.len(), 2, "scan must end at the #[cfg(test)] marker");
    }

    #[test]
    fn test_detector_ignores_comments() {
        let line = "    // never call thread::sleep( here";
        let code_part = line.split("//").next().unwrap_or(line);
        assert!(!code_part.contains("thread::sleep("));
    }
}
