//! Integration Test: Unwrap Prohibition
//!
//! **Policy**: Production code in the streaming core MUST NOT call
//! `.unwrap()` or `.expect()`. A failure belongs to the stream that caused
//! it and travels as a `Result`; a panic inside the pipeline takes down
//! every stream in the process.
//!
//! **Exceptions**:
//! - Test code (trailing `#[cfg(test)]` modules and `tests/` trees)
//! - `Lazy` static initializers for literal regex patterns, which are
//!   covered by the filter's unit tests

use std::fs;
use std::path::{Path, PathBuf};

/// How many lines above an unwrap to look for a `Lazy::new(` opener
const STATIC_INIT_LOOKBACK: usize = 4;

/// Test that production code does not panic through unwrap or expect
#[test]
fn test_no_unwrap_in_production_code() {
    let violations = find_unwrap_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: unwrap/expect found in production code!");

        for violation in &violations {
            eprintln!("  ❌ {}", violation);
        }

        eprintln!("\n✅ ACCEPTABLE alternatives:");
        eprintln!("  - Propagate with `?` and a typed error");
        eprintln!("  - unwrap_or / unwrap_or_else / unwrap_or_default");
        eprintln!("  - match or if-let with an explicit fallback");
        eprintln!("\n✅ ACCEPTABLE exceptions:");
        eprintln!("  - Literal regex patterns inside Lazy static initializers");
        eprintln!("  - Test code");

        panic!(
            "\nFound {} unwrap/expect violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Find all unwrap/expect calls in production code
fn find_unwrap_violations() -> Vec<String> {
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

    let lines = production_lines(&content);

    for (idx, line) in lines.iter().enumerate() {
        let line_number = idx + 1;

        // Skip comments
        let code_part = line.split("//").next().unwrap_or(line);

        if code_part.contains(".unwrap(") || code_part.contains(".expect(") {
            if is_static_initializer_context(&lines, idx) {
                continue;
            }

            violations.push(format!(
                "{}:{} - {}",
                path.display(),
                line_number,
                line.trim()
            ));
        }
    }
}

/// Check if an unwrap sits inside a `Lazy` static initializer
fn is_static_initializer_context(lines: &[&str], current_idx: usize) -> bool {
    let start = current_idx.saturating_sub(STATIC_INIT_LOOKBACK);
    lines[start..=current_idx]
        .iter()
        .any(|line| line.contains("Lazy::new("))
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
    fn test_detector_flags_unwrap_and_expect() {
        let lines = vec![
            "fn load() {",
            "    let value = risky().unwrap();",
            "    let other = risky().expect(\"should work\");",
            "}",
        ];
        assert!(lines[1].contains(".unwrap("));
        assert!(lines[2].contains(".expect("));
        assert!(
            !is_static_initializer_context(&lines, 1),
            "plain unwrap has no static-initializer excuse"
        );
    }

    #[test]
    fn test_detector_ignores_fallback_variants() {
        let fallback = "    let port = raw.parse().unwrap_or(8080);";
        assert!(
            !fallback.contains(".unwrap(") && !fallback.contains(".expect("),
            "unwrap_or is a fallback, not a panic"
        );

        let lazy_else = "    let cap = hint.unwrap_or_else(default_capacity);";
        assert!(!lazy_else.contains(".unwrap("));
    }

    #[test]
    fn test_detector_allows_lazy_regex_initializers() {
        let same_line = vec![r#"static P: Lazy<Regex> = Lazy::new(|| Regex::new("x").unwrap());"#];
        assert!(is_static_initializer_context(&same_line, 0));

        let block_form = vec![
            "static P: Lazy<Regex> = Lazy::new(|| {",
            r#"    Regex::new("(?i)x").unwrap()"#,
            "});",
        ];
        assert!(is_static_initializer_context(&block_form, 1));
    }

    #[test]
    fn test_detector_stops_at_test_module() {
        let source =
            "fn fine() {}\n\n#[cfg(test)]\nmod tests {\n    fn t() { x().unwrap(); }\n}\n";
        let lines = production_lines(source);
        assert!(!lines.iter().any(|l| l.contains(".unwrap(")));
    }
}
