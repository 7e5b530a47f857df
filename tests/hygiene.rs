//! Scans `src/` for panics and silently dropped errors.
//!
//! Each pattern has a budget. Session code must fail closed through `Result`,
//! never by crashing the host, so the panic budgets are zero. The `.ok()`
//! budget covers optional environment reads that fall back to defaults.
//! Budgets only ever go down.

use std::fs;
use std::path::{Path, PathBuf};

struct Budget {
    pattern: &'static str,
    max: usize,
}

const BUDGETS: &[Budget] = &[
    Budget { pattern: ".unwrap()", max: 0 },
    Budget { pattern: ".expect(", max: 0 },
    Budget { pattern: "panic!(", max: 0 },
    Budget { pattern: "unreachable!(", max: 0 },
    Budget { pattern: "todo!(", max: 0 },
    Budget { pattern: "unimplemented!(", max: 0 },
    Budget { pattern: "let _ =", max: 0 },
    Budget { pattern: ".ok()", max: 6 },
    Budget { pattern: "#[allow(dead_code)]", max: 0 },
];

/// Production sources; `*_test.rs` and the unit-test support module are skipped.
fn production_sources() -> Vec<(PathBuf, String)> {
    let mut out = Vec::new();
    walk(Path::new("src"), &mut out);
    out
}

fn walk(dir: &Path, out: &mut Vec<(PathBuf, String)>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for path in entries.flatten().map(|e| e.path()) {
        if path.is_dir() {
            walk(&path, out);
            continue;
        }
        let name = path.file_name().unwrap_or_default().to_string_lossy().into_owned();
        let is_test = name.ends_with("_test.rs") || name == "test_support.rs";
        if !name.ends_with(".rs") || is_test {
            continue;
        }
        if let Ok(content) = fs::read_to_string(&path) {
            out.push((path, content));
        }
    }
}

#[test]
fn sources_are_found() {
    let files = production_sources();
    assert!(files.iter().any(|(p, _)| p.ends_with("session.rs")), "run from the crate root");
}

#[test]
fn pattern_budgets_hold() {
    let files = production_sources();
    let mut failures = Vec::new();

    for budget in BUDGETS {
        let hits: Vec<String> = files
            .iter()
            .filter_map(|(path, content)| {
                let count = content.lines().filter(|l| l.contains(budget.pattern)).count();
                (count > 0).then(|| format!("  {}: {count}", path.display()))
            })
            .collect();
        let total: usize = files
            .iter()
            .map(|(_, content)| content.lines().filter(|l| l.contains(budget.pattern)).count())
            .sum();
        if total > budget.max {
            failures.push(format!(
                "`{}` budget exceeded: found {total}, max {}\n{}",
                budget.pattern,
                budget.max,
                hits.join("\n")
            ));
        }
    }

    assert!(failures.is_empty(), "{}", failures.join("\n"));
}
