use std::path::Path;
use std::process::Command;

fn write(root: &Path, rel: &str, content: &str) {
    let abs = root.join(rel);
    if let Some(parent) = abs.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(abs, content).unwrap();
}

#[test]
fn index_then_lookup_smoke() {
    // `cargo test` sets this for integration tests.
    let bin = env!("CARGO_BIN_EXE_polysym");

    let workspace = tempfile::TempDir::new().unwrap();
    write(
        workspace.path(),
        "a.go",
        "package main\n\nfunc Foo() {\n\tBar()\n}\n",
    );
    write(workspace.path(), "lib/util.rs", "pub fn bar() { baz(); }\n");

    // index: seed + persist
    let out = Command::new(bin)
        .arg("--target")
        .arg(workspace.path())
        .arg("index")
        .output()
        .expect("spawn polysym index");
    assert!(out.status.success(), "index should exit cleanly");

    let summary: serde_json::Value =
        serde_json::from_slice(&out.stdout).expect("index prints json");
    assert_eq!(summary.get("indexed").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(summary.get("truncated").and_then(|v| v.as_bool()), Some(false));
    assert!(
        workspace.path().join(".polysym/index.psym").is_file(),
        "index file should be persisted"
    );

    // lookup: exact word, served from the persisted index
    let out = Command::new(bin)
        .arg("--target")
        .arg(workspace.path())
        .arg("lookup")
        .arg("Foo")
        .output()
        .expect("spawn polysym lookup");
    assert!(out.status.success());

    let results: serde_json::Value =
        serde_json::from_slice(&out.stdout).expect("lookup prints json");
    let arr = results.as_array().expect("lookup prints an array");
    assert_eq!(arr.len(), 1);
    assert_eq!(arr[0].get("uri").and_then(|v| v.as_str()), Some("a.go"));
    let defs = arr[0]
        .pointer("/info/definitions")
        .and_then(|v| v.as_array())
        .expect("definition kinds");
    assert!(defs.iter().any(|k| k.as_str() == Some("Function")));

    // lookup --prefix: matches across files
    let out = Command::new(bin)
        .arg("--target")
        .arg(workspace.path())
        .arg("lookup")
        .arg("--prefix")
        .arg("ba")
        .output()
        .expect("spawn polysym lookup --prefix");
    assert!(out.status.success());

    let results: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let words: Vec<&str> = results
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r.get("word").and_then(|v| v.as_str()))
        .collect();
    assert!(words.contains(&"bar"), "definition in lib/util.rs");
    assert!(words.contains(&"baz"), "usage in lib/util.rs");
}

#[test]
fn lookup_on_empty_workspace_prints_empty_array() {
    let bin = env!("CARGO_BIN_EXE_polysym");
    let workspace = tempfile::TempDir::new().unwrap();

    let out = Command::new(bin)
        .arg("--target")
        .arg(workspace.path())
        .arg("lookup")
        .arg("anything")
        .output()
        .expect("spawn polysym lookup");
    assert!(out.status.success(), "missing index is not an error");

    let results: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(results, serde_json::json!([]));
}
