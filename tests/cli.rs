//! End-to-end driver tests: run the binary against real files.

use std::fs;
use std::process::Command;

fn bslc() -> Command {
    Command::new(env!("CARGO_BIN_EXE_bslc"))
}

#[test]
fn converts_a_shader_and_writes_all_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("basic.bsl");
    fs::write(
        &input,
        "void helper(float &value)\n{\n  value = 1.0f;\n}\n",
    )
    .unwrap();

    let output = dir.path().join("basic.out");
    let metadata = dir.path().join("basic.metadata");
    let infos = dir.path().join("basic.infos");

    let status = bslc()
        .arg(&input)
        .arg(&output)
        .arg(&metadata)
        .arg(&infos)
        .status()
        .unwrap();
    assert!(status.success());

    let out = fs::read_to_string(&output).unwrap();
    assert!(out.starts_with("#line 1 \"basic.bsl\"\n"), "{out}");
    assert!(out.contains("_ref(float ,value)"), "{out}");

    let metadata_text = fs::read_to_string(&metadata).unwrap();
    assert!(metadata_text.contains("static void basic_metadata_register("), "{metadata_text}");

    // JSON sidecar parses back.
    let json = fs::read_to_string(dir.path().join("basic.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert!(value.get("dependencies").is_some());

    let infos_text = fs::read_to_string(&infos).unwrap();
    assert!(infos_text.starts_with("#pragma once"), "{infos_text}");
}

#[test]
fn include_dependencies_resolve_symbols() {
    let dir = tempfile::tempdir().unwrap();
    let lib = dir.path().join("helpers_lib.hh");
    fs::write(
        &lib,
        "namespace util {\nvoid fill(float &value)\n{\n  value = 0.0f;\n}\n}\n",
    )
    .unwrap();

    let input = dir.path().join("main.bsl");
    fs::write(
        &input,
        "#include \"helpers_lib.hh\"\nnamespace util {\nvoid run()\n{\n  float v;\n  fill(v);\n}\n}\n",
    )
    .unwrap();

    let output = dir.path().join("main.out");
    let status = bslc()
        .arg(&input)
        .arg(&output)
        .arg(dir.path().join("main.metadata"))
        .arg(dir.path().join("main.infos"))
        .arg(dir.path())
        .status()
        .unwrap();
    assert!(status.success());

    let out = fs::read_to_string(&output).unwrap();
    // The dependency's symbol resolved and the namespace collapsed.
    assert!(out.contains("util_fill"), "{out}");
}

#[test]
fn structural_error_exits_nonzero_with_empty_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("broken.bsl");
    fs::write(&input, "void fn()\n{\n").unwrap();

    let output = dir.path().join("broken.out");
    let result = bslc()
        .arg(&input)
        .arg(&output)
        .arg(dir.path().join("broken.metadata"))
        .arg(dir.path().join("broken.infos"))
        .output()
        .unwrap();
    assert!(!result.status.success());
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains("Unterminated scope"), "{stderr}");

    let out = fs::read_to_string(&output).unwrap();
    assert_eq!(out, "#line 1 \"broken.bsl\"\n");
}

#[test]
fn unknown_extension_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("file.txt");
    fs::write(&input, "int a;\n").unwrap();

    let status = bslc()
        .arg(&input)
        .arg(dir.path().join("o"))
        .arg(dir.path().join("m"))
        .arg(dir.path().join("i"))
        .status()
        .unwrap();
    assert!(!status.success());
}
