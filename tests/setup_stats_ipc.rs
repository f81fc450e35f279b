use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_tutordashd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn tutordashd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

/// 25 students named "Aluno NN"; the first 12 are active.
fn seed_students(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) {
    for i in 1..=25 {
        let status = if i <= 12 { "Ativo" } else { "Inativo" };
        let _ = request_ok(
            stdin,
            reader,
            &format!("seed-{}", i),
            "records.create",
            json!({
                "entity": "students",
                "fields": { "name": format!("Aluno {:02}", i), "status": status }
            }),
        );
    }
}

#[test]
fn setup_defaults_roundtrip_and_validation() {
    let workspace = temp_dir("tutordash-setup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let before = request(&mut stdin, &mut reader, "1", "setup.get", json!({}));
    assert_eq!(error_code(&before), "no_workspace");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let defaults = request_ok(&mut stdin, &mut reader, "3", "setup.get", json!({}));
    assert_eq!(defaults.pointer("/stats/scope").and_then(|v| v.as_str()), Some("page"));
    assert_eq!(
        defaults.pointer("/export/decimalPlaces").and_then(|v| v.as_i64()),
        Some(2)
    );
    assert_eq!(
        defaults.pointer("/export/fileNamePrefix").and_then(|v| v.as_str()),
        Some("export")
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "stats", "patch": { "scope": "Filtered" } }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "setup.update",
        json!({ "section": "export", "patch": { "decimalPlaces": 1, "fileNamePrefix": " turmas " } }),
    );
    let updated = request_ok(&mut stdin, &mut reader, "6", "setup.get", json!({}));
    assert_eq!(updated.pointer("/stats/scope").and_then(|v| v.as_str()), Some("filtered"));
    assert_eq!(
        updated.pointer("/export/decimalPlaces").and_then(|v| v.as_i64()),
        Some(1)
    );
    assert_eq!(
        updated.pointer("/export/fileNamePrefix").and_then(|v| v.as_str()),
        Some("turmas")
    );

    for (id, section, patch) in [
        ("7", "stats", json!({ "scope": "everything" })),
        ("8", "stats", json!({ "window": 3 })),
        ("9", "export", json!({ "decimalPlaces": 9 })),
        ("10", "export", json!({ "fileNamePrefix": "../escape" })),
        ("11", "export", json!({ "fileNamePrefix": "x".repeat(40) })),
        ("12", "colors", json!({})),
    ] {
        let resp = request(
            &mut stdin,
            &mut reader,
            id,
            "setup.update",
            json!({ "section": section, "patch": patch }),
        );
        assert_eq!(error_code(&resp), "bad_params", "{} {}", section, patch);
    }

    // Rejected patches are not persisted.
    let after = request_ok(&mut stdin, &mut reader, "13", "setup.get", json!({}));
    assert_eq!(after, updated);
}

#[test]
fn filtered_scope_projects_stats_over_every_match() {
    let workspace = temp_dir("tutordash-stats-scope");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_students(&mut stdin, &mut reader);

    let paged = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "screens.open",
        json!({ "entity": "students" }),
    );
    assert_eq!(paged.pointer("/stats/sampleSize").and_then(|v| v.as_i64()), Some(10));
    assert_eq!(paged.pointer("/stats/counts/active").and_then(|v| v.as_i64()), Some(10));
    assert_eq!(paged.pointer("/stats/counts/inactive").and_then(|v| v.as_i64()), Some(0));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "stats", "patch": { "scope": "filtered" } }),
    );
    let screen_id = paged
        .get("screenId")
        .and_then(|v| v.as_str())
        .expect("screenId")
        .to_string();
    let whole = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "screens.retry",
        json!({ "screenId": screen_id }),
    );
    assert_eq!(whole.pointer("/result/rows").and_then(|v| v.as_array()).map(|r| r.len()), Some(10));
    assert_eq!(whole.pointer("/stats/scope").and_then(|v| v.as_str()), Some("filtered"));
    assert_eq!(whole.pointer("/stats/sampleSize").and_then(|v| v.as_i64()), Some(25));
    assert_eq!(whole.pointer("/stats/counts/active").and_then(|v| v.as_i64()), Some(12));
    assert_eq!(whole.pointer("/stats/counts/inactive").and_then(|v| v.as_i64()), Some(13));
    assert_eq!(
        whole.pointer("/stats/ratios/activePercent").and_then(|v| v.as_f64()),
        Some(48.0)
    );
}
