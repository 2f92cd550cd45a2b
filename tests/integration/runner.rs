//! tokio_workers binary end to end

use serde_json::json;

use crate::helpers::run_binary;

const INPUT: &str = r#"{"a":1}
not json

{"fail":"bad input"}
[1,2,3]
"#;

fn assert_results(results: &[serde_json::Value]) {
    assert_eq!(results.len(), 4);
    assert_eq!(results[0], json!({ "ok": { "a": 1 } }));
    assert!(results[1]["error"]
        .as_str()
        .unwrap()
        .starts_with("invalid JSON"));
    assert_eq!(results[2], json!({ "error": "execution error: bad input" }));
    assert_eq!(results[3], json!({ "ok": [1, 2, 3] }));
}

#[test]
fn test_thread_backend_results_in_input_order() {
    let results = run_binary(
        &[
            ("POOL_BACKEND", "thread"),
            ("POOL_WORKERS", "2"),
            ("POOL_OVERSUBSCRIBE", "1"),
        ],
        INPUT,
    );
    assert_results(&results);
}

#[test]
fn test_process_backend_results_in_input_order() {
    let results = run_binary(
        &[
            ("POOL_BACKEND", "process"),
            ("POOL_WORKERS", "2"),
            ("POOL_OVERSUBSCRIBE", "1"),
            ("WORKER_PROGRAM", env!("CARGO_BIN_EXE_echo_worker")),
        ],
        INPUT,
    );
    assert_results(&results);
}

#[test]
fn test_process_backend_requires_program() {
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_tokio_workers"))
        .env("POOL_BACKEND", "process")
        .env_remove("WORKER_PROGRAM")
        .stdin(std::process::Stdio::null())
        .output()
        .expect("Failed to run tokio_workers");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("WORKER_PROGRAM"), "stderr: {}", stderr);
}
