use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use tempfile::TempDir;

fn reply(id: &str, parent: Option<&str>, minute: u32) -> Value {
    serde_json::json!({
        "id": id,
        "post_id": "p1",
        "parent_reply_id": parent,
        "author_id": "u1",
        "author_name": "Ada",
        "body": format!("reply {}", id),
        "created_at": format!("2024-05-01T10:{:02}:00Z", minute)
    })
}

#[test]
fn config_init_writes_example_file() {
    let dir = TempDir::new().expect("temp dir");
    let config_path = dir.path().join("threadline.toml");

    let mut cmd = cargo_bin_cmd!("threadline");
    cmd.args(["config", "init", "--path"])
        .arg(&config_path)
        .assert()
        .success();

    let content = fs::read_to_string(&config_path).expect("read config");
    assert!(content.contains("[backend]"));
    assert!(content.contains("allowed_kinds = [\"image\", \"video\"]"));

    let mut again = cargo_bin_cmd!("threadline");
    again
        .args(["config", "init", "--path"])
        .arg(&config_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
}

#[test]
fn config_show_applies_env_overrides() {
    let dir = TempDir::new().expect("temp dir");
    let config_path = dir.path().join("threadline.toml");
    fs::write(&config_path, "[general]\nuser_id = \"ada\"\n").expect("write config");

    let mut cmd = cargo_bin_cmd!("threadline");
    cmd.env("THREADLINE__BACKEND__POLL_INTERVAL_SECS", "42")
        .args(["config", "show", "--config"])
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("user_id = \"ada\""))
        .stdout(predicate::str::contains("poll_interval_secs = 42"));
}

#[test]
fn tree_outputs_entries_in_display_order() {
    let dir = TempDir::new().expect("temp dir");
    let file = dir.path().join("replies.json");
    let replies = serde_json::json!([
        reply("c", Some("a"), 3),
        reply("a", None, 1),
        reply("orphan", Some("missing"), 2),
        reply("b", Some("a"), 2),
    ]);
    fs::write(&file, replies.to_string()).expect("write replies");

    let mut cmd = cargo_bin_cmd!("threadline");
    let output = cmd
        .args(["tree", "--json", "--file"])
        .arg(&file)
        .output()
        .expect("run tree");

    assert!(output.status.success());

    let value: Value = serde_json::from_slice(&output.stdout).expect("valid json");
    assert_eq!(value["count"], 4);
    assert_eq!(value["roots"], 2);

    let shape: Vec<(&str, u64, Option<&str>)> = value["tree"]
        .as_array()
        .expect("tree array")
        .iter()
        .map(|e| {
            (
                e["id"].as_str().expect("id"),
                e["depth"].as_u64().expect("depth"),
                e["tree_parent"].as_str(),
            )
        })
        .collect();
    assert_eq!(
        shape,
        vec![
            ("a", 0, None),
            ("b", 1, Some("a")),
            ("c", 1, Some("a")),
            ("orphan", 0, None),
        ]
    );
    assert_eq!(value["tree"][0]["child_count"], 2);
    assert_eq!(value["tree"][3]["parent_reply_id"], "missing");
}

#[test]
fn tree_json_handles_very_deep_threads() {
    let dir = TempDir::new().expect("temp dir");
    let file = dir.path().join("deep.json");
    let depth = 100_000;
    let replies: Vec<Value> = (0..depth)
        .map(|i| {
            let parent = (i > 0).then(|| format!("n{}", i - 1));
            serde_json::json!({
                "id": format!("n{}", i),
                "post_id": "p1",
                "parent_reply_id": parent,
                "author_id": "u1",
                "author_name": "Ada",
                "body": "deeper",
                "created_at": "2024-05-01T10:00:00Z"
            })
        })
        .collect();
    fs::write(&file, Value::Array(replies).to_string()).expect("write replies");

    let mut cmd = cargo_bin_cmd!("threadline");
    let output = cmd
        .args(["tree", "--json", "--log-level", "error", "--file"])
        .arg(&file)
        .output()
        .expect("run tree");

    assert!(output.status.success());

    let value: Value = serde_json::from_slice(&output.stdout).expect("valid json");
    assert_eq!(value["count"], depth);
    assert_eq!(value["roots"], 1);
}

#[test]
fn tree_rejects_invalid_input() {
    let dir = TempDir::new().expect("temp dir");
    let file = dir.path().join("replies.json");
    fs::write(&file, "{\"not\": \"an array\"}").expect("write file");

    let mut cmd = cargo_bin_cmd!("threadline");
    cmd.args(["tree", "--file"])
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("JSON array of replies"));
}

#[test]
fn simulate_reports_converged_state() {
    let mut cmd = cargo_bin_cmd!("threadline");
    let output = cmd
        .args(["simulate", "--json", "--log-level", "warn"])
        .output()
        .expect("run simulate");

    assert!(output.status.success());

    let value: Value = serde_json::from_slice(&output.stdout).expect("valid json");
    assert_eq!(value["post"]["like_count"], 1);
    assert_eq!(value["post"]["solution_reply_ids"].as_array().map(Vec::len), Some(1));

    let tree = value["tree"].as_array().expect("tree array");
    let answer = &tree[0];
    assert_eq!(answer["upvotes"], 1);
    assert_eq!(answer["downvotes"], 0);
    assert_eq!(answer["is_solution"], true);
    assert_eq!(answer["child_count"], 1);

    let follow_up = &tree[1];
    assert_eq!(follow_up["tree_parent"], answer["id"]);
    assert_eq!(follow_up["depth"], 1);
    assert_eq!(follow_up["media"].as_array().map(Vec::len), Some(1));
    assert_eq!(follow_up["mentions"][0], "carol");
}

#[test]
fn doctor_flags_bad_backend_url() {
    let dir = TempDir::new().expect("temp dir");
    let config_path = dir.path().join("threadline.toml");
    let db_path = dir.path().join("ledger.sqlite");
    fs::write(
        &config_path,
        format!(
            "[general]\nstate_db_path = {:?}\n\n[backend]\nbase_url = \"not a url\"\n",
            db_path.display().to_string()
        ),
    )
    .expect("write config");

    let mut cmd = cargo_bin_cmd!("threadline");
    let output = cmd
        .args(["doctor", "--json", "--config"])
        .arg(&config_path)
        .output()
        .expect("run doctor");

    assert!(!output.status.success());

    let value: Value = serde_json::from_slice(&output.stdout).expect("valid json");
    assert_eq!(value["ledger"]["status"], "ok");
    assert_eq!(value["backend"]["status"], "error");
    assert_eq!(value["overall"], "error");
}
