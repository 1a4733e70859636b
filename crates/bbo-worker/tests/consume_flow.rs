#![cfg(unix)]

use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bbo_convert::JsonReader;
use bbo_core::{ExperimentId, ResultKind, Trial, TrialId, TrialStatus};
use bbo_space::{SpacePack, TemplateBuilder};
use bbo_storage::{InMemoryStore, TrialStore};
use bbo_worker::{ConsumeOutcome, Consumer, StateWriter, WorkspaceManager};

fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("evaluate.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn pack(command: &[&str]) -> SpacePack {
    SpacePack {
        experiment: None,
        command: command.iter().map(|s| s.to_string()).collect(),
        dimensions: vec![],
    }
}

fn consumer_for(
    script: PathBuf,
    base: &Path,
    store: Arc<InMemoryStore>,
    command: &[&str],
    timeout: Option<Duration>,
) -> Consumer {
    Consumer::new(
        script,
        timeout,
        WorkspaceManager::new(base.to_path_buf(), "tuning"),
        Box::new(TemplateBuilder::new(&pack(command))),
        Box::new(JsonReader),
        StateWriter::new(store),
    )
}

fn reserved_trial(
    store: &InMemoryStore,
    exp: &ExperimentId,
    params: &[(&str, serde_json::Value)],
) -> Trial {
    let params: BTreeMap<String, serde_json::Value> =
        params.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
    let trial = Trial {
        id: TrialId::new(),
        experiment_id: exp.clone(),
        params,
        status: TrialStatus::New,
        results: vec![],
        created_at_unix: 0,
    };
    store.insert_trial(&trial).unwrap();
    store.reserve_next_trial(exp, 0).unwrap().unwrap()
}

fn workspace_count(base: &Path) -> usize {
    match std::fs::read_dir(base) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

#[test]
fn success_commits_results_and_cleans_up() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("ws");
    let store = Arc::new(InMemoryStore::new());
    let exp = ExperimentId::new();

    let script = write_script(
        tmp.path(),
        r#"printf '[{"name":"loss","type":"float","value":0.42}]' > "$BBO_RESULTS_PATH""#,
    );
    let consumer =
        consumer_for(script, &base, store.clone(), &["--x", "{x}", "--config", "{config}"], None);

    let mut trial = reserved_trial(&store, &exp, &[("x", serde_json::json!(3))]);
    let outcome = consumer.consume(&mut trial).unwrap();

    assert_eq!(outcome, ConsumeOutcome::Committed);
    assert_eq!(trial.status, TrialStatus::Completed);
    assert_eq!(trial.results.len(), 1);
    assert_eq!(trial.results[0].name, "loss");
    assert_eq!(trial.results[0].kind, ResultKind::Float);
    assert_eq!(trial.results[0].value, serde_json::json!(0.42));

    let stored = store.trial(&trial.id).unwrap().unwrap();
    assert_eq!(stored.status, TrialStatus::Completed);
    assert_eq!(stored.results, trial.results);

    // exactly one durable write, and the workspace is gone
    assert_eq!(store.push_count(), 1);
    assert_eq!(store.write_count(), 0);
    assert_eq!(workspace_count(&base), 0);
}

#[test]
fn non_zero_exit_recycles_without_reading_results() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("ws");
    let store = Arc::new(InMemoryStore::new());
    let exp = ExperimentId::new();

    // the script leaves a perfectly valid results file, but its exit code
    // condemns the attempt anyway
    let script = write_script(
        tmp.path(),
        r#"printf '[{"name":"loss","type":"float","value":0.1}]' > "$BBO_RESULTS_PATH"
exit 1"#,
    );
    let consumer = consumer_for(script, &base, store.clone(), &["{x}"], None);

    let mut trial = reserved_trial(&store, &exp, &[("x", serde_json::json!(1))]);
    let outcome = consumer.consume(&mut trial).unwrap();

    assert_eq!(outcome, ConsumeOutcome::Recycled);
    assert_eq!(trial.status, TrialStatus::New);
    assert!(trial.results.is_empty());

    let stored = store.trial(&trial.id).unwrap().unwrap();
    assert_eq!(stored.status, TrialStatus::New);
    assert!(stored.results.is_empty());

    assert_eq!(store.push_count(), 0);
    assert_eq!(store.write_count(), 1);
    assert_eq!(workspace_count(&base), 0);
}

#[test]
fn missing_script_recycles() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("ws");
    let store = Arc::new(InMemoryStore::new());
    let exp = ExperimentId::new();

    let script = tmp.path().join("absent.sh");
    let consumer = consumer_for(script, &base, store.clone(), &["{x}"], None);

    let mut trial = reserved_trial(&store, &exp, &[("x", serde_json::json!(1))]);
    let outcome = consumer.consume(&mut trial).unwrap();

    assert_eq!(outcome, ConsumeOutcome::Recycled);
    assert_eq!(trial.status, TrialStatus::New);
    assert_eq!(store.write_count(), 1);
    assert_eq!(workspace_count(&base), 0);
}

#[test]
fn zero_exit_with_empty_results_recycles() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("ws");
    let store = Arc::new(InMemoryStore::new());
    let exp = ExperimentId::new();

    // exits clean but never writes; the pre-allocated file stays empty
    let script = write_script(tmp.path(), "exit 0");
    let consumer = consumer_for(script, &base, store.clone(), &["{x}"], None);

    let mut trial = reserved_trial(&store, &exp, &[("x", serde_json::json!(1))]);
    let outcome = consumer.consume(&mut trial).unwrap();

    assert_eq!(outcome, ConsumeOutcome::Recycled);
    assert_eq!(trial.status, TrialStatus::New);
    assert_eq!(store.push_count(), 0);
    assert_eq!(store.write_count(), 1);
    assert_eq!(workspace_count(&base), 0);
}

#[test]
fn zero_exit_with_garbage_results_recycles() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("ws");
    let store = Arc::new(InMemoryStore::new());
    let exp = ExperimentId::new();

    let script = write_script(tmp.path(), r#"printf 'not json' > "$BBO_RESULTS_PATH""#);
    let consumer = consumer_for(script, &base, store.clone(), &["{x}"], None);

    let mut trial = reserved_trial(&store, &exp, &[("x", serde_json::json!(1))]);
    let outcome = consumer.consume(&mut trial).unwrap();

    assert_eq!(outcome, ConsumeOutcome::Recycled);
    assert_eq!(store.write_count(), 1);
    assert_eq!(workspace_count(&base), 0);
}

#[test]
fn results_path_env_is_absolute_and_inside_workspace() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("ws");
    let store = Arc::new(InMemoryStore::new());
    let exp = ExperimentId::new();
    let probe = tmp.path().join("probe.txt");

    let script = write_script(
        tmp.path(),
        r#"printf %s "$BBO_RESULTS_PATH" > "$1"
printf '[]' > "$BBO_RESULTS_PATH""#,
    );
    let consumer = consumer_for(script, &base, store.clone(), &["{out}"], None);

    let mut trial = reserved_trial(
        &store,
        &exp,
        &[("out", serde_json::json!(probe.display().to_string()))],
    );
    let outcome = consumer.consume(&mut trial).unwrap();
    assert_eq!(outcome, ConsumeOutcome::Committed);

    let seen = std::fs::read_to_string(&probe).unwrap();
    let seen_path = Path::new(&seen);
    assert!(seen_path.is_absolute());
    assert!(seen.contains("/tuning_"));
    let name = seen_path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("results_"));
    assert!(name.ends_with(".log"));
}

#[test]
fn config_file_carries_rendered_params() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("ws");
    let store = Arc::new(InMemoryStore::new());
    let exp = ExperimentId::new();

    let script = write_script(
        tmp.path(),
        r#"grep -q "x: 3" "$1" || exit 9
printf '[]' > "$BBO_RESULTS_PATH""#,
    );
    let consumer = consumer_for(script, &base, store.clone(), &["{config}"], None);

    let mut trial = reserved_trial(&store, &exp, &[("x", serde_json::json!(3))]);
    let outcome = consumer.consume(&mut trial).unwrap();
    assert_eq!(outcome, ConsumeOutcome::Committed);
}

#[test]
fn consecutive_consumptions_use_disjoint_workspaces() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("ws");
    let store = Arc::new(InMemoryStore::new());
    let exp = ExperimentId::new();
    let probe = tmp.path().join("dirs.txt");

    let script = write_script(
        tmp.path(),
        r#"dirname "$BBO_RESULTS_PATH" >> "$1"
printf '[]' > "$BBO_RESULTS_PATH""#,
    );
    let consumer = consumer_for(script, &base, store.clone(), &["{out}"], None);

    let probe_arg = serde_json::json!(probe.display().to_string());
    let mut first = reserved_trial(&store, &exp, &[("out", probe_arg.clone()), ("n", serde_json::json!(1))]);
    let mut second = reserved_trial(&store, &exp, &[("out", probe_arg), ("n", serde_json::json!(2))]);

    assert_eq!(consumer.consume(&mut first).unwrap(), ConsumeOutcome::Committed);
    assert_eq!(consumer.consume(&mut second).unwrap(), ConsumeOutcome::Committed);

    let seen = std::fs::read_to_string(&probe).unwrap();
    let dirs: Vec<&str> = seen.lines().collect();
    assert_eq!(dirs.len(), 2);
    assert_ne!(dirs[0], dirs[1]);
    // compare against the canonical base; the system temp dir may sit
    // behind a symlink
    let canonical_base = base.canonicalize().unwrap();
    for dir in dirs {
        assert!(Path::new(dir).starts_with(&canonical_base));
    }
    assert_eq!(workspace_count(&base), 0);
}

#[test]
fn timeout_kills_hung_script_and_recycles() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("ws");
    let store = Arc::new(InMemoryStore::new());
    let exp = ExperimentId::new();

    let script = write_script(tmp.path(), "sleep 30");
    let consumer =
        consumer_for(script, &base, store.clone(), &["{x}"], Some(Duration::from_millis(200)));

    let mut trial = reserved_trial(&store, &exp, &[("x", serde_json::json!(1))]);
    let outcome = consumer.consume(&mut trial).unwrap();

    assert_eq!(outcome, ConsumeOutcome::Recycled);
    assert_eq!(trial.status, TrialStatus::New);
    assert_eq!(store.write_count(), 1);
    assert_eq!(workspace_count(&base), 0);
}

#[test]
fn render_failure_propagates_without_any_store_write() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("ws");
    let store = Arc::new(InMemoryStore::new());
    let exp = ExperimentId::new();

    let script = write_script(tmp.path(), r#"printf '[]' > "$BBO_RESULTS_PATH""#);
    // placeholder no dimension supplies; rendering must fail loudly
    let consumer = consumer_for(script, &base, store.clone(), &["{missing}"], None);

    let mut trial = reserved_trial(&store, &exp, &[("x", serde_json::json!(1))]);
    let err = consumer.consume(&mut trial).unwrap_err();
    assert!(err.to_string().contains("missing"));

    // no disposition happened, and the workspace is still cleaned up
    assert_eq!(store.push_count(), 0);
    assert_eq!(store.write_count(), 0);
    let stored = store.trial(&trial.id).unwrap().unwrap();
    assert_eq!(stored.status, TrialStatus::Running);
    assert_eq!(workspace_count(&base), 0);
}
