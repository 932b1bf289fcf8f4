//! Unit tests for todolist parsing and checkbox rewriting.

use agent_conductor::orchestrator::todolist::{
    load_pending, mark_done, mark_done_in_file, parse, pending,
};
use agent_conductor::AppError;

const LIST: &str = "# Sprint

Some prose that mentions [ ] inline but is not a task.

- [ ] Write the parser
- [x] Set up CI
* [X] Pick a name
+ [ ]   Trim whitespace   
[ ] Bare checkbox
- [ ]
- [] not a checkbox
";

#[test]
fn parses_pending_and_done_items() {
    let items = parse(LIST);
    let texts: Vec<(&str, bool)> = items.iter().map(|i| (i.text.as_str(), i.done)).collect();
    assert_eq!(
        texts,
        vec![
            ("Write the parser", false),
            ("Set up CI", true),
            ("Pick a name", true),
            ("Trim whitespace", false),
            ("Bare checkbox", false),
        ]
    );
    assert_eq!(items[0].line, 4);
}

#[test]
fn pending_keeps_file_order() {
    let texts: Vec<String> = pending(LIST).into_iter().map(|i| i.text).collect();
    assert_eq!(texts, vec!["Write the parser", "Trim whitespace", "Bare checkbox"]);
}

#[test]
fn mark_done_rewrites_only_the_first_match() {
    let content = "- [ ] a\n- [ ] a\n- [ ] b\n";
    let updated = mark_done(content, "a").expect("marker present");
    assert_eq!(updated, "- [x] a\n- [ ] a\n- [ ] b\n");
}

#[test]
fn mark_done_preserves_prose() {
    let updated = mark_done(LIST, "Write the parser").expect("marker present");
    assert!(updated.contains("- [x] Write the parser"));
    assert!(updated.contains("Some prose that mentions [ ] inline"));
    assert_eq!(updated.lines().count(), LIST.lines().count());
}

#[test]
fn mark_done_without_marker_is_none() {
    assert!(mark_done("- [x] done\n", "done").is_none());
    assert!(mark_done("- [ ] other\n", "missing").is_none());
}

#[tokio::test]
async fn file_round_trip_ticks_task() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("todo.md");
    tokio::fs::write(&path, "- [ ] first\n- [ ] second\n")
        .await
        .expect("write");

    assert!(mark_done_in_file(&path, "first").await.expect("mark"));
    assert!(!mark_done_in_file(&path, "first").await.expect("second mark"));

    let remaining: Vec<String> = load_pending(&path)
        .await
        .expect("load")
        .into_iter()
        .map(|i| i.text)
        .collect();
    assert_eq!(remaining, vec!["second"]);
}

#[tokio::test]
async fn missing_file_is_todolist_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = load_pending(&dir.path().join("absent.md"))
        .await
        .expect_err("missing file");
    assert!(matches!(err, AppError::Todolist(_)));
}
