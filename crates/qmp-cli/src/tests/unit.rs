//! Unit coverage for the CLI runtime.

use std::net::TcpListener;

use rstest::{fixture, rstest};
use serde_json::{Value, json};

use super::support::{Exchange, TestWorld, build_args};
use crate::{describe, parse_arguments};
use qmp_client::commands;
use qmp_config::SocketEndpoint;

#[fixture]
fn world() -> TestWorld {
    TestWorld::default()
}

#[rstest]
fn exec_prints_the_reply_payload(mut world: TestWorld) {
    world
        .start_monitor(vec![Exchange::reply(
            r#"{"return": {"running": true, "singlestep": false, "status": "running"}}"#,
        )])
        .expect("start monitor");

    world.run("exec query-status").expect("run cli");

    world.assert_success().expect("exec succeeds");
    let stdout: Value =
        serde_json::from_str(&world.stdout_text().expect("stdout")).expect("stdout is json");
    assert_eq!(stdout["status"], json!("running"));
    assert_eq!(world.executed_names(), vec!["query-status"]);
}

#[rstest]
fn exec_forwards_arguments(mut world: TestWorld) {
    world
        .start_monitor(vec![Exchange::reply(r#"{"return": {}}"#)])
        .expect("start monitor");

    world
        .run_args(build_args(["exec", "device_del", "--args", r#"{"id":"nic0"}"#]))
        .expect("run cli");

    world.assert_success().expect("exec succeeds");
    let sent = world.requests.get(1).expect("device_del recorded");
    assert_eq!(sent["arguments"], json!({"id": "nic0"}));
}

#[rstest]
fn exec_rejects_invalid_arguments_before_sending(mut world: TestWorld) {
    world.start_monitor(Vec::new()).expect("start monitor");

    world
        .run_args(build_args(["exec", "device_del", "--args", r#"{"id":1}"#]))
        .expect("run cli");

    world.assert_failure().expect("exec fails");
    assert!(world.executed_names().is_empty());
    let stderr = world.stderr_text().expect("stderr");
    assert!(stderr.contains("device_del"), "stderr was {stderr:?}");
}

#[rstest]
fn raw_exec_skips_validation(mut world: TestWorld) {
    world
        .start_monitor(vec![Exchange::reply(r#"{"return": {}}"#)])
        .expect("start monitor");

    world
        .run_args(build_args([
            "exec",
            "device_del",
            "--raw",
            "--args",
            r#"{"id":1}"#,
        ]))
        .expect("run cli");

    world.assert_success().expect("raw exec succeeds");
    assert_eq!(world.executed_names(), vec!["device_del"]);
}

#[rstest]
fn exec_reports_monitor_errors(mut world: TestWorld) {
    world
        .start_monitor(vec![Exchange::reply(
            r#"{"error": {"class": "DeviceNotFound", "desc": "no such device"}}"#,
        )])
        .expect("start monitor");

    world
        .run_args(build_args(["exec", "device_del", "--args", r#"{"id":"nope"}"#]))
        .expect("run cli");

    world.assert_failure().expect("exec fails");
    let stderr = world.stderr_text().expect("stderr");
    assert!(stderr.contains("no such device"), "stderr was {stderr:?}");
}

#[rstest]
fn exec_reports_unreachable_monitors(mut world: TestWorld) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind probe");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    world.config.socket = SocketEndpoint::tcp("127.0.0.1", port);

    world.run("exec stop").expect("run cli");

    world.assert_failure().expect("exec fails");
    assert!(!world.stderr_text().expect("stderr").is_empty());
}

#[rstest]
fn events_stream_until_the_monitor_hangs_up(mut world: TestWorld) {
    world
        .start_monitor(vec![
            Exchange::emit(r#"{"event": "STOP", "data": {}}"#),
            Exchange::emit(r#"{"event": "RESUME", "data": {}}"#),
        ])
        .expect("start monitor");

    world.run("events").expect("run cli");

    world.assert_success().expect("events succeed");
    let stdout = world.stdout_text().expect("stdout");
    let names: Vec<String> = stdout
        .lines()
        .map(|line| {
            let event: Value = serde_json::from_str(line).expect("event line is json");
            event["event"].as_str().expect("event name").to_owned()
        })
        .collect();
    assert_eq!(names, vec!["STOP", "RESUME"]);
}

#[rstest]
fn events_stop_at_the_limit(mut world: TestWorld) {
    world
        .start_monitor(vec![
            Exchange::emit(r#"{"event": "STOP", "data": {}}"#),
            Exchange::emit(r#"{"event": "RESUME", "data": {}}"#),
        ])
        .expect("start monitor");

    world.run("events --limit 1").expect("run cli");

    world.assert_success().expect("events succeed");
    assert_eq!(world.stdout_text().expect("stdout").lines().count(), 1);
}

#[rstest]
fn commands_lists_the_table(mut world: TestWorld) {
    world.run("commands").expect("run cli");

    world.assert_success().expect("commands succeed");
    let stdout = world.stdout_text().expect("stdout");
    assert_eq!(stdout.lines().count(), commands::COMMANDS.len());
    assert!(stdout.contains("device_del id:string -> object"));
}

#[rstest]
fn help_is_printed_to_stdout(mut world: TestWorld) {
    world.run("--help").expect("run cli");

    world.assert_success().expect("help succeeds");
    assert!(world.stdout_text().expect("stdout").contains("exec"));
}

#[rstest]
fn missing_subcommand_is_a_usage_error(mut world: TestWorld) {
    world.run("").expect("run cli");

    world.assert_failure().expect("usage fails");
    assert!(!world.stderr_text().expect("stderr").is_empty());
}

#[rstest]
#[case::absent(None, true)]
#[case::object(Some(r#"{"id": "nic0"}"#), true)]
#[case::array(Some("[1, 2]"), false)]
#[case::invalid(Some("{id"), false)]
fn argument_parsing(#[case] raw: Option<&str>, #[case] accepted: bool) {
    assert_eq!(parse_arguments(raw).is_ok(), accepted);
}

#[test]
fn optional_arguments_are_marked() {
    let spec = commands::lookup("eject").expect("eject is in the table");
    assert_eq!(describe(spec), "eject device?:string id?:string force?:bool -> object");
}
