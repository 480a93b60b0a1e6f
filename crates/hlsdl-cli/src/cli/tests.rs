//! CLI parse tests.

use super::{Cli, CliCommand};
use clap::Parser;

fn parse(args: &[&str]) -> CliCommand {
    Cli::try_parse_from(args).unwrap().command
}

#[test]
fn parses_add() {
    match parse(&["hlsdl", "add", "https://e.com/a.m3u8", "out.mp4"]) {
        CliCommand::Add { url, output, priority } => {
            assert_eq!(url, "https://e.com/a.m3u8");
            assert_eq!(output, "out.mp4");
            assert_eq!(priority, "normal");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn parses_add_with_priority() {
    match parse(&["hlsdl", "add", "https://e.com/a.m3u8", "out.mp4", "--priority", "high"]) {
        CliCommand::Add { priority, .. } => assert_eq!(priority, "high"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn parses_run_with_task_id() {
    match parse(&["hlsdl", "run", "7"]) {
        CliCommand::Run { task_id } => assert_eq!(task_id, 7),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn parses_run_all() {
    assert!(matches!(parse(&["hlsdl", "run-all"]), CliCommand::RunAll));
}

#[test]
fn parses_status_without_id() {
    assert!(matches!(parse(&["hlsdl", "status"]), CliCommand::Status { task_id: None }));
}

#[test]
fn parses_status_with_id() {
    match parse(&["hlsdl", "status", "3"]) {
        CliCommand::Status { task_id } => assert_eq!(task_id, Some(3)),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn parses_pause_resume_cancel() {
    assert!(matches!(parse(&["hlsdl", "pause", "1"]), CliCommand::Pause { task_id: 1 }));
    assert!(matches!(parse(&["hlsdl", "resume", "1"]), CliCommand::Resume { task_id: 1 }));
    assert!(matches!(parse(&["hlsdl", "cancel", "1"]), CliCommand::Cancel { task_id: 1 }));
}

#[test]
fn parses_remove_with_delete_output() {
    match parse(&["hlsdl", "remove", "4", "--delete-output"]) {
        CliCommand::Remove { task_id, delete_output } => {
            assert_eq!(task_id, 4);
            assert!(delete_output);
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn parses_list_with_status_filter() {
    match parse(&["hlsdl", "list", "--status", "failed"]) {
        CliCommand::List { status } => assert_eq!(status.as_deref(), Some("failed")),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn parses_verify_with_level() {
    match parse(&["hlsdl", "verify", "out.mp4", "--level", "deep"]) {
        CliCommand::Verify { output, level } => {
            assert_eq!(output, "out.mp4");
            assert_eq!(level, "deep");
        }
        other => panic!("unexpected: {other:?}"),
    }
}
