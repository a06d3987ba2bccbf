//! Dispatcher behavior over a scripted mock link: ordering, terminators,
//! timeouts, disconnects and history bookkeeping.

mod common;

use std::time::Duration;

use cnc_link::{CncError, CommandState, Controller, LinkOptions};
use common::{ack_everything, init_logger, mock_link, wait_until};

fn short_timeout_options() -> LinkOptions {
    LinkOptions {
        command_timeout: Duration::from_millis(200),
        ..LinkOptions::default()
    }
}

#[tokio::test]
async fn replies_match_send_order_under_telemetry() {
    init_logger();
    let mut counter = 0;
    let (conn, _handle) = mock_link(move |cmd| {
        counter += 1;
        vec![
            format!(";joystick tick {counter}"),
            format!("pos {cmd}"),
            "ok".to_string(),
        ]
    });
    let controller = Controller::start(conn, LinkOptions::default()).unwrap();

    let commands = ["G0 X1", "G0 X2", "G0 X3", "G0 X4"];
    let replies = controller.send_commands(commands).await.unwrap();

    assert_eq!(replies.len(), commands.len());
    for (command, reply) in commands.iter().zip(&replies) {
        assert_eq!(reply, &format!("pos {command}\nok"));
    }
    controller.close();
}

#[tokio::test]
async fn empty_ok_tag_resolves_on_next_line() {
    init_logger();
    let (conn, _handle) = mock_link(|_| vec!["anything at all".to_string()]);
    let options = LinkOptions {
        ok_tag: String::new(),
        ..short_timeout_options()
    };
    let controller = Controller::start(conn, options).unwrap();

    let reply = controller.send_command("j 100;s 5000").await.unwrap();
    assert_eq!(reply, "anything at all");
    controller.close();
}

#[tokio::test]
async fn echo_is_consumed_not_reported() {
    init_logger();
    let (conn, _handle) = mock_link(|cmd| vec![cmd.to_string(), "ok".to_string()]);
    let controller = Controller::start(conn, LinkOptions::default()).unwrap();

    let reply = controller.send_command("G28").await.unwrap();
    assert_eq!(reply, "ok");
    controller.close();
}

#[tokio::test]
async fn firmware_error_terminates_and_marks_history() {
    init_logger();
    let (conn, _handle) = mock_link(|_| vec!["error: expected command letter".to_string()]);
    let controller = Controller::start(conn, LinkOptions::default()).unwrap();

    let reply = controller.send_command("bogus").await.unwrap();
    assert_eq!(reply, "error: expected command letter");

    let history = controller.command_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].state, CommandState::Error);
    controller.close();
}

#[tokio::test]
async fn missing_terminator_times_out() {
    init_logger();
    let (conn, _handle) = mock_link(|_| vec!["partial data".to_string()]);
    let controller = Controller::start(conn, short_timeout_options()).unwrap();

    let err = controller.send_command("M114").await.unwrap_err();
    assert!(matches!(err, CncError::Timeout { ref command } if command == "M114"));

    let history = controller.command_history();
    assert_eq!(history[0].state, CommandState::TimedOut);
    assert_eq!(history[0].result, "partial data");
    controller.close();
}

#[tokio::test]
async fn severed_link_fails_in_flight_command() {
    init_logger();
    let (conn, handle) = mock_link(|_| Vec::new());
    let controller =
        std::sync::Arc::new(Controller::start(conn, LinkOptions::default()).unwrap());

    let pending = tokio::spawn({
        let controller = std::sync::Arc::clone(&controller);
        async move { controller.send_command("G1 X5").await }
    });

    // let the command reach the wire, then cut the cable
    assert!(wait_until(|| handle.written() == ["G1 X5"]).await);
    handle.sever();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, CncError::Disconnected));
    assert!(wait_until(|| !controller.is_connected()).await);

    // further sends fail immediately instead of hanging
    let err = controller.send_command("G1 X6").await.unwrap_err();
    assert!(matches!(err, CncError::Disconnected));
}

#[tokio::test]
async fn close_fails_pending_command() {
    init_logger();
    let (conn, handle) = mock_link(|_| Vec::new());
    let controller =
        std::sync::Arc::new(Controller::start(conn, LinkOptions::default()).unwrap());

    let pending = tokio::spawn({
        let controller = std::sync::Arc::clone(&controller);
        async move { controller.send_command("G4 P10").await }
    });
    assert!(wait_until(|| handle.written() == ["G4 P10"]).await);

    controller.close();
    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, CncError::Disconnected));
    assert!(!controller.is_connected());
}

#[tokio::test]
async fn telemetry_routed_to_notification_channel() {
    init_logger();
    let (conn, handle) = ack_everything();
    let controller = Controller::start(conn, LinkOptions::default()).unwrap();
    let mut notifications = controller.notifications().unwrap();

    handle.inject_line(";CNCJoystick:ready");
    let line = tokio::time::timeout(Duration::from_secs(2), notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(line, ";CNCJoystick:ready");

    // telemetry arriving mid-command must not resolve it
    handle.inject_line(";CNCJoystick:x=12");
    let reply = controller.send_command("G0 X1").await.unwrap();
    assert_eq!(reply, "ok");
    controller.close();
}

#[tokio::test]
async fn history_records_capped_and_clearable() {
    init_logger();
    let (conn, _handle) = ack_everything();
    let options = LinkOptions {
        history_limit: 3,
        ..LinkOptions::default()
    };
    let controller = Controller::start(conn, options).unwrap();

    controller
        .send_commands(["G0 X1", "G0 X2", "G0 X3", "G0 X4"])
        .await
        .unwrap();

    let history = controller.command_history();
    let texts: Vec<_> = history.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts, ["G0 X2", "G0 X3", "G0 X4"]);
    assert!(history.iter().all(|c| c.state == CommandState::Ok));
    assert!(history.iter().all(|c| c.sent_at.is_some()));

    controller.clear_command_history();
    assert!(controller.command_history().is_empty());
    controller.close();
}

#[tokio::test]
async fn history_export_writes_file() {
    init_logger();
    let (conn, _handle) = ack_everything();
    let controller = Controller::start(conn, LinkOptions::default()).unwrap();

    controller.send_command("G28").await.unwrap();

    let path = std::env::temp_dir().join("cnc_link_dispatcher_history.txt");
    controller.write_command_history(&path).unwrap();
    let contents = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert!(contents.contains("G28"));
    controller.close();
}

#[tokio::test]
async fn concurrent_senders_queue_without_interleaving() {
    init_logger();
    let (conn, handle) = mock_link(|cmd| vec![format!("seen {cmd}"), "ok".to_string()]);
    let controller = std::sync::Arc::new(Controller::start(conn, LinkOptions::default()).unwrap());

    let mut tasks = Vec::new();
    for index in 0..8 {
        let controller = std::sync::Arc::clone(&controller);
        tasks.push(tokio::spawn(async move {
            let command = format!("G0 X{index}");
            let reply = controller.send_command(&command).await.unwrap();
            (command, reply)
        }));
    }
    for task in tasks {
        let (command, reply) = task.await.unwrap();
        // each caller got the reply for its own command, whatever the order
        assert_eq!(reply, format!("seen {command}\nok"));
    }
    assert_eq!(handle.written().len(), 8);
    controller.close();
}
