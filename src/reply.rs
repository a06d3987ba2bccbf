//! Per-line reply classification.
//!
//! Every line pulled off the connection is classified exactly once: either it
//! belongs to the in-flight command (echo, partial output, terminator) or it
//! is an unsolicited notification routed to the side channel. A line that
//! cannot be matched to anything never resolves a command.

/// Where the in-flight command is in its reply exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Command written; the controller may echo it back first.
    AwaitingEcho,
    /// Echo seen (or not expected); waiting for the terminator.
    AwaitingReply,
}

/// What a received line means for the in-flight command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Unsolicited line; goes to the notification channel.
    Notification,
    /// The controller echoed the command text; consumed, not part of the result.
    Echo,
    /// Informational output; appended to the result, command stays pending.
    Info,
    /// Partial reply text; appended to the result, command stays pending.
    Partial,
    /// Terminator: the command completed successfully.
    Ack,
    /// Terminator: the firmware reported an error for this command.
    Fault,
}

/// Line classifier configured with the reply tags of the firmware dialect.
#[derive(Debug, Clone)]
pub struct ReplyClassifier {
    ok_tag: String,
    error_tag: String,
    info_tag: String,
    notify_prefix: String,
}

impl ReplyClassifier {
    pub fn new(ok_tag: &str, error_tag: &str, info_tag: &str, notify_prefix: &str) -> Self {
        ReplyClassifier {
            ok_tag: ok_tag.to_string(),
            error_tag: error_tag.to_string(),
            info_tag: info_tag.to_string(),
            notify_prefix: notify_prefix.to_string(),
        }
    }

    /// Classify one received line.
    ///
    /// `pending` is the in-flight command text and phase, or `None` when the
    /// dispatcher is idle. Notification-prefixed lines bypass the pending
    /// command entirely, even mid-flight.
    pub fn classify(&self, line: &str, pending: Option<(&str, Phase)>) -> Classification {
        if !self.notify_prefix.is_empty() && line.starts_with(&self.notify_prefix) {
            return Classification::Notification;
        }

        let Some((command, phase)) = pending else {
            return Classification::Notification;
        };

        if phase == Phase::AwaitingEcho && line == command {
            return Classification::Echo;
        }

        if !self.error_tag.is_empty() && line.starts_with(&self.error_tag) {
            return Classification::Fault;
        }

        // An empty OkTag means every remaining line terminates the command.
        if self.ok_tag.is_empty() {
            return Classification::Ack;
        }

        if !self.info_tag.is_empty() && line.starts_with(&self.info_tag) {
            return Classification::Info;
        }

        if line.starts_with(&self.ok_tag) {
            return Classification::Ack;
        }

        Classification::Partial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{
        DEFAULT_ERROR_TAG, DEFAULT_INFO_TAG, DEFAULT_NOTIFY_PREFIX, DEFAULT_OK_TAG,
    };

    fn classifier() -> ReplyClassifier {
        ReplyClassifier::new(
            DEFAULT_OK_TAG,
            DEFAULT_ERROR_TAG,
            DEFAULT_INFO_TAG,
            DEFAULT_NOTIFY_PREFIX,
        )
    }

    const PENDING: Option<(&str, Phase)> = Some(("G0 X10", Phase::AwaitingReply));

    #[test]
    fn ok_line_terminates() {
        assert_eq!(classifier().classify("ok", PENDING), Classification::Ack);
    }

    #[test]
    fn error_line_is_fault() {
        assert_eq!(
            classifier().classify("error: expected command letter", PENDING),
            Classification::Fault
        );
    }

    #[test]
    fn info_line_stays_pending() {
        assert_eq!(
            classifier().classify("info: probe at 1.000", PENDING),
            Classification::Info
        );
    }

    #[test]
    fn telemetry_bypasses_pending_command() {
        assert_eq!(
            classifier().classify(";CNCJoystick:v1", PENDING),
            Classification::Notification
        );
    }

    #[test]
    fn idle_lines_are_notifications() {
        assert_eq!(
            classifier().classify("ok", None),
            Classification::Notification
        );
    }

    #[test]
    fn echo_consumed_once() {
        let c = classifier();
        assert_eq!(
            c.classify("G0 X10", Some(("G0 X10", Phase::AwaitingEcho))),
            Classification::Echo
        );
        // after the phase advances the same text is plain partial output
        assert_eq!(c.classify("G0 X10", PENDING), Classification::Partial);
    }

    #[test]
    fn empty_ok_tag_terminates_on_anything() {
        let c = ReplyClassifier::new("", DEFAULT_ERROR_TAG, DEFAULT_INFO_TAG, ";");
        assert_eq!(c.classify("joystick ready", PENDING), Classification::Ack);
        assert_eq!(
            c.classify("error: limit hit", PENDING),
            Classification::Fault
        );
    }
}
