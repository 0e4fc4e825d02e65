//! Wire frames for the remote execution service.
//!
//! The service speaks a small event protocol over one WebSocket: the client
//! opens with a single `cmd` text frame carrying the invocation parameters,
//! then raw command input/output flows as binary frames while lifecycle
//! control arrives as JSON text frames.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The single control byte forwarded to the remote side to request
/// cancellation of the running command (ETX, what a terminal sends for ^C).
pub const CANCEL_BYTE: u8 = 0x03;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    /// Attach to the recorded output of an already-completed command instead
    /// of starting a new one.
    Logs,
}

/// Parameters sent in the opening `cmd` frame. `input_token` is a one-time
/// secret; the manual `Debug` impl keeps it out of logs.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionParams {
    pub command_id: String,
    pub input_token: String,
    pub columns: u16,
    pub rows: u16,
    pub offset: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<CommandAction>,
}

impl fmt::Debug for SessionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionParams")
            .field("command_id", &self.command_id)
            .field("input_token", &"<redacted>")
            .field("columns", &self.columns)
            .field("rows", &self.rows)
            .field("offset", &self.offset)
            .field("action", &self.action)
            .finish()
    }
}

/// Text frames sent by the client. Only the opening handshake today; input
/// bytes travel as binary frames.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Cmd(SessionParams),
}

/// Control frames the execution service sends as text messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// The command finished and all output has been delivered.
    End,
    /// The server unilaterally terminated the command.
    Cancel {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// A fault on the server side. Not terminal by itself; an `end` or
    /// `cancel` follows if the command cannot continue.
    Error { message: String },
    /// The presented credential or input token was rejected.
    Unauthorized {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SessionParams {
        SessionParams {
            command_id: "cmd-7".into(),
            input_token: "one-time-secret".into(),
            columns: 120,
            rows: 40,
            offset: 4096,
            action: None,
        }
    }

    #[test]
    fn cmd_frame_carries_session_parameters() {
        let frame = ClientFrame::Cmd(params());
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();
        assert_eq!(value["type"], "cmd");
        assert_eq!(value["command_id"], "cmd-7");
        assert_eq!(value["offset"], 4096);
        assert!(value.get("action").is_none());
    }

    #[test]
    fn logs_action_is_tagged() {
        let mut p = params();
        p.action = Some(CommandAction::Logs);
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&ClientFrame::Cmd(p)).unwrap()).unwrap();
        assert_eq!(value["action"], "logs");
    }

    #[test]
    fn debug_never_prints_the_input_token() {
        let rendered = format!("{:?}", params());
        assert!(!rendered.contains("one-time-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn control_frames_parse_from_snake_case_tags() {
        let end: ControlFrame = serde_json::from_str(r#"{"type":"end"}"#).unwrap();
        assert_eq!(end, ControlFrame::End);

        let cancel: ControlFrame =
            serde_json::from_str(r#"{"type":"cancel","reason":"exceeded quota"}"#).unwrap();
        assert_eq!(
            cancel,
            ControlFrame::Cancel {
                reason: Some("exceeded quota".into())
            }
        );

        let error: ControlFrame =
            serde_json::from_str(r#"{"type":"error","message":"worker restarted"}"#).unwrap();
        assert_eq!(
            error,
            ControlFrame::Error {
                message: "worker restarted".into()
            }
        );

        let unauthorized: ControlFrame =
            serde_json::from_str(r#"{"type":"unauthorized"}"#).unwrap();
        assert_eq!(unauthorized, ControlFrame::Unauthorized { message: None });
    }
}
