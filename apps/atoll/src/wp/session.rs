use crate::wp::protocol::CommandAction;

/// One logical remote command execution, possibly spanning several
/// underlying connections.
#[derive(Clone)]
pub struct Session {
    pub command_id: String,
    pub input_token: String,
    pub action: Option<CommandAction>,
}

impl Session {
    pub fn new(command_id: String, input_token: String) -> Self {
        Self {
            command_id,
            input_token,
            action: None,
        }
    }

    /// A session that replays the recorded output of a completed command.
    /// Replay is authorized by command id alone, so the token is empty.
    pub fn logs(command_id: String) -> Self {
        Self {
            command_id,
            input_token: String::new(),
            action: Some(CommandAction::Logs),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("command_id", &self.command_id)
            .field("input_token", &"<redacted>")
            .field("action", &self.action)
            .finish()
    }
}

/// Mutable state for one prompt-loop lifetime. Instantiated once and passed
/// by reference to whatever needs it; there are deliberately no process-wide
/// globals here.
#[derive(Debug)]
pub struct SessionController {
    offset: u64,
    command_running: bool,
    muted: bool,
}

impl SessionController {
    pub fn new(muted: bool) -> Self {
        Self {
            offset: 0,
            command_running: false,
            muted,
        }
    }

    /// Record a chunk of delivered output. The offset is the running byte
    /// count used to resume after a reconnect; it only ever grows within one
    /// logical command.
    pub fn note_output(&mut self, len: usize) {
        self.offset += len as u64;
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn command_running(&self) -> bool {
        self.command_running
    }

    pub fn muted(&self) -> bool {
        self.muted
    }

    pub fn mark_running(&mut self) {
        self.command_running = true;
    }

    pub fn mark_stopped(&mut self) {
        self.command_running = false;
    }

    /// The command fully completed: clear the running flag and reset the
    /// offset. Reconnects must NOT come through here; they carry the offset
    /// forward.
    pub fn complete_command(&mut self) {
        self.command_running = false;
        self.offset = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_accumulates_chunk_lengths() {
        let mut controller = SessionController::new(false);
        for len in [10usize, 0, 4086] {
            controller.note_output(len);
        }
        assert_eq!(controller.offset(), 4096);
    }

    #[test]
    fn offset_survives_stop_but_not_completion() {
        let mut controller = SessionController::new(false);
        controller.mark_running();
        controller.note_output(2048);

        // A transport error clears the running flag but keeps the offset so
        // a reconnect can resume without replaying output.
        controller.mark_stopped();
        assert_eq!(controller.offset(), 2048);

        controller.mark_running();
        controller.note_output(2048);
        assert_eq!(controller.offset(), 4096);

        controller.complete_command();
        assert_eq!(controller.offset(), 0);
        assert!(!controller.command_running());
    }

    #[test]
    fn logs_session_has_empty_token_and_logs_action() {
        let session = Session::logs("cmd-1".into());
        assert!(session.input_token.is_empty());
        assert_eq!(session.action, Some(crate::wp::protocol::CommandAction::Logs));
    }

    #[test]
    fn session_debug_redacts_token() {
        let session = Session::new("cmd-1".into(), "secret".into());
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("secret"));
    }
}
