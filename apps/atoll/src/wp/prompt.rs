//! The local line prompt loop, expressed as an explicit state machine.
//!
//! `PromptMachine::step` maps `(state, event)` to a new state plus a list of
//! effects for the runner to carry out. Keeping the transition table pure
//! makes the reconnect/cancel interleavings testable without any I/O.

use crate::wp::protocol::CANCEL_BYTE;

/// Every accepted command line must begin with the remote program's
/// invocation prefix.
pub const INVOCATION_PREFIX: &str = "wp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptState {
    Idle,
    AwaitingDispatch,
    Streaming,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    /// Persistent prompt; multiple commands over one loop.
    Subshell,
    /// Single command, then the process exits.
    OneShot,
    /// Replay a completed command's output, then exit.
    LogAttach,
}

#[derive(Debug)]
pub enum PromptEvent {
    /// A full line arrived on local stdin.
    Line(String),
    /// The dispatcher registered the command.
    DispatchSucceeded,
    /// The dispatcher rejected the command (already reported to the user).
    DispatchFailed,
    /// The output stream signalled a normal end.
    OutputEnded,
    /// A transport-level fault; not terminal until an end/cancel follows.
    StreamErrored(String),
    /// The stream is gone for good (authorization rejected, reconnect
    /// exhausted).
    StreamFailed(String),
    /// The server unilaterally terminated the command.
    ServerCancelled(Option<String>),
    /// Local interrupt signal (Ctrl-C).
    Interrupt,
}

#[derive(Debug, PartialEq)]
pub enum Effect {
    /// Re-display the prompt and accept the next line.
    Reprompt,
    PrintError(String),
    PrintNotice(String),
    /// Register the command line (sans prefix) with the dispatcher.
    Dispatch(String),
    /// Open a transport directly for the given completed command id.
    AttachLogs(String),
    /// Dispatch succeeded: bind the stream pair and mark the command running.
    BeginStreaming,
    /// Unbind, reset the offset, flush the current output line.
    FinishCommand { trailing_newline: bool },
    /// Clear the running flag without finishing the command.
    MarkStopped,
    /// Forward the cancellation byte to the remote side.
    SendCancel,
    /// Stop treating transport loss as reconnectable; the next close ends
    /// the command.
    RequestOutputEnd,
    /// Graceful termination with the given exit code.
    Close(i32),
    /// Immediate termination, no cleanup (double Ctrl-C).
    ForceQuit(i32),
}

#[derive(Debug)]
pub struct PromptMachine {
    state: PromptState,
    mode: LoopMode,
    sigint_count: u32,
    last_command: Option<String>,
}

impl PromptMachine {
    pub fn new(mode: LoopMode) -> Self {
        Self {
            state: PromptState::Idle,
            mode,
            sigint_count: 0,
            last_command: None,
        }
    }

    pub fn state(&self) -> PromptState {
        self.state
    }

    pub fn mode(&self) -> LoopMode {
        self.mode
    }

    pub fn sigint_count(&self) -> u32 {
        self.sigint_count
    }

    pub fn step(&mut self, event: PromptEvent) -> Vec<Effect> {
        match (self.state, event) {
            (PromptState::Idle, PromptEvent::Line(line)) => self.handle_line(line),
            (PromptState::Idle, PromptEvent::Interrupt) => vec![Effect::Reprompt],

            (PromptState::AwaitingDispatch, PromptEvent::DispatchSucceeded) => {
                self.state = PromptState::Streaming;
                vec![Effect::BeginStreaming]
            }
            (PromptState::AwaitingDispatch, PromptEvent::DispatchFailed) => match self.mode {
                LoopMode::Subshell => {
                    self.return_to_idle();
                    vec![Effect::Reprompt]
                }
                LoopMode::OneShot | LoopMode::LogAttach => {
                    self.state = PromptState::Closed;
                    vec![Effect::Close(1)]
                }
            },

            (PromptState::Streaming, PromptEvent::OutputEnded) => {
                let trailing_newline = self
                    .last_command
                    .as_deref()
                    .map(needs_trailing_newline)
                    .unwrap_or(false);
                match self.mode {
                    LoopMode::Subshell => {
                        self.return_to_idle();
                        vec![Effect::FinishCommand { trailing_newline }, Effect::Reprompt]
                    }
                    LoopMode::OneShot | LoopMode::LogAttach => {
                        self.state = PromptState::Closed;
                        vec![Effect::FinishCommand { trailing_newline }, Effect::Close(0)]
                    }
                }
            }
            (PromptState::Streaming, PromptEvent::StreamErrored(message)) => {
                // Mirrors the transport: an error alone does not end the
                // session; an explicit end or cancel must follow.
                vec![Effect::PrintError(message), Effect::MarkStopped]
            }
            (PromptState::Streaming, PromptEvent::StreamFailed(message)) => match self.mode {
                LoopMode::Subshell => {
                    self.return_to_idle();
                    vec![
                        Effect::PrintError(message),
                        Effect::FinishCommand {
                            trailing_newline: false,
                        },
                        Effect::Reprompt,
                    ]
                }
                LoopMode::OneShot | LoopMode::LogAttach => {
                    self.state = PromptState::Closed;
                    vec![
                        Effect::PrintError(message),
                        Effect::FinishCommand {
                            trailing_newline: false,
                        },
                        Effect::Close(1),
                    ]
                }
            },
            (PromptState::Streaming, PromptEvent::ServerCancelled(reason)) => {
                self.state = PromptState::Closed;
                let message = match reason {
                    Some(reason) => format!("command cancelled by the server: {reason}"),
                    None => "command cancelled by the server".to_string(),
                };
                vec![
                    Effect::PrintError(message),
                    Effect::FinishCommand {
                        trailing_newline: false,
                    },
                    Effect::Close(1),
                ]
            }
            (PromptState::Streaming, PromptEvent::Interrupt) => {
                self.sigint_count += 1;
                if self.sigint_count >= 2 {
                    vec![Effect::ForceQuit(1)]
                } else {
                    vec![
                        Effect::SendCancel,
                        Effect::RequestOutputEnd,
                        Effect::PrintNotice("Cancelling command...".to_string()),
                    ]
                }
            }

            // Anything else is a stale or out-of-order event; ignore it.
            _ => Vec::new(),
        }
    }

    fn handle_line(&mut self, line: String) -> Vec<Effect> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return vec![Effect::Reprompt];
        }
        if trimmed == "exit" || trimmed == "exit;" {
            self.state = PromptState::Closed;
            return vec![Effect::Close(0)];
        }
        // The bare cancellation byte is a valid line even though it does not
        // carry the invocation prefix; with no command running it is a no-op.
        if trimmed.as_bytes() == [CANCEL_BYTE] {
            return vec![Effect::Reprompt];
        }
        if self.mode == LoopMode::LogAttach {
            self.state = PromptState::AwaitingDispatch;
            return vec![Effect::AttachLogs(trimmed.to_string())];
        }
        match strip_invocation_prefix(trimmed) {
            Some(rest) => {
                self.last_command = Some(rest.to_string());
                self.state = PromptState::AwaitingDispatch;
                vec![Effect::Dispatch(rest.to_string())]
            }
            None => vec![
                Effect::PrintError(format!(
                    "commands must start with '{INVOCATION_PREFIX}', e.g. '{INVOCATION_PREFIX} option get siteurl'"
                )),
                Effect::Reprompt,
            ],
        }
    }

    fn return_to_idle(&mut self) {
        self.state = PromptState::Idle;
        self.sigint_count = 0;
    }
}

/// Strip the leading `wp` token; returns the remote command line, which may
/// be empty (`wp` alone asks the remote binary for its help output).
fn strip_invocation_prefix(line: &str) -> Option<&str> {
    if line == INVOCATION_PREFIX {
        return Some("");
    }
    line.strip_prefix(INVOCATION_PREFIX)
        .filter(|rest| rest.starts_with(char::is_whitespace))
        .map(str::trim_start)
}

/// Line-oriented wp-cli output formats whose upstream formatter omits the
/// final newline; the loop adds one after completion so the shell prompt
/// does not land mid-line. A compatibility shim, not a formatting rule.
pub fn needs_trailing_newline(command: &str) -> bool {
    command
        .split_whitespace()
        .any(|word| word == "--format=count" || word == "--format=ids")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(mode: LoopMode) -> PromptMachine {
        PromptMachine::new(mode)
    }

    fn line(text: &str) -> PromptEvent {
        PromptEvent::Line(text.to_string())
    }

    #[test]
    fn empty_line_reprompts() {
        let mut m = machine(LoopMode::Subshell);
        assert_eq!(m.step(line("   ")), vec![Effect::Reprompt]);
        assert_eq!(m.state(), PromptState::Idle);
    }

    #[test]
    fn exit_closes_with_status_zero() {
        for text in ["exit", "exit;", "  exit  "] {
            let mut m = machine(LoopMode::Subshell);
            assert_eq!(m.step(line(text)), vec![Effect::Close(0)]);
            assert_eq!(m.state(), PromptState::Closed);
        }
    }

    #[test]
    fn invalid_line_is_rejected_without_dispatch() {
        let mut m = machine(LoopMode::Subshell);
        let effects = m.step(line("ls -la"));
        assert!(matches!(effects[0], Effect::PrintError(_)));
        assert_eq!(effects[1], Effect::Reprompt);
        assert!(!effects.iter().any(|e| matches!(e, Effect::Dispatch(_))));
        assert_eq!(m.state(), PromptState::Idle);
    }

    #[test]
    fn cancel_byte_line_is_valid_but_idle_noop() {
        let mut m = machine(LoopMode::Subshell);
        let effects = m.step(line("\u{3}"));
        assert_eq!(effects, vec![Effect::Reprompt]);
    }

    #[test]
    fn wp_line_dispatches_without_prefix() {
        let mut m = machine(LoopMode::Subshell);
        let effects = m.step(line("wp option get siteurl"));
        assert_eq!(effects, vec![Effect::Dispatch("option get siteurl".into())]);
        assert_eq!(m.state(), PromptState::AwaitingDispatch);
    }

    #[test]
    fn bare_wp_dispatches_empty_command() {
        let mut m = machine(LoopMode::Subshell);
        assert_eq!(m.step(line("wp")), vec![Effect::Dispatch(String::new())]);
    }

    #[test]
    fn wp_prefix_requires_word_boundary() {
        let mut m = machine(LoopMode::Subshell);
        let effects = m.step(line("wpoption get"));
        assert!(matches!(effects[0], Effect::PrintError(_)));
    }

    #[test]
    fn log_attach_mode_accepts_a_bare_command_id() {
        let mut m = machine(LoopMode::LogAttach);
        let effects = m.step(line("cmd-123"));
        assert_eq!(effects, vec![Effect::AttachLogs("cmd-123".into())]);
        assert_eq!(m.state(), PromptState::AwaitingDispatch);
    }

    #[test]
    fn successful_dispatch_begins_streaming() {
        let mut m = machine(LoopMode::Subshell);
        m.step(line("wp plugin list"));
        assert_eq!(
            m.step(PromptEvent::DispatchSucceeded),
            vec![Effect::BeginStreaming]
        );
        assert_eq!(m.state(), PromptState::Streaming);
    }

    #[test]
    fn dispatch_failure_returns_to_idle_in_subshell() {
        let mut m = machine(LoopMode::Subshell);
        m.step(line("wp plugin list"));
        assert_eq!(m.step(PromptEvent::DispatchFailed), vec![Effect::Reprompt]);
        assert_eq!(m.state(), PromptState::Idle);
    }

    #[test]
    fn dispatch_failure_exits_nonzero_in_one_shot() {
        let mut m = machine(LoopMode::OneShot);
        m.step(line("wp plugin list"));
        assert_eq!(m.step(PromptEvent::DispatchFailed), vec![Effect::Close(1)]);
        assert_eq!(m.state(), PromptState::Closed);
    }

    #[test]
    fn output_end_finishes_and_reprompts_in_subshell() {
        let mut m = machine(LoopMode::Subshell);
        m.step(line("wp plugin list"));
        m.step(PromptEvent::DispatchSucceeded);
        let effects = m.step(PromptEvent::OutputEnded);
        assert_eq!(
            effects,
            vec![
                Effect::FinishCommand {
                    trailing_newline: false
                },
                Effect::Reprompt
            ]
        );
        assert_eq!(m.state(), PromptState::Idle);
    }

    #[test]
    fn output_end_exits_zero_in_one_shot() {
        let mut m = machine(LoopMode::OneShot);
        m.step(line("wp plugin list"));
        m.step(PromptEvent::DispatchSucceeded);
        let effects = m.step(PromptEvent::OutputEnded);
        assert!(effects.contains(&Effect::Close(0)));
    }

    #[test]
    fn count_and_ids_formats_get_a_trailing_newline() {
        for command in ["wp post list --format=count", "wp post list --format=ids"] {
            let mut m = machine(LoopMode::Subshell);
            m.step(line(command));
            m.step(PromptEvent::DispatchSucceeded);
            let effects = m.step(PromptEvent::OutputEnded);
            assert!(
                effects.contains(&Effect::FinishCommand {
                    trailing_newline: true
                }),
                "expected trailing newline for {command}"
            );
        }
    }

    #[test]
    fn stream_error_keeps_streaming_until_end_arrives() {
        let mut m = machine(LoopMode::Subshell);
        m.step(line("wp plugin list"));
        m.step(PromptEvent::DispatchSucceeded);
        let effects = m.step(PromptEvent::StreamErrored("broken pipe".into()));
        assert_eq!(
            effects,
            vec![
                Effect::PrintError("broken pipe".into()),
                Effect::MarkStopped
            ]
        );
        assert_eq!(m.state(), PromptState::Streaming);

        // The explicit end still lands normally afterwards.
        let effects = m.step(PromptEvent::OutputEnded);
        assert!(effects.contains(&Effect::Reprompt));
        assert_eq!(m.state(), PromptState::Idle);
    }

    #[test]
    fn server_cancel_exits_nonzero() {
        let mut m = machine(LoopMode::Subshell);
        m.step(line("wp plugin list"));
        m.step(PromptEvent::DispatchSucceeded);
        let effects = m.step(PromptEvent::ServerCancelled(Some("quota".into())));
        assert!(effects.contains(&Effect::Close(1)));
        assert_eq!(m.state(), PromptState::Closed);
    }

    #[test]
    fn first_interrupt_sends_cancel_byte_exactly_once() {
        let mut m = machine(LoopMode::Subshell);
        m.step(line("wp plugin list"));
        m.step(PromptEvent::DispatchSucceeded);
        let effects = m.step(PromptEvent::Interrupt);
        assert_eq!(
            effects
                .iter()
                .filter(|e| matches!(e, Effect::SendCancel))
                .count(),
            1
        );
        assert!(!effects.iter().any(|e| matches!(e, Effect::ForceQuit(_))));
    }

    #[test]
    fn second_consecutive_interrupt_force_quits() {
        let mut m = machine(LoopMode::Subshell);
        m.step(line("wp plugin list"));
        m.step(PromptEvent::DispatchSucceeded);
        m.step(PromptEvent::Interrupt);
        let effects = m.step(PromptEvent::Interrupt);
        assert_eq!(effects, vec![Effect::ForceQuit(1)]);
    }

    #[test]
    fn interrupt_counter_resets_when_a_command_completes() {
        let mut m = machine(LoopMode::Subshell);
        m.step(line("wp plugin list"));
        m.step(PromptEvent::DispatchSucceeded);
        m.step(PromptEvent::Interrupt);
        assert_eq!(m.sigint_count(), 1);
        m.step(PromptEvent::OutputEnded);
        assert_eq!(m.sigint_count(), 0);

        // The next command gets a fresh count: one interrupt cancels, it
        // does not force-quit.
        m.step(line("wp plugin list"));
        m.step(PromptEvent::DispatchSucceeded);
        let effects = m.step(PromptEvent::Interrupt);
        assert!(!effects.iter().any(|e| matches!(e, Effect::ForceQuit(_))));
    }

    #[test]
    fn interrupt_at_idle_only_reprompts() {
        let mut m = machine(LoopMode::Subshell);
        assert_eq!(m.step(PromptEvent::Interrupt), vec![Effect::Reprompt]);
        assert_eq!(m.sigint_count(), 0);
    }

    #[test]
    fn stale_events_are_ignored() {
        let mut m = machine(LoopMode::Subshell);
        assert!(m.step(PromptEvent::OutputEnded).is_empty());
        assert!(m.step(PromptEvent::DispatchSucceeded).is_empty());
        m.step(line("exit"));
        assert!(m.step(line("wp plugin list")).is_empty());
    }
}
