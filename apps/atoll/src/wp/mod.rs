//! The `wp` command: remote command execution with a streaming session.
//!
//! One runner task owns all mutable state (prompt machine, session
//! controller, the active binding) and interprets the effects the prompt
//! machine emits. Transport I/O and the stdin reader are pump tasks behind
//! channels, so there is exactly one logical flow of control and no locks.

pub mod coordinator;
pub mod prompt;
pub mod protocol;
pub mod session;
pub mod transport;

use std::collections::VecDeque;
use std::io::{self, Write};
use std::time::Duration;

use time::format_description::well_known::Rfc3339;
use tokio::sync::mpsc;
use url::Url;

use crate::api::{ApiClient, Environment};
use crate::cli::WpArgs;
use crate::error::{CliError, report_api_error};
use coordinator::{StreamBinding, spawn_stdin_reader};
use prompt::{Effect, LoopMode, PromptEvent, PromptMachine, PromptState};
use session::{Session, SessionController};
use transport::{SessionTransport, TransportEvent, execution_endpoint};

const LOG_LIST_LIMIT: u32 = 10;
const RECONNECT_ATTEMPTS: u32 = 3;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

pub async fn run(
    api: &ApiClient,
    environment: &Environment,
    args: &WpArgs,
) -> Result<i32, CliError> {
    // `--log` with no id lists recent completed commands and stops there.
    if args.log.as_deref() == Some("true") {
        return list_completed(api, environment).await;
    }

    let mode = match (&args.log, args.args.is_empty()) {
        (Some(_), _) => LoopMode::LogAttach,
        (None, true) => LoopMode::Subshell,
        (None, false) => LoopMode::OneShot,
    };

    // The guard runs before any dispatch call; declining is a clean cancel.
    // Log replay is read-only and skips it.
    if environment.is_production && !args.yes && mode != LoopMode::LogAttach {
        if !confirm_production(environment)? {
            println!("Aborted.");
            return Ok(0);
        }
    }

    let endpoint = execution_endpoint(api.config().base_url())?;
    let (columns, rows) = crossterm::terminal::size().unwrap_or((80, 24));

    let mut runner = Runner {
        api,
        environment,
        endpoint,
        machine: PromptMachine::new(mode),
        controller: SessionController::new(mode != LoopMode::Subshell),
        active: None,
        line_buf: String::new(),
        exit: None,
        columns,
        rows,
    };

    let mut stdin_rx = spawn_stdin_reader();
    let mut stdin_done = false;
    let mut interrupts = Interrupts::new()?;

    match mode {
        LoopMode::OneShot => {
            let line = format!("{} {}", prompt::INVOCATION_PREFIX, args.args.join(" "));
            runner.feed(PromptEvent::Line(line)).await?;
        }
        LoopMode::LogAttach => {
            if let Some(id) = &args.log {
                runner.feed(PromptEvent::Line(id.clone())).await?;
            }
        }
        LoopMode::Subshell => {
            println!(
                "🪸  wp subshell for {}/{}. Type 'exit' to quit.",
                environment.app, environment.env
            );
            runner.show_prompt()?;
        }
    }

    loop {
        if let Some(code) = runner.exit {
            return Ok(code);
        }

        let wake = next_wake(
            &mut stdin_rx,
            stdin_done,
            &mut interrupts,
            runner.active.as_mut(),
        )
        .await;
        match wake {
            Wake::Stdin(Some(chunk)) => runner.handle_stdin(chunk).await?,
            Wake::Stdin(None) => stdin_done = true,
            Wake::Output(chunk) => runner.write_output(&chunk)?,
            Wake::OutputClosed => {}
            Wake::Event(event) => runner.handle_transport_event(&mut stdin_rx, event).await?,
            Wake::EventsClosed => {
                // The pump is gone without a terminal frame reaching us.
                runner
                    .feed(PromptEvent::StreamFailed("connection closed".into()))
                    .await?;
            }
            Wake::Interrupt => runner.feed(PromptEvent::Interrupt).await?,
        }

        // A line pasted while a command was running surfaces as soon as the
        // prompt is idle again, without waiting for another keystroke.
        runner.drain_buffered_lines().await?;

        // Exhausted stdin at an idle prompt ends the session, whether the
        // EOF arrived just now or while a command was still streaming.
        if stdin_done
            && runner.exit.is_none()
            && runner.machine.state() == PromptState::Idle
        {
            runner.feed(PromptEvent::Line("exit".into())).await?;
        }
    }
}

/// Persistent interrupt listener. Signals queue on the underlying stream, so
/// a Ctrl-C that lands while the runner is busy between selects (awaiting a
/// dispatch round trip, sleeping out a reconnect backoff) wakes the next
/// poll rather than vanishing.
#[cfg(unix)]
struct Interrupts(tokio::signal::unix::Signal);

#[cfg(unix)]
impl Interrupts {
    fn new() -> io::Result<Self> {
        let stream = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
        Ok(Self(stream))
    }

    async fn recv(&mut self) {
        self.0.recv().await;
    }
}

#[cfg(not(unix))]
struct Interrupts;

#[cfg(not(unix))]
impl Interrupts {
    fn new() -> io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn list_completed(api: &ApiClient, environment: &Environment) -> Result<i32, CliError> {
    let commands = api
        .list_completed_commands(&environment.app_id, LOG_LIST_LIMIT)
        .await?;
    if commands.is_empty() {
        println!("No completed commands for {}.", environment.app);
        return Ok(0);
    }
    println!("Recent completed commands (attach with 'atoll wp --log <id>'):");
    for command in commands {
        let started = command
            .started_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| "-".into());
        println!("  {}  {}  wp {}", started, command.command_id, command.command);
    }
    Ok(0)
}

fn confirm_production(environment: &Environment) -> io::Result<bool> {
    print!(
        "⚠️  {}/{} is a production environment. Continue? (y/N) ",
        environment.app, environment.env
    );
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes" | "YES"))
}

/// One live session: transport, binding, and the flags that shape how its
/// loss is interpreted.
struct ActiveSession {
    session: Session,
    transport: SessionTransport,
    binding: StreamBinding,
    /// Set after a local interrupt: the next connection loss ends the
    /// command instead of triggering a reconnect.
    cancel_requested: bool,
}

impl ActiveSession {
    fn teardown(self) {
        // Binding released before any successor can be created.
        self.binding.unbind();
        drop(self.transport);
    }
}

enum Wake {
    Stdin(Option<Vec<u8>>),
    Output(Vec<u8>),
    OutputClosed,
    Event(TransportEvent),
    EventsClosed,
    Interrupt,
}

async fn next_wake(
    stdin_rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    stdin_done: bool,
    interrupts: &mut Interrupts,
    active: Option<&mut ActiveSession>,
) -> Wake {
    match active {
        Some(active) if !active.binding.output_done() => tokio::select! {
            chunk = stdin_rx.recv(), if !stdin_done => Wake::Stdin(chunk),
            output = active.binding.next_output() => match output {
                Some(chunk) => Wake::Output(chunk),
                None => Wake::OutputClosed,
            },
            event = active.transport.events.recv() => match event {
                Some(event) => Wake::Event(event),
                None => Wake::EventsClosed,
            },
            _ = interrupts.recv() => Wake::Interrupt,
        },
        Some(active) => tokio::select! {
            chunk = stdin_rx.recv(), if !stdin_done => Wake::Stdin(chunk),
            event = active.transport.events.recv() => match event {
                Some(event) => Wake::Event(event),
                None => Wake::EventsClosed,
            },
            _ = interrupts.recv() => Wake::Interrupt,
        },
        None => tokio::select! {
            chunk = stdin_rx.recv(), if !stdin_done => Wake::Stdin(chunk),
            _ = interrupts.recv() => Wake::Interrupt,
        },
    }
}

struct Runner<'a> {
    api: &'a ApiClient,
    environment: &'a Environment,
    endpoint: Url,
    machine: PromptMachine,
    controller: SessionController,
    active: Option<ActiveSession>,
    line_buf: String,
    exit: Option<i32>,
    columns: u16,
    rows: u16,
}

impl Runner<'_> {
    /// Drive the machine with one event, carrying out every effect. Effects
    /// that complete asynchronously (dispatch, transport open) produce
    /// follow-up events which are processed in order.
    async fn feed(&mut self, event: PromptEvent) -> Result<(), CliError> {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            for effect in self.machine.step(event) {
                if let Some(follow_up) = self.apply_effect(effect).await? {
                    queue.push_back(follow_up);
                }
            }
        }
        Ok(())
    }

    async fn apply_effect(&mut self, effect: Effect) -> Result<Option<PromptEvent>, CliError> {
        match effect {
            Effect::Reprompt => {
                self.show_prompt()?;
                Ok(None)
            }
            Effect::PrintError(message) => {
                eprintln!("Error: {message}");
                Ok(None)
            }
            Effect::PrintNotice(message) => {
                eprintln!("{message}");
                Ok(None)
            }
            Effect::Dispatch(command) => Ok(Some(self.dispatch(&command).await)),
            Effect::AttachLogs(command_id) => {
                let session = Session::logs(command_id);
                match self.open_session(&session).await {
                    Ok(()) => Ok(Some(PromptEvent::DispatchSucceeded)),
                    Err(err) => {
                        eprintln!("Error: {err}");
                        Ok(Some(PromptEvent::DispatchFailed))
                    }
                }
            }
            Effect::BeginStreaming => {
                self.controller.mark_running();
                Ok(None)
            }
            Effect::FinishCommand { trailing_newline } => {
                self.finish_command(trailing_newline)?;
                Ok(None)
            }
            Effect::MarkStopped => {
                self.controller.mark_stopped();
                Ok(None)
            }
            Effect::SendCancel => {
                if let Some(active) = &self.active {
                    active.binding.send_cancel_byte();
                }
                Ok(None)
            }
            Effect::RequestOutputEnd => {
                if let Some(active) = &mut self.active {
                    active.cancel_requested = true;
                }
                Ok(None)
            }
            Effect::Close(code) => {
                self.exit = Some(code);
                Ok(None)
            }
            Effect::ForceQuit(code) => {
                // Second consecutive interrupt: no further cleanup.
                std::process::exit(code);
            }
        }
    }

    async fn dispatch(&mut self, command: &str) -> PromptEvent {
        let result = self
            .api
            .dispatch_wp_command(&self.environment.app_id, &self.environment.env_id, command)
            .await;
        match result {
            Ok(handle) => {
                tracing::debug!(
                    target: "atoll::wp",
                    command_id = %handle.command_id,
                    "command registered"
                );
                let session = Session::new(handle.command_id, handle.input_token);
                match self.open_session(&session).await {
                    Ok(()) => PromptEvent::DispatchSucceeded,
                    Err(err) => {
                        eprintln!("Error: {err}");
                        PromptEvent::DispatchFailed
                    }
                }
            }
            Err(err) => {
                report_api_error(&err);
                PromptEvent::DispatchFailed
            }
        }
    }

    /// Open a transport for the session at the controller's tracked offset
    /// and bind its stream pair. Any previous binding is released first.
    async fn open_session(&mut self, session: &Session) -> Result<(), CliError> {
        if let Some(previous) = self.active.take() {
            previous.teardown();
        }
        let params = protocol::SessionParams {
            command_id: session.command_id.clone(),
            input_token: session.input_token.clone(),
            columns: self.columns,
            rows: self.rows,
            offset: self.controller.offset(),
            action: session.action,
        };
        let bearer = self.api.config().bearer_token();
        let (transport, pair) = SessionTransport::open(&self.endpoint, bearer, &params).await?;
        self.active = Some(ActiveSession {
            session: session.clone(),
            transport,
            binding: StreamBinding::bind(pair),
            cancel_requested: false,
        });
        Ok(())
    }

    async fn handle_stdin(&mut self, chunk: Vec<u8>) -> Result<(), CliError> {
        match self.machine.state() {
            PromptState::Streaming => {
                if let Some(active) = &self.active {
                    active.binding.forward_input(chunk);
                }
            }
            _ => {
                self.line_buf.push_str(&String::from_utf8_lossy(&chunk));
                self.drain_buffered_lines().await?;
            }
        }
        Ok(())
    }

    async fn drain_buffered_lines(&mut self) -> Result<(), CliError> {
        while self.machine.state() == PromptState::Idle {
            let Some(newline) = self.line_buf.find('\n') else {
                break;
            };
            let line: String = self.line_buf.drain(..=newline).collect();
            self.feed(PromptEvent::Line(line.trim_end().to_string()))
                .await?;
        }
        Ok(())
    }

    async fn handle_transport_event(
        &mut self,
        stdin_rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
        event: TransportEvent,
    ) -> Result<(), CliError> {
        match event {
            TransportEvent::Ended => self.feed(PromptEvent::OutputEnded).await,
            TransportEvent::Cancelled { reason } => {
                self.feed(PromptEvent::ServerCancelled(reason)).await
            }
            TransportEvent::Errored { message } => {
                let message = if message.to_ascii_lowercase().contains("rate limit") {
                    "rate limit exceeded; wait a moment and try again".to_string()
                } else {
                    message
                };
                self.feed(PromptEvent::StreamErrored(message)).await
            }
            TransportEvent::Unauthorized { message } => {
                let message = match message {
                    Some(message) => format!("authorization rejected: {message}"),
                    None => "authorization rejected".to_string(),
                };
                self.feed(PromptEvent::StreamFailed(message)).await
            }
            TransportEvent::ReconnectAttempt => self.reconnect(stdin_rx).await,
        }
    }

    /// The connection dropped mid-command. After a local cancel that is the
    /// expected end; otherwise re-open at the tracked offset so no delivered
    /// output is replayed. The prompt machine stays in `Streaming` the whole
    /// time; a reconnect is not an error.
    async fn reconnect(
        &mut self,
        stdin_rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Result<(), CliError> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };
        let session = active.session.clone();
        let cancel_requested = active.cancel_requested;
        active.teardown();

        if cancel_requested {
            return self.feed(PromptEvent::OutputEnded).await;
        }

        tracing::info!(
            target: "atoll::wp",
            command_id = %session.command_id,
            offset = self.controller.offset(),
            "connection lost; reconnecting"
        );

        let mut last_error = None;
        for attempt in 1..=RECONNECT_ATTEMPTS {
            match self.open_session(&session).await {
                Ok(()) => {
                    // Keystrokes typed during the gap were absorbed by the
                    // stdin channel; discard them rather than replaying a
                    // stale burst into the fresh connection.
                    while stdin_rx.try_recv().is_ok() {}
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(
                        target: "atoll::wp",
                        attempt,
                        error = %err,
                        "reconnect attempt failed"
                    );
                    last_error = Some(err);
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            }
        }

        let message = last_error
            .map(|err| err.to_string())
            .unwrap_or_else(|| "reconnect failed".into());
        self.feed(PromptEvent::StreamFailed(message)).await
    }

    /// The command is over: drain and print anything still queued, apply the
    /// trailing-newline shim, release the binding, reset the offset.
    fn finish_command(&mut self, trailing_newline: bool) -> Result<(), CliError> {
        if let Some(mut active) = self.active.take() {
            for chunk in active.binding.drain_output() {
                self.write_output(&chunk)?;
            }
            active.teardown();
        }
        if trailing_newline {
            let mut stdout = io::stdout().lock();
            stdout.write_all(b"\n")?;
            stdout.flush()?;
        }
        self.controller.complete_command();
        Ok(())
    }

    fn write_output(&mut self, chunk: &[u8]) -> Result<(), CliError> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(chunk)?;
        stdout.flush()?;
        self.controller.note_output(chunk.len());
        Ok(())
    }

    fn show_prompt(&self) -> Result<(), CliError> {
        if self.controller.muted() {
            return Ok(());
        }
        print!("{}.{}> ", self.environment.app, self.environment.env);
        io::stdout().flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::Router;
    use axum::extract::State;
    use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
    use axum::response::Response;
    use axum::routing::get;
    use tokio::net::TcpListener;

    use crate::api::ApiConfig;
    use crate::wp::protocol::SessionParams;

    /// Mock execution service: the first connection streams one chunk and
    /// drops without a close frame, every later connection ends normally.
    #[derive(Clone)]
    struct ScriptState {
        hellos: mpsc::UnboundedSender<SessionParams>,
        connections: Arc<AtomicUsize>,
    }

    async fn start_script_server() -> (Url, mpsc::UnboundedReceiver<SessionParams>) {
        let (hello_tx, hello_rx) = mpsc::unbounded_channel();
        let state = ScriptState {
            hellos: hello_tx,
            connections: Arc::new(AtomicUsize::new(0)),
        };
        let app = Router::new()
            .route("/wp/stream", get(accept))
            .with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let url = Url::parse(&format!("ws://{addr}/wp/stream")).unwrap();
        (url, hello_rx)
    }

    async fn accept(ws: WebSocketUpgrade, State(state): State<ScriptState>) -> Response {
        ws.on_upgrade(move |socket| drive(socket, state))
    }

    async fn drive(mut socket: WebSocket, state: ScriptState) {
        let Some(Ok(Message::Text(hello))) = socket.recv().await else {
            return;
        };
        let params: SessionParams = serde_json::from_str(&hello).unwrap();
        let _ = state.hellos.send(params);
        if state.connections.fetch_add(1, Ordering::SeqCst) == 0 {
            socket
                .send(Message::Binary(b"Success: updated.".to_vec()))
                .await
                .unwrap();
            // Dropped here without a close frame: an abnormal disconnect.
        } else {
            socket
                .send(Message::Text(r#"{"type":"end"}"#.into()))
                .await
                .unwrap();
        }
    }

    fn test_environment() -> Environment {
        Environment {
            app_id: "app-1".into(),
            env_id: "env-1".into(),
            app: "shop".into(),
            env: "develop".into(),
            is_production: false,
        }
    }

    fn test_runner<'a>(
        api: &'a ApiClient,
        environment: &'a Environment,
        endpoint: Url,
    ) -> Runner<'a> {
        Runner {
            api,
            environment,
            endpoint,
            machine: PromptMachine::new(LoopMode::Subshell),
            controller: SessionController::new(true),
            active: None,
            line_buf: String::new(),
            exit: None,
            columns: 80,
            rows: 24,
        }
    }

    #[tokio::test]
    async fn reconnect_reopens_at_the_accumulated_offset() {
        let (endpoint, mut hellos) = start_script_server().await;
        let api = ApiClient::new(ApiConfig::new("http://127.0.0.1:1").unwrap()).unwrap();
        let environment = test_environment();
        let mut runner = test_runner(&api, &environment, endpoint);

        let session = Session::new("cmd-1".into(), "tok-1".into());
        runner.open_session(&session).await.unwrap();
        assert_eq!(hellos.recv().await.unwrap().offset, 0);

        let active = runner.active.as_mut().unwrap();
        let chunk = active.binding.next_output().await.unwrap();
        runner.controller.note_output(chunk.len());

        let event = runner
            .active
            .as_mut()
            .unwrap()
            .transport
            .events
            .recv()
            .await
            .unwrap();
        assert_eq!(event, TransportEvent::ReconnectAttempt);

        // Keystrokes typed during the gap sit in the stdin channel.
        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel();
        stdin_tx.send(b"stale input\n".to_vec()).unwrap();

        runner.reconnect(&mut stdin_rx).await.unwrap();

        // The fresh connection announces the same command at the byte count
        // already delivered, and the gap input was discarded.
        let hello = hellos.recv().await.unwrap();
        assert_eq!(hello.offset, chunk.len() as u64);
        assert_eq!(hello.command_id, "cmd-1");
        assert_eq!(hello.input_token, "tok-1");
        assert!(stdin_rx.try_recv().is_err());

        let event = runner
            .active
            .as_mut()
            .unwrap()
            .transport
            .events
            .recv()
            .await
            .unwrap();
        assert_eq!(event, TransportEvent::Ended);
    }

    #[tokio::test]
    async fn pasted_line_parked_during_a_command_runs_once_idle() {
        let api = ApiClient::new(ApiConfig::new("http://127.0.0.1:1").unwrap()).unwrap();
        let environment = test_environment();
        let endpoint = Url::parse("ws://127.0.0.1:1/wp/stream").unwrap();
        let mut runner = test_runner(&api, &environment, endpoint);

        runner.machine.step(PromptEvent::Line("wp plugin list".into()));
        runner.machine.step(PromptEvent::DispatchSucceeded);
        assert_eq!(runner.machine.state(), PromptState::Streaming);

        // Pasted together with the command line; parked while streaming.
        runner.line_buf.push_str("exit\n");
        runner.drain_buffered_lines().await.unwrap();
        assert!(runner.exit.is_none());

        let (_stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        runner
            .handle_transport_event(&mut stdin_rx, TransportEvent::Ended)
            .await
            .unwrap();
        assert_eq!(runner.machine.state(), PromptState::Idle);

        // The event loop drains the buffer after every wake, so the parked
        // line runs without another keystroke.
        runner.drain_buffered_lines().await.unwrap();
        assert_eq!(runner.exit, Some(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn interrupt_during_a_busy_stretch_wakes_the_next_poll() {
        let mut interrupts = Interrupts::new().unwrap();

        // Delivered while nothing polls the stream, as during a dispatch
        // round trip or a reconnect backoff sleep.
        unsafe {
            libc::raise(libc::SIGINT);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::time::timeout(Duration::from_secs(1), interrupts.recv())
            .await
            .expect("queued interrupt should wake the next poll");
    }
}
