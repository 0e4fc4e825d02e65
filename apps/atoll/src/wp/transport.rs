//! Session transport: one WebSocket connection to the remote execution
//! service carrying a single command's input/output streams.
//!
//! The transport owns the socket and nothing else; it never touches process
//! stdio. Callers get a [`StreamPair`] of byte channels plus a lifecycle
//! event stream; on connection loss the pump reports `ReconnectAttempt` and
//! the caller decides whether to open a fresh transport at the tracked
//! offset.

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::wp::protocol::{ClientFrame, ControlFrame, SessionParams};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid execution endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("connection failed: {0}")]
    Connect(#[from] tungstenite::Error),
    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// The two half-duplex byte channels bound to one live connection.
pub struct StreamPair {
    /// Local input destined for the remote command.
    pub input: mpsc::UnboundedSender<Vec<u8>>,
    /// Command output as delivered by the service.
    pub output: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The command finished; all output has been delivered.
    Ended,
    /// The server unilaterally terminated the command.
    Cancelled { reason: Option<String> },
    /// Transport-level fault; the session stays open until end/cancel.
    Errored { message: String },
    /// The credential or input token was rejected. Terminal for this
    /// connection; never retried automatically.
    Unauthorized { message: Option<String> },
    /// The connection dropped without a terminal frame. The caller may
    /// re-open at the tracked offset.
    ReconnectAttempt,
}

pub struct SessionTransport {
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
    task: Option<JoinHandle<()>>,
}

impl SessionTransport {
    /// Connect, authenticate with the bearer credential, and announce the
    /// command with the opening `cmd` frame.
    pub async fn open(
        endpoint: &Url,
        bearer: Option<&str>,
        params: &SessionParams,
    ) -> Result<(Self, StreamPair), TransportError> {
        let mut request = endpoint
            .as_str()
            .into_client_request()
            .map_err(|err| TransportError::InvalidEndpoint(err.to_string()))?;
        if let Some(token) = bearer {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|err| TransportError::Handshake(err.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (mut ws_stream, _) = connect_async(request).await?;

        let hello = serde_json::to_string(&ClientFrame::Cmd(params.clone()))
            .map_err(|err| TransportError::Handshake(err.to_string()))?;
        ws_stream.send(Message::Text(hello)).await?;

        let (tx_in, rx_in) = mpsc::unbounded_channel::<Vec<u8>>();
        let (tx_out, rx_out) = mpsc::unbounded_channel::<Vec<u8>>();
        let (tx_events, rx_events) = mpsc::unbounded_channel::<TransportEvent>();

        let command_id = params.command_id.clone();
        let task = tokio::spawn(async move {
            run_pump(ws_stream, rx_in, tx_out, tx_events).await;
            tracing::debug!(target: "atoll::transport", %command_id, "transport pump finished");
        });

        Ok((
            Self {
                events: rx_events,
                task: Some(task),
            },
            StreamPair {
                input: tx_in,
                output: rx_out,
            },
        ))
    }

    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Derive the execution service endpoint from the API base URL.
pub fn execution_endpoint(api_base: &Url) -> Result<Url, TransportError> {
    let mut endpoint = api_base
        .join("wp/stream")
        .map_err(|err| TransportError::InvalidEndpoint(err.to_string()))?;
    let scheme = match endpoint.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::InvalidEndpoint(format!(
                "unsupported scheme '{other}'"
            )));
        }
    };
    endpoint
        .set_scheme(scheme)
        .map_err(|_| TransportError::InvalidEndpoint("unable to set ws scheme".into()))?;
    Ok(endpoint)
}

async fn run_pump(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut rx_in: mpsc::UnboundedReceiver<Vec<u8>>,
    tx_out: mpsc::UnboundedSender<Vec<u8>>,
    tx_events: mpsc::UnboundedSender<TransportEvent>,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Local input flows to the remote side as binary frames.
    let send_task = tokio::spawn(async move {
        while let Some(data) = rx_in.recv().await {
            if ws_sender.send(Message::Binary(data)).await.is_err() {
                break;
            }
        }
    });

    // A terminal control frame means the close that follows is expected; a
    // bare close without one is a candidate for reconnection.
    let mut finished = false;
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Binary(data)) => {
                if tx_out.send(data).is_err() {
                    finished = true;
                    break;
                }
            }
            Ok(Message::Text(text)) => match serde_json::from_str::<ControlFrame>(&text) {
                Ok(ControlFrame::End) => {
                    let _ = tx_events.send(TransportEvent::Ended);
                    finished = true;
                    break;
                }
                Ok(ControlFrame::Cancel { reason }) => {
                    let _ = tx_events.send(TransportEvent::Cancelled { reason });
                    finished = true;
                    break;
                }
                Ok(ControlFrame::Error { message }) => {
                    let _ = tx_events.send(TransportEvent::Errored { message });
                }
                Ok(ControlFrame::Unauthorized { message }) => {
                    let _ = tx_events.send(TransportEvent::Unauthorized { message });
                    finished = true;
                    break;
                }
                Err(err) => {
                    tracing::debug!(
                        target: "atoll::transport",
                        error = %err,
                        "ignoring unrecognized control frame"
                    );
                }
            },
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    if !finished {
        let _ = tx_events.send(TransportEvent::ReconnectAttempt);
    }

    send_task.abort();
    let _ = send_task.await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_endpoint_maps_http_schemes_to_ws() {
        let https = Url::parse("https://api.atoll.sh/").unwrap();
        assert_eq!(
            execution_endpoint(&https).unwrap().as_str(),
            "wss://api.atoll.sh/wp/stream"
        );

        let http = Url::parse("http://127.0.0.1:4000/").unwrap();
        assert_eq!(
            execution_endpoint(&http).unwrap().as_str(),
            "ws://127.0.0.1:4000/wp/stream"
        );
    }

    #[test]
    fn execution_endpoint_rejects_unknown_schemes() {
        let ftp = Url::parse("ftp://api.atoll.sh/").unwrap();
        assert!(matches!(
            execution_endpoint(&ftp),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }
}
