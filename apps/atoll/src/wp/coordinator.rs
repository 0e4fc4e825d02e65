//! Stream coordinator: binds one transport stream pair to process stdio.
//!
//! Binding is modelled as an owned resource. A [`StreamBinding`] must be
//! released (dropped via [`StreamBinding::unbind`]) before a successor is
//! created, so local stdin is never piped into two remote inputs at once;
//! that is the double-pipe hazard the reconnect path would otherwise invite.

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::wp::protocol::CANCEL_BYTE;
use crate::wp::transport::StreamPair;

/// Spawn the single reader that owns local stdin for the process lifetime.
/// Chunks buffer in the channel while the runner is busy (for example while
/// re-opening a transport), which is what keeps keystrokes from being lost
/// during a reconnect gap.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<Vec<u8>> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

/// One live binding between a transport stream pair and the runner.
pub struct StreamBinding {
    input: mpsc::UnboundedSender<Vec<u8>>,
    output: mpsc::UnboundedReceiver<Vec<u8>>,
    output_done: bool,
}

impl StreamBinding {
    pub fn bind(pair: StreamPair) -> Self {
        Self {
            input: pair.input,
            output: pair.output,
            output_done: false,
        }
    }

    /// Release the binding. Dropping the input sender closes the transport's
    /// outbound half; the method exists so release is visible at call sites.
    pub fn unbind(self) {}

    /// Forward a chunk of local input to the remote command. Send failures
    /// mean the pump is gone; the transport event stream reports that
    /// separately, so they are ignored here.
    pub fn forward_input(&self, chunk: Vec<u8>) {
        let _ = self.input.send(chunk);
    }

    pub fn send_cancel_byte(&self) {
        let _ = self.input.send(vec![CANCEL_BYTE]);
    }

    /// Next chunk of remote output, or `None` once the stream is exhausted.
    /// After `None` the caller must stop polling (`output_done` gates the
    /// select arm); a closed channel resolves immediately and would spin
    /// the loop.
    pub async fn next_output(&mut self) -> Option<Vec<u8>> {
        match self.output.recv().await {
            Some(chunk) => Some(chunk),
            None => {
                self.output_done = true;
                None
            }
        }
    }

    pub fn output_done(&self) -> bool {
        self.output_done
    }

    /// Drain whatever output is already queued. Data and lifecycle events
    /// travel on separate channels; the pump always queues data before its
    /// terminal event, so draining here before handling `end`/`cancel`
    /// preserves delivery order.
    pub fn drain_output(&mut self) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        while let Ok(chunk) = self.output.try_recv() {
            chunks.push(chunk);
        }
        chunks
    }
}
