// file: src/transport/memory.rs
// description: in-process transport for tests and embedding without a network

use super::{BoxTransport, Connector, TransportFrame};
use crate::error::{PantheonError, Result};
use futures_util::{Sink, Stream, future::BoxFuture};
use std::{
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use url::Url;

/// How the next connection attempt is answered.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    #[default]
    Accept,
    Refuse,
    /// The attempt never completes.
    Hang,
}

struct Shared {
    mode: ConnectMode,
    refuse_next: usize,
    dialled: Vec<Url>,
    accepted: mpsc::UnboundedSender<MemoryPeer>,
}

#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Mutex<Shared>>,
}

/// Server side of a [`MemoryConnector`]: yields one peer per accepted
/// connection.
pub struct MemoryListener {
    accepted: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryConnector {
    pub fn new() -> (Self, MemoryListener) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            shared: Arc::new(Mutex::new(Shared {
                mode: ConnectMode::Accept,
                refuse_next: 0,
                dialled: Vec::new(),
                accepted: tx,
            })),
        };
        (connector, MemoryListener { accepted: rx })
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_mode(&self, mode: ConnectMode) {
        self.lock().mode = mode;
    }

    /// Refuses the next `n` attempts regardless of the mode.
    pub fn refuse_next(&self, n: usize) {
        self.lock().refuse_next = n;
    }

    /// Number of connection attempts made so far.
    pub fn attempts(&self) -> usize {
        self.lock().dialled.len()
    }

    /// Every URL dialled, in order.
    pub fn dialled(&self) -> Vec<Url> {
        self.lock().dialled.clone()
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, url: Url) -> BoxFuture<'static, Result<BoxTransport>> {
        let mut shared = self.lock();
        shared.dialled.push(url.clone());

        let mode = if shared.refuse_next > 0 {
            shared.refuse_next -= 1;
            ConnectMode::Refuse
        } else {
            shared.mode
        };

        let outcome = match mode {
            ConnectMode::Hang => return Box::pin(futures_util::future::pending()),
            ConnectMode::Refuse => Err(PantheonError::ConnectionRefused {
                url: url.to_string(),
            }),
            ConnectMode::Accept => {
                let (to_server, from_client) = mpsc::unbounded_channel();
                let (to_client, from_server) = mpsc::unbounded_channel();
                let peer = MemoryPeer {
                    url: url.clone(),
                    outgoing: to_client,
                    incoming: from_client,
                };

                match shared.accepted.send(peer) {
                    Ok(()) => Ok(Box::new(MemoryTransport {
                        incoming: from_server,
                        outgoing: to_server,
                    }) as BoxTransport),
                    Err(_) => Err(PantheonError::ConnectionRefused {
                        url: url.to_string(),
                    }),
                }
            }
        };

        Box::pin(futures_util::future::ready(outcome))
    }
}

impl MemoryListener {
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accepted.recv().await
    }

    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accepted.try_recv().ok()
    }
}

/// The server end of one in-memory connection. Dropping it closes the
/// connection abruptly, without a close frame.
pub struct MemoryPeer {
    url: Url,
    outgoing: mpsc::UnboundedSender<TransportFrame>,
    incoming: mpsc::UnboundedReceiver<TransportFrame>,
}

impl MemoryPeer {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn send_frame(&self, frame: TransportFrame) -> bool {
        self.outgoing.send(frame).is_ok()
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send_frame(TransportFrame::Text(text.into()))
    }

    /// Sends a `{type, payload}` event frame.
    pub fn send_event(&self, event_type: &str, payload: serde_json::Value) -> bool {
        self.send_text(serde_json::json!({ "type": event_type, "payload": payload }).to_string())
    }

    pub async fn recv(&mut self) -> Option<TransportFrame> {
        self.incoming.recv().await
    }

    pub fn try_recv(&mut self) -> Option<TransportFrame> {
        self.incoming.try_recv().ok()
    }

    /// Next text frame, skipping control frames. `None` once the client side
    /// is gone.
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.incoming.recv().await? {
                TransportFrame::Text(text) => return Some(text),
                TransportFrame::Close => return None,
                _ => continue,
            }
        }
    }

    /// Whether the client dropped its end of the connection.
    pub fn is_closed(&self) -> bool {
        self.outgoing.is_closed()
    }
}

struct MemoryTransport {
    incoming: mpsc::UnboundedReceiver<TransportFrame>,
    outgoing: mpsc::UnboundedSender<TransportFrame>,
}

impl Stream for MemoryTransport {
    type Item = Result<TransportFrame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.incoming.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}

impl Sink<TransportFrame> for MemoryTransport {
    type Error = PantheonError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, frame: TransportFrame) -> Result<()> {
        self.outgoing
            .send(frame)
            .map_err(|_| PantheonError::ConnectionClosed)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }
}
