// file: src/transport/tungstenite.rs
// description: network transport over tokio-tungstenite with rustls for wss endpoints

use super::{BoxTransport, Connector, TransportFrame};
use crate::error::{PantheonError, Result};
use futures_util::{Sink, Stream, future::BoxFuture};
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async_tls_with_config, tungstenite::Message,
};
use tracing::debug;
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials real endpoints. `wss://` uses a rustls client config with the
/// webpki root store; `ws://` stays plain TCP.
#[derive(Clone)]
pub struct TungsteniteConnector {
    tls: Arc<rustls::ClientConfig>,
}

impl TungsteniteConnector {
    pub fn new() -> Result<Self> {
        let tls = rustls::ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()?
        .with_root_certificates(rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        })
        .with_no_client_auth();

        Ok(Self { tls: Arc::new(tls) })
    }
}

impl Connector for TungsteniteConnector {
    fn connect(&self, url: Url) -> BoxFuture<'static, Result<BoxTransport>> {
        let tls = Arc::clone(&self.tls);
        Box::pin(async move {
            let (stream, response) = connect_async_tls_with_config(
                url.as_str(),
                None,
                true,
                Some(tokio_tungstenite::Connector::Rustls(tls)),
            )
            .await?;
            debug!(status = %response.status(), host = url.host_str(), "WebSocket handshake complete");

            Ok(Box::new(TungsteniteTransport { inner: stream }) as BoxTransport)
        })
    }
}

struct TungsteniteTransport {
    inner: WsStream,
}

impl From<TransportFrame> for Message {
    fn from(frame: TransportFrame) -> Self {
        match frame {
            TransportFrame::Text(text) => Message::Text(text.into()),
            TransportFrame::Binary(data) => Message::Binary(data.into()),
            TransportFrame::Ping(data) => Message::Ping(data.into()),
            TransportFrame::Pong(data) => Message::Pong(data.into()),
            TransportFrame::Close => Message::Close(None),
        }
    }
}

fn into_frame(message: Message) -> Option<TransportFrame> {
    match message {
        Message::Text(text) => Some(TransportFrame::Text(text.as_str().to_owned())),
        Message::Binary(data) => Some(TransportFrame::Binary(data.to_vec())),
        Message::Ping(data) => Some(TransportFrame::Ping(data.to_vec())),
        Message::Pong(data) => Some(TransportFrame::Pong(data.to_vec())),
        Message::Close(_) => Some(TransportFrame::Close),
        // raw frames only surface when reading with a custom config
        Message::Frame(_) => None,
    }
}

impl Stream for TungsteniteTransport {
    type Item = Result<TransportFrame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            return match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(message))) => match into_frame(message) {
                    Some(frame) => Poll::Ready(Some(Ok(frame))),
                    None => continue,
                },
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(PantheonError::from(e)))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            };
        }
    }
}

impl Sink<TransportFrame> for TungsteniteTransport {
    type Error = PantheonError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Pin::new(&mut self.inner)
            .poll_ready(cx)
            .map_err(PantheonError::from)
    }

    fn start_send(mut self: Pin<&mut Self>, frame: TransportFrame) -> Result<()> {
        Pin::new(&mut self.inner)
            .start_send(Message::from(frame))
            .map_err(PantheonError::from)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Pin::new(&mut self.inner)
            .poll_flush(cx)
            .map_err(PantheonError::from)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Pin::new(&mut self.inner)
            .poll_close(cx)
            .map_err(PantheonError::from)
    }
}
