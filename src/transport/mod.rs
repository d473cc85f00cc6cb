// file: src/transport/mod.rs
// description: frame-level transport seam between the client and the network

pub mod memory;
pub mod tungstenite;

use crate::error::PantheonError;
use futures_util::{Sink, Stream, future::BoxFuture};
use url::Url;

pub use self::memory::{MemoryConnector, MemoryListener, MemoryPeer};
pub use self::tungstenite::TungsteniteConnector;

/// One WebSocket frame as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// A live, bidirectional frame connection.
pub trait Transport:
    Stream<Item = Result<TransportFrame, PantheonError>>
    + Sink<TransportFrame, Error = PantheonError>
    + Send
    + Unpin
{
}

impl<T> Transport for T where
    T: Stream<Item = Result<TransportFrame, PantheonError>>
        + Sink<TransportFrame, Error = PantheonError>
        + Send
        + Unpin
{
}

pub type BoxTransport = Box<dyn Transport>;

/// Opens transports. The client calls this once per connection attempt with
/// the fully built endpoint URL (token included).
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: Url) -> BoxFuture<'static, Result<BoxTransport, PantheonError>>;
}
