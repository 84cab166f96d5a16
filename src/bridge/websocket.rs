//! WebSocket client transport for the persistent channel

use std::fmt;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::bridge::connection::Connector;
use crate::bridge::link::FrameChannel;
use crate::error::Result;

/// Dials a WebSocket endpoint
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<FrameChannel> {
        let (socket, response) = connect_async(self.url.as_str()).await?;
        debug!(status = %response.status(), "WebSocket handshake complete");
        Ok(pump(socket))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// What a received WebSocket message means for the frame channel
pub enum Received {
    Text(String),
    Close,
    Skip,
}

/// Message type of a WebSocket implementation
pub trait WireMessage: Send + 'static {
    fn text(frame: String) -> Self;
    fn classify(self) -> Received;
}

impl WireMessage for Message {
    fn text(frame: String) -> Self {
        Message::Text(frame)
    }

    fn classify(self) -> Received {
        match self {
            Message::Text(text) => Received::Text(text),
            Message::Binary(bytes) => text_from_binary(bytes),
            Message::Close(_) => Received::Close,
            _ => Received::Skip,
        }
    }
}

/// Binary frames are accepted when they hold UTF-8 text
pub fn text_from_binary(bytes: Vec<u8>) -> Received {
    match String::from_utf8(bytes) {
        Ok(text) => Received::Text(text),
        Err(_) => {
            warn!("Dropping non-UTF-8 binary frame");
            Received::Skip
        }
    }
}

/// Bridge a socket onto a pair of text-frame channels
///
/// The socket is closed once the outgoing sender is dropped. The incoming
/// receiver ends when the peer closes or the socket errors.
pub fn pump<S, M, E>(socket: S) -> FrameChannel
where
    S: Stream<Item = std::result::Result<M, E>> + Sink<M> + Send + 'static,
    <S as Sink<M>>::Error: fmt::Display + Send + 'static,
    M: WireMessage,
    E: fmt::Display + Send + 'static,
{
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if let Err(e) = sink.send(M::text(frame)).await {
                warn!("WebSocket write failed: {}", e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            let frame = match message.map(M::classify) {
                Ok(Received::Text(text)) => text,
                Ok(Received::Close) => break,
                Ok(Received::Skip) => continue,
                Err(e) => {
                    debug!("WebSocket read ended: {}", e);
                    break;
                }
            };
            if in_tx.send(frame).is_err() {
                break;
            }
        }
    });

    FrameChannel {
        outgoing: out_tx,
        incoming: in_rx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[test]
    fn test_classify_messages() {
        assert!(matches!(Message::Text("a".to_string()).classify(), Received::Text(t) if t == "a"));
        assert!(matches!(Message::Binary(b"{}".to_vec()).classify(), Received::Text(t) if t == "{}"));
        assert!(matches!(Message::Binary(vec![0xff, 0xfe]).classify(), Received::Skip));
        assert!(matches!(Message::Ping(Vec::new()).classify(), Received::Skip));
        assert!(matches!(Message::Close(None).classify(), Received::Close));
    }

    #[tokio::test]
    async fn test_pump_carries_frames_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            pump(accept_async(stream).await.unwrap())
        });

        let mut client = WsConnector::new(format!("ws://{}", addr)).connect().await.unwrap();
        let mut server = server.await.unwrap();

        client.outgoing.send("from client".to_string()).unwrap();
        assert_eq!(server.incoming.recv().await.unwrap(), "from client");
        server.outgoing.send("from server".to_string()).unwrap();
        assert_eq!(client.incoming.recv().await.unwrap(), "from server");

        drop(client);
        assert!(server.incoming.recv().await.is_none());
    }
}
