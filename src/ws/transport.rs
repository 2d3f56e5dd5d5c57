//! Transport seam between the connection manager and the socket library.
//!
//! The manager only ever sees [`Frame`]s flowing through a boxed sink and
//! stream, so the tungstenite-backed production connector and the in-memory
//! connector used by tests are interchangeable.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::protocol};
use tracing::debug;

use crate::{infra::logging::targets, prelude::*, WsError};

/// A transport-level frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<String>),
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = WsError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = std::result::Result<Frame, WsError>> + Send>>;

/// An open, split connection.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

/// Opens transports. Implementations must be cheap to call repeatedly; the
/// connection manager invokes `connect` once per (re)connect attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Transport>;
}

/// Production connector over `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

fn into_protocol(frame: Frame) -> protocol::Message {
    match frame {
        Frame::Text(text) => protocol::Message::Text(text),
        Frame::Ping(payload) => protocol::Message::Ping(payload),
        Frame::Pong(payload) => protocol::Message::Pong(payload),
        Frame::Close(reason) => protocol::Message::Close(reason.map(|r| {
            protocol::CloseFrame {
                code: protocol::frame::coding::CloseCode::Normal,
                reason: r.into(),
            }
        })),
    }
}

fn from_protocol(message: protocol::Message) -> Option<Frame> {
    match message {
        protocol::Message::Text(text) => Some(Frame::Text(text)),
        protocol::Message::Binary(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Some(Frame::Text(text)),
            Err(err) => {
                debug!(target: targets::WS, "Dropping non-utf8 binary frame: {err}");
                None
            }
        },
        protocol::Message::Ping(payload) => Some(Frame::Ping(payload)),
        protocol::Message::Pong(payload) => Some(Frame::Pong(payload)),
        protocol::Message::Close(frame) => Some(Frame::Close(frame.map(|f| {
            format!("{} {}", u16::from(f.code), f.reason)
        }))),
        protocol::Message::Frame(_) => None,
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Transport> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| WsError::Connection(e.to_string()))?;
        let (writer, reader) = ws.split();

        let sink = writer
            .sink_map_err(|e| WsError::Send(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, WsError>(into_protocol(frame))));

        let stream = reader.filter_map(|item| {
            future::ready(match item {
                Ok(message) => from_protocol(message).map(Ok),
                Err(e) => Some(Err(WsError::Read(e.to_string()))),
            })
        });

        Ok(Transport {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
