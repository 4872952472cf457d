//! The event stream over `tokio-tungstenite`.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use mirai_core::{BoxedFrameStream, FrameStream, TransportError, TransportResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Read side of a WebSocket event stream.
pub struct WsFrameStream {
    inner: WsStream,
    path: String,
}

/// Opens `url`. `path` is used for logging and errors instead of the full URL,
/// whose query holds the session key.
pub(crate) async fn connect(url: &str, path: &str) -> TransportResult<BoxedFrameStream> {
    info!(%path, "Connecting to event stream");

    let (inner, _response) = connect_async(url)
        .await
        .map_err(|e| TransportError::ConnectionFailed {
            url: path.to_string(),
            reason: format!("WebSocket connection failed: {e}"),
        })?;

    Ok(Box::new(WsFrameStream {
        inner,
        path: path.to_string(),
    }))
}

#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Text(String),
    Closed,
    Skip,
}

fn classify(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text.as_str().to_owned()),
        Message::Binary(data) => match String::from_utf8(data.to_vec()) {
            Ok(text) => Frame::Text(text),
            Err(_) => {
                warn!(len = data.len(), "Dropping non UTF-8 binary frame");
                Frame::Skip
            }
        },
        Message::Close(frame) => {
            debug!(?frame, "Received close frame");
            Frame::Closed
        }
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Frame::Skip,
    }
}

#[async_trait]
impl FrameStream for WsFrameStream {
    async fn next_frame(&mut self) -> TransportResult<Option<String>> {
        loop {
            match self.inner.next().await {
                None | Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => return Ok(None),
                Some(Ok(message)) => match classify(message) {
                    Frame::Text(text) => {
                        trace!(path = %self.path, len = text.len(), "Received frame");
                        return Ok(Some(text));
                    }
                    Frame::Closed => return Ok(None),
                    Frame::Skip => continue,
                },
                Some(Err(e)) => {
                    return Err(TransportError::ConnectionClosed {
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    async fn close(&mut self) -> TransportResult<()> {
        match self.inner.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                debug!(path = %self.path, "Event stream closed");
                Ok(())
            }
            Err(e) => Err(TransportError::Io(e.to_string())),
        }
    }
}
