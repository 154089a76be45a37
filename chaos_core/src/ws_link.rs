//! WebSocket agent link - the request/feedback frames as text messages.
//!
//! The engine connects out to the agent's endpoint and keeps the socket for
//! the whole experiment. Control frames (ping/pong) are handled by the
//! socket itself and never surface as agent frames.

use crate::agent_link::AgentLink;
use async_trait::async_trait;
use chaos_env::EnvError;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

/// Persistent WebSocket connection to one agent.
pub struct WsLink<S> {
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    stream: Mutex<SplitStream<WebSocketStream<S>>>,
}

impl<S> WsLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wraps an established WebSocket.
    pub fn new(socket: WebSocketStream<S>) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }
}

impl WsLink<MaybeTlsStream<TcpStream>> {
    /// Connects to an agent endpoint such as `ws://10.0.0.4:8081/chaos`.
    pub async fn connect(url: &str) -> Result<Self, EnvError> {
        let (socket, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| EnvError::unreachable(format!("{} ({})", url, e)))?;
        info!("Connected to agent at {}", url);
        Ok(Self::new(socket))
    }
}

#[async_trait]
impl<S> AgentLink for WsLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, frame: String) -> Result<(), EnvError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(frame.into()))
            .await
            .map_err(|e| EnvError::network(format!("agent socket send failed: {}", e)))
    }

    async fn recv(&self) -> Result<String, EnvError> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.as_str().to_string()),
                Some(Ok(Message::Binary(bytes))) => {
                    return String::from_utf8(bytes.to_vec()).map_err(EnvError::serialization);
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("agent closed the socket: {:?}", frame);
                    return Err(EnvError::network("agent link closed"));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(EnvError::network(format!("agent socket receive failed: {}", e))),
                None => return Err(EnvError::network("agent link closed")),
            }
        }
    }
}
