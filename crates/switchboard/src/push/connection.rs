//! Push channel capability and its WebSocket implementation.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::debug;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::{Error, Result};

/// Opens push channels.
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, url: &str, headers: &[(String, String)])
    -> Result<Box<dyn PushChannel>>;
}

/// An open push connection.
///
/// `read` and `write` may be called concurrently from different tasks.
/// `read` fails with [`Error::ConnectionClosed`] once the peer has closed.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Next inbound data frame.
    async fn read(&self) -> Result<Vec<u8>>;

    async fn write(&self, frame: &[u8]) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// tokio-tungstenite connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<Box<dyn PushChannel>> {
        let mut request = url.into_client_request()?;
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::InvalidRequest(format!("header {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::InvalidRequest(format!("header {name}: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (socket, response) = connect_async(request).await?;
        debug!("push connection upgraded ({})", response.status());

        let (sink, stream) = socket.split();
        Ok(Box::new(WsChannel {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }))
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct WsChannel {
    sink: Mutex<SplitSink<Socket, Message>>,
    stream: Mutex<SplitStream<Socket>>,
}

#[async_trait]
impl PushChannel for WsChannel {
    async fn read(&self) -> Result<Vec<u8>> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.as_str().as_bytes().to_vec()),
                Some(Ok(Message::Binary(data))) => {
                    return Err(Error::Transport(format!(
                        "unexpected binary frame ({} bytes)",
                        data.len()
                    )));
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("push connection closed by peer: {frame:?}");
                    return Err(Error::ConnectionClosed);
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(err.into()),
                None => return Err(Error::ConnectionClosed),
            }
        }
    }

    async fn write(&self, frame: &[u8]) -> Result<()> {
        let text = String::from_utf8(frame.to_vec())
            .map_err(|e| Error::InvalidRequest(format!("push frame is not UTF-8: {e}")))?;
        self.sink.lock().await.send(Message::text(text)).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.sink.lock().await.close().await?;
        Ok(())
    }
}
