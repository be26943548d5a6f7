//! Production connector: a real WebSocket dialled with
//! `tokio-tungstenite`, bridged onto the manager's channel transport by
//! two pump tasks.  The pumps end (and thereby signal transport loss by
//! closing the inbound channel) as soon as the socket errors or closes.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use recdash_proto::protocol::{ClientFrame, ServerFrame};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::conn::{Connector, Transport};
use crate::session::SessionSource;

const OUTBOUND_CAPACITY: usize = 64;
const INBOUND_CAPACITY: usize = 256;

pub struct WsConnector {
    url: String,
    session: Arc<dyn SessionSource>,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, session: Arc<dyn SessionSource>) -> Self {
        Self {
            url: url.into(),
            session,
        }
    }
}

impl Connector for WsConnector {
    async fn connect(&self) -> anyhow::Result<Transport> {
        let mut request = self.url.as_str().into_client_request()?;
        if let Some(session) = self.session.current() {
            let value = HeaderValue::from_str(&format!("Bearer {}", session.token))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (socket, _response) = tokio_tungstenite::connect_async(request).await?;
        debug!("websocket connected: {}", self.url);
        let (mut sink, mut stream) = socket.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientFrame>(OUTBOUND_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<ServerFrame>(INBOUND_CAPACITY);

        // Writer pump: control frames → text frames.
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let text = match frame.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("failed to encode control frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!("websocket send failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Reader pump: text frames → server frames.  Dropping `inbound_tx`
        // on exit is what tells the manager the transport is gone.
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerFrame::decode(&text) {
                        Ok(frame) => {
                            if inbound_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            // Malformed pushes are dropped, not fatal.
                            warn!("malformed server frame: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        debug!("websocket closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!("websocket read failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Transport {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
