//! WebSocket push channel over `tokio-tungstenite`.

use async_trait::async_trait;
use futures::StreamExt;
use roundtable_core::SessionId;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, instrument};

use crate::credential::Credential;
use crate::errors::{Result, StreamError};
use crate::transport::{ChannelStream, LiveTransport};

/// Opens `{base}/ws/debates/{session}` with a bearer `Authorization` header.
#[derive(Clone, Debug)]
pub struct WsTransport {
    base_url: String,
}

impl WsTransport {
    /// Create a transport for `base_url` (e.g. `ws://localhost:8000`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    /// Channel URL for `session`.
    pub fn url_for(&self, session: &SessionId) -> String {
        format!("{}/ws/debates/{}", self.base_url, session)
    }
}

#[async_trait]
impl LiveTransport for WsTransport {
    #[instrument(skip_all, fields(session_id = %session))]
    async fn open(
        &self,
        session: &SessionId,
        credential: &Credential,
    ) -> Result<ChannelStream> {
        let url = self.url_for(session);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| StreamError::InvalidRequest(e.to_string()))?;
        let auth = HeaderValue::from_str(&credential.authorization())
            .map_err(|e| StreamError::InvalidRequest(e.to_string()))?;
        let _ = request.headers_mut().insert(AUTHORIZATION, auth);

        let (socket, _response) = connect_async(request).await.map_err(handshake_error)?;
        debug!(%url, "channel open");

        let frames = socket
            .take_while(|msg| futures::future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| futures::future::ready(frame_text(msg)));
        Ok(Box::pin(frames))
    }
}

fn handshake_error(err: WsError) -> StreamError {
    match err {
        WsError::Http(response) => {
            let status = response.status().as_u16();
            let body = response
                .body()
                .as_ref()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            StreamError::from_status(status, body)
        }
        other => StreamError::WebSocket(other.to_string()),
    }
}

/// Text payload of a frame. Control frames are skipped; binary frames are
/// forwarded when they hold UTF-8 (anything else fails envelope parsing
/// downstream and is counted as malformed).
fn frame_text(msg: Result<Message, WsError>) -> Option<Result<String>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
        Ok(Message::Binary(bytes)) => Some(Ok(String::from_utf8_lossy(&bytes).into_owned())),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_) | Message::Close(_)) => None,
        Err(e) => Some(Err(StreamError::WebSocket(e.to_string()))),
    }
}
