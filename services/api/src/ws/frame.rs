//! Data frames as they cross the relay, independent of which WebSocket
//! implementation carried them in.

use axum::extract::ws::Message as ClientMessage;
use bytes::Bytes;
use tokio_tungstenite::tungstenite::{self, Message as UpstreamMessage};

/// A payload forwarded unchanged between the two legs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
        }
    }

    pub fn into_client(self) -> ClientMessage {
        match self {
            Frame::Text(text) => ClientMessage::Text(text.into()),
            Frame::Binary(data) => ClientMessage::Binary(data),
        }
    }

    pub fn into_upstream(self) -> UpstreamMessage {
        match self {
            Frame::Text(text) => UpstreamMessage::Text(text.into()),
            Frame::Binary(data) => UpstreamMessage::Binary(data),
        }
    }
}

/// One read from either leg, classified.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    Frame(Frame),
    /// Ping, pong and raw frames. The WebSocket layers answer pings themselves.
    Control,
    Closed(Option<String>),
    Failed(String),
}

fn reason(text: &str) -> Option<String> {
    (!text.is_empty()).then(|| text.to_string())
}

impl Inbound {
    pub fn from_client(read: Option<Result<ClientMessage, axum::Error>>) -> Self {
        match read {
            Some(Ok(ClientMessage::Text(text))) => Inbound::Frame(Frame::Text(text.as_str().to_owned())),
            Some(Ok(ClientMessage::Binary(data))) => Inbound::Frame(Frame::Binary(data)),
            Some(Ok(ClientMessage::Ping(_) | ClientMessage::Pong(_))) => Inbound::Control,
            Some(Ok(ClientMessage::Close(frame))) => {
                Inbound::Closed(frame.and_then(|f| reason(f.reason.as_str())))
            }
            Some(Err(e)) => Inbound::Failed(e.to_string()),
            None => Inbound::Closed(None),
        }
    }

    pub fn from_upstream(read: Option<Result<UpstreamMessage, tungstenite::Error>>) -> Self {
        match read {
            Some(Ok(UpstreamMessage::Text(text))) => {
                Inbound::Frame(Frame::Text(text.as_str().to_owned()))
            }
            Some(Ok(UpstreamMessage::Binary(data))) => Inbound::Frame(Frame::Binary(data)),
            Some(Ok(
                UpstreamMessage::Ping(_) | UpstreamMessage::Pong(_) | UpstreamMessage::Frame(_),
            )) => Inbound::Control,
            Some(Ok(UpstreamMessage::Close(frame))) => {
                Inbound::Closed(frame.and_then(|f| reason(f.reason.as_str())))
            }
            Some(Err(tungstenite::Error::ConnectionClosed)) | None => Inbound::Closed(None),
            Some(Err(e)) => Inbound::Failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::CloseFrame as ClientCloseFrame;
    use tokio_tungstenite::tungstenite::protocol::{CloseFrame, frame::coding::CloseCode};

    #[test]
    fn test_text_survives_both_directions() {
        let payload = r#"{"type":"connection_status","status":"connected"}"#;
        let Inbound::Frame(frame) =
            Inbound::from_client(Some(Ok(ClientMessage::Text(payload.into()))))
        else {
            panic!("expected a data frame");
        };
        assert_eq!(frame, Frame::Text(payload.to_string()));

        let UpstreamMessage::Text(text) = frame.clone().into_upstream() else {
            panic!("expected text");
        };
        assert_eq!(text.as_str(), payload);

        let ClientMessage::Text(text) = frame.into_client() else {
            panic!("expected text");
        };
        assert_eq!(text.as_str(), payload);
    }

    #[test]
    fn test_binary_is_not_reencoded() {
        let data = Bytes::from_static(&[0x00, 0xff, 0x10, 0x80]);
        let inbound = Inbound::from_upstream(Some(Ok(UpstreamMessage::Binary(data.clone()))));
        assert_eq!(inbound, Inbound::Frame(Frame::Binary(data.clone())));
        assert_eq!(Frame::Binary(data.clone()).into_client(), ClientMessage::Binary(data));
    }

    #[test]
    fn test_close_reasons() {
        let upstream_close = UpstreamMessage::Close(Some(CloseFrame {
            code: CloseCode::Policy,
            reason: "quota exceeded".into(),
        }));
        assert_eq!(
            Inbound::from_upstream(Some(Ok(upstream_close))),
            Inbound::Closed(Some("quota exceeded".into()))
        );

        let client_close = ClientMessage::Close(Some(ClientCloseFrame {
            code: 1000,
            reason: "".into(),
        }));
        assert_eq!(Inbound::from_client(Some(Ok(client_close))), Inbound::Closed(None));
        assert_eq!(Inbound::from_client(None), Inbound::Closed(None));
    }

    #[test]
    fn test_control_frames_are_not_forwarded() {
        assert_eq!(
            Inbound::from_upstream(Some(Ok(UpstreamMessage::Ping(Bytes::new())))),
            Inbound::Control
        );
        assert_eq!(
            Inbound::from_client(Some(Ok(ClientMessage::Pong(Bytes::new())))),
            Inbound::Control
        );
    }
}
