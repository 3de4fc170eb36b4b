//! Socket transport: the only code that touches the network for the live feed.
//!
//! A [`Connector`] opens one socket and hands back a [`Transport`]: an
//! outbound queue drained by a writer task and an inbound queue filled by a
//! reader task. The manager never sees tungstenite types.

use std::time::Duration;

use async_trait::async_trait;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use srtmon_shared::NORMAL_CLOSE_CODE;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

/// A frame queued for the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    /// Send a close frame and stop writing.
    Close { code: u16, reason: String },
}

/// Something the socket delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Text(String),
    /// The socket is gone. `code` is `None` when it dropped without a close
    /// frame.
    Closed { code: Option<u16>, reason: String },
}

pub type OutboundSender = UnboundedSender<Outbound>;

/// An open socket.
///
/// Dropping `outbound` closes the socket with a normal close frame.
pub struct Transport {
    pub outbound: OutboundSender,
    pub inbound: mpsc::UnboundedReceiver<Inbound>,
}

/// Why a socket could not be opened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("handshake rejected with HTTP {status}")]
    Rejected { status: u16 },
    #[error("handshake timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("{0}")]
    Io(String),
}

impl TransportError {
    /// 401/403 on the upgrade request means the credential was refused.
    pub fn is_auth(&self) -> bool {
        matches!(self, TransportError::Rejected { status: 401 | 403 })
    }
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, url: Url) -> Result<Transport, TransportError>;
}

/// Connector backed by tokio-tungstenite.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: Url) -> Result<Transport, TransportError> {
        let (ws_stream, _response) = connect_async(url.as_str()).await.map_err(|e| match e {
            tungstenite::Error::Http(resp) => TransportError::Rejected {
                status: resp.status().as_u16(),
            },
            other => TransportError::Io(other.to_string()),
        })?;

        let (mut write, mut read) = ws_stream.split();
        let (outbound, mut outbound_rx): (OutboundSender, UnboundedReceiver<Outbound>) = unbounded();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        // Read task
        let reader = tokio::spawn(async move {
            let closed = loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if inbound_tx.send(Inbound::Text(text.as_str().to_owned())).is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(frame) => Inbound::Closed {
                                code: Some(u16::from(frame.code)),
                                reason: frame.reason.as_str().to_owned(),
                            },
                            None => Inbound::Closed {
                                code: None,
                                reason: String::new(),
                            },
                        };
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // Protocol-level pong is answered by tungstenite
                        tracing::trace!("received protocol ping");
                    }
                    Some(Ok(_)) => {
                        // Binary and protocol pongs carry nothing for us
                    }
                    Some(Err(e)) => {
                        break Inbound::Closed {
                            code: None,
                            reason: e.to_string(),
                        };
                    }
                    None => {
                        break Inbound::Closed {
                            code: None,
                            reason: "connection lost".to_string(),
                        };
                    }
                }
            };
            let _ = inbound_tx.send(closed);
        });

        // Write task
        tokio::spawn(async move {
            let mut close = Some((NORMAL_CLOSE_CODE, String::new()));
            while let Some(frame) = outbound_rx.next().await {
                match frame {
                    Outbound::Text(json) => {
                        if let Err(e) = write.send(Message::Text(json.into())).await {
                            tracing::debug!("live feed send failed: {}", e);
                            close = None;
                            break;
                        }
                    }
                    Outbound::Close { code, reason } => {
                        close = Some((code, reason));
                        break;
                    }
                }
            }
            if let Some((code, reason)) = close {
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.into(),
                };
                let _ = write.send(Message::Close(Some(frame))).await;
            }
            let _ = write.close().await;
            reader.abort();
        });

        Ok(Transport { outbound, inbound })
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted in-memory connector for manager tests.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use futures_channel::mpsc::TryRecvError;
    use tokio::sync::oneshot;

    use super::*;

    /// What the next `open()` does.
    pub enum Script {
        Accept,
        Reject(TransportError),
        /// Accept once the sender fires (or fail if it is dropped).
        Gated(oneshot::Receiver<()>),
        /// Never complete.
        Hang,
    }

    /// Server side of an accepted fake socket.
    pub struct FakeSocket {
        pub url: Url,
        sent: UnboundedReceiver<Outbound>,
        inbound: mpsc::UnboundedSender<Inbound>,
    }

    impl FakeSocket {
        pub fn push(&self, text: &str) {
            let _ = self.inbound.send(Inbound::Text(text.to_string()));
        }

        pub fn close(&self, code: Option<u16>, reason: &str) {
            let _ = self.inbound.send(Inbound::Closed {
                code,
                reason: reason.to_string(),
            });
        }

        /// Everything the client has queued so far.
        pub fn drain_sent(&mut self) -> Vec<Outbound> {
            let mut frames = Vec::new();
            while let Ok(frame) = self.sent.try_recv() {
                frames.push(frame);
            }
            frames
        }

        /// True once the client dropped its end of the socket.
        pub fn is_released(&mut self) -> bool {
            matches!(self.sent.try_recv(), Err(TryRecvError::Closed))
        }
    }

    #[derive(Clone)]
    pub struct FakeConnector {
        script: Arc<Mutex<VecDeque<Script>>>,
        opens: Arc<AtomicU32>,
        sockets: mpsc::UnboundedSender<FakeSocket>,
    }

    impl FakeConnector {
        pub fn new() -> (Self, mpsc::UnboundedReceiver<FakeSocket>) {
            let (sockets, accepted) = mpsc::unbounded_channel();
            let connector = Self {
                script: Arc::new(Mutex::new(VecDeque::new())),
                opens: Arc::new(AtomicU32::new(0)),
                sockets,
            };
            (connector, accepted)
        }

        /// Queue behaviors for upcoming opens. Unscripted opens accept.
        pub fn then(&self, step: Script) -> &Self {
            self.script.lock().unwrap().push_back(step);
            self
        }

        pub fn opens(&self) -> u32 {
            self.opens.load(Ordering::SeqCst)
        }

        fn accept(&self, url: Url) -> Transport {
            let (outbound, sent) = unbounded();
            let (inbound_tx, inbound) = mpsc::unbounded_channel();
            let _ = self.sockets.send(FakeSocket {
                url,
                sent,
                inbound: inbound_tx,
            });
            Transport { outbound, inbound }
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn open(&self, url: Url) -> Result<Transport, TransportError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let step = self.script.lock().unwrap().pop_front();
            match step.unwrap_or(Script::Accept) {
                Script::Accept => Ok(self.accept(url)),
                Script::Reject(err) => Err(err),
                Script::Gated(gate) => match gate.await {
                    Ok(()) => Ok(self.accept(url)),
                    Err(_) => Err(TransportError::Io("gate dropped".to_string())),
                },
                Script::Hang => std::future::pending().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_rejections_classified() {
        assert!(TransportError::Rejected { status: 401 }.is_auth());
        assert!(TransportError::Rejected { status: 403 }.is_auth());
        assert!(!TransportError::Rejected { status: 502 }.is_auth());
        assert!(!TransportError::Timeout(Duration::from_secs(10)).is_auth());
        assert_eq!(
            TransportError::Timeout(Duration::from_secs(10)).to_string(),
            "handshake timed out after 10000ms"
        );
    }
}
