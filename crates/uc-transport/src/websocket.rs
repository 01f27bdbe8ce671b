//! tokio-tungstenite WebSocket delegate.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{SplitSink, SplitStream};
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};
use universal_client_core::{
    Callback, CloseInfo, Error, ErrorKind, Listeners, Result, Subscription, WebSocketDelegate,
    WebSocketOptions, WsMessage,
};

use crate::config::TransportConfig;
use crate::reconnect::{ReconnectConfig, ReconnectPolicy};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn ws_error(err: tokio_tungstenite::tungstenite::Error) -> Error {
    Error::with_source(ErrorKind::Connection(err.to_string()), err)
}

/// Outgoing channel of the live socket, tagged with the socket it belongs to.
struct Writer {
    id: u64,
    tx: mpsc::UnboundedSender<Message>,
}

/// One attached socket, ready to be pumped.
struct Link {
    id: u64,
    write: SplitSink<Socket, Message>,
    read: SplitStream<Socket>,
    outgoing: mpsc::UnboundedReceiver<Message>,
}

struct Inner {
    options: WebSocketOptions,
    config: TransportConfig,
    reconnect: ReconnectConfig,
    writer: Mutex<Option<Writer>>,
    /// Serializes `connect` so concurrent callers share one socket.
    connecting: tokio::sync::Mutex<()>,
    next_id: AtomicU64,
    closing: AtomicBool,
    open: Listeners<()>,
    close: Listeners<CloseInfo>,
    error: Listeners<Error>,
    message: Listeners<WsMessage>,
}

impl Inner {
    fn writer(&self) -> MutexGuard<'_, Option<Writer>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_connected(&self) -> bool {
        self.writer().is_some()
    }

    fn open_socket(&self) -> BoxFuture<'static, Result<Socket>> {
        let url = self.options.url.clone();
        let protocols = self.options.protocols.join(", ");
        let timeout = self.config.connect_timeout;
        async move {
            let mut request = url.as_str().into_client_request().map_err(ws_error)?;
            if !protocols.is_empty() {
                let value = HeaderValue::from_str(&protocols)
                    .map_err(|e| Error::with_source(ErrorKind::Config(e.to_string()), e))?;
                request.headers_mut().insert("Sec-WebSocket-Protocol", value);
            }

            match tokio::time::timeout(timeout, connect_async(request)).await {
                Ok(Ok((socket, response))) => {
                    info!(url = %url, status = response.status().as_u16(), "WebSocket connected");
                    Ok(socket)
                }
                Ok(Err(err)) => Err(ws_error(err)),
                Err(_) => Err(Error::new(ErrorKind::Timeout)),
            }
        }
        .boxed()
    }

    /// Install the writer for a fresh socket and announce it. Sends are
    /// accepted from the moment this returns.
    fn attach(&self, socket: Socket) -> Link {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (write, read) = socket.split();
        let (tx, outgoing) = mpsc::unbounded_channel();
        *self.writer() = Some(Writer { id, tx });
        self.open.emit(&());
        Link {
            id,
            write,
            read,
            outgoing,
        }
    }

    /// Drop the writer if it still belongs to socket `id`.
    fn detach(&self, id: u64) {
        let mut writer = self.writer();
        if writer.as_ref().is_some_and(|w| w.id == id) {
            *writer = None;
        }
    }

    /// Pump one socket until it closes.
    async fn pump(&self, link: Link) -> CloseInfo {
        let Link {
            mut write,
            mut read,
            mut outgoing,
            ..
        } = link;

        let mut outgoing_open = true;
        loop {
            tokio::select! {
                message = outgoing.recv(), if outgoing_open => match message {
                    Some(message) => {
                        if let Err(err) = write.send(message).await {
                            let err = ws_error(err);
                            self.error.emit(&err);
                            return CloseInfo { code: None, reason: err.to_string() };
                        }
                    }
                    None => outgoing_open = false,
                },
                incoming = read.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        self.message.emit(&WsMessage::Text(text.to_string()));
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        self.message.emit(&WsMessage::Binary(bytes.to_vec()));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return frame
                            .map(|frame| CloseInfo {
                                code: Some(u16::from(frame.code)),
                                reason: frame.reason.to_string(),
                            })
                            .unwrap_or_default();
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        let err = ws_error(err);
                        self.error.emit(&err);
                        return CloseInfo { code: None, reason: err.to_string() };
                    }
                    None => return CloseInfo::default(),
                },
            }
        }
    }

    /// Drive the connection, reconnecting after unexpected closes.
    async fn run(self: Arc<Self>, mut link: Link) {
        let mut policy = ReconnectPolicy::new(self.reconnect.clone());
        loop {
            let id = link.id;
            let info = self.pump(link).await;
            self.detach(id);
            debug!(url = %self.options.url, code = ?info.code, reason = %info.reason, "WebSocket closed");
            self.close.emit(&info);

            let superseded = self.writer().as_ref().is_some_and(|w| w.id != id);
            if superseded || self.closing.load(Ordering::SeqCst) || !policy.should_reconnect() {
                return;
            }

            link = match self.reconnect(&mut policy).await {
                Some(socket) => self.attach(socket),
                None => return,
            };
            policy.reset();
        }
    }

    async fn reconnect(&self, policy: &mut ReconnectPolicy) -> Option<Socket> {
        while let Some(delay) = policy.next_delay(None) {
            warn!(
                url = %self.options.url,
                attempt = policy.attempt(),
                delay_ms = delay.as_millis() as u64,
                "WebSocket disconnected, reconnecting"
            );
            tokio::time::sleep(delay).await;
            if self.closing.load(Ordering::SeqCst) {
                return None;
            }
            match self.open_socket().await {
                Ok(socket) => return Some(socket),
                Err(err) => self.error.emit(&err),
            }
        }
        error!(
            url = %self.options.url,
            attempts = policy.max_attempts(),
            "WebSocket reconnect attempts exhausted"
        );
        None
    }
}

/// WebSocket delegate backed by tokio-tungstenite.
///
/// Sends made while disconnected are dropped with a warning.
#[derive(Clone)]
pub struct TungsteniteDelegate {
    inner: Arc<Inner>,
}

impl TungsteniteDelegate {
    /// Build the delegate. With `auto_connect` a connection is started in the
    /// background; failures are reported to `on_error` subscribers.
    pub fn new(options: WebSocketOptions, config: TransportConfig) -> Result<Self> {
        url::Url::parse(&options.url)?;
        let reconnect = ReconnectConfig {
            backoff: config.reconnect.backoff,
            ..ReconnectConfig::from(&options.reconnect)
        };
        let auto_connect = options.auto_connect;
        let delegate = Self {
            inner: Arc::new(Inner {
                options,
                config,
                reconnect,
                writer: Mutex::new(None),
                connecting: tokio::sync::Mutex::new(()),
                next_id: AtomicU64::new(0),
                closing: AtomicBool::new(false),
                open: Listeners::new(),
                close: Listeners::new(),
                error: Listeners::new(),
                message: Listeners::new(),
            }),
        };

        if auto_connect {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let delegate = delegate.clone();
                    handle.spawn(async move {
                        if let Err(err) = delegate.connect().await {
                            warn!(error = %err, "WebSocket auto-connect failed");
                            delegate.inner.error.emit(&err);
                        }
                    });
                }
                Err(_) => warn!("no tokio runtime, WebSocket auto-connect skipped"),
            }
        }

        Ok(delegate)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }
}

impl std::fmt::Debug for TungsteniteDelegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TungsteniteDelegate")
            .field("url", &self.inner.options.url)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[async_trait]
impl WebSocketDelegate for TungsteniteDelegate {
    #[instrument(skip(self), fields(url = %self.inner.options.url))]
    async fn connect(&self) -> Result<()> {
        let _connecting = self.inner.connecting.lock().await;
        if self.inner.is_connected() {
            debug!("WebSocket already connected");
            return Ok(());
        }
        self.inner.closing.store(false, Ordering::SeqCst);
        let socket = self.inner.open_socket().await?;
        let link = self.inner.attach(socket);
        tokio::spawn(Arc::clone(&self.inner).run(link));
        Ok(())
    }

    async fn send(&self, message: WsMessage) -> Result<()> {
        let frame = match message {
            WsMessage::Text(text) => Message::Text(text.into()),
            WsMessage::Binary(bytes) => Message::Binary(bytes.into()),
        };
        let sent = match self.inner.writer().as_ref() {
            Some(writer) => writer.tx.send(frame).is_ok(),
            None => false,
        };
        if !sent {
            warn!(url = %self.inner.options.url, "WebSocket not connected, message dropped");
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inner.closing.store(true, Ordering::SeqCst);
        if let Some(writer) = self.inner.writer().take() {
            debug!(url = %self.inner.options.url, "closing WebSocket");
            let _ = writer.tx.send(Message::Close(None));
        }
        Ok(())
    }

    fn on_open(&self, callback: Callback<()>) -> Subscription {
        self.inner.open.add(callback)
    }

    fn on_close(&self, callback: Callback<CloseInfo>) -> Subscription {
        self.inner.close.add(callback)
    }

    fn on_error(&self, callback: Callback<Error>) -> Subscription {
        self.inner.error.add(callback)
    }

    fn on_message(&self, callback: Callback<WsMessage>) -> Subscription {
        self.inner.message.add(callback)
    }
}
