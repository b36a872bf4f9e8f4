use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{now_ms, parse_inbound, Envelope, Inbound, Outbound, SyncCommand};
use crate::session::{ConnectionState, GatewaySession, HEARTBEAT_DELAY};
use cadence_core::{GatewayConfig, Track};
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    Connected,
    Disconnected,
    Sync(SyncCommand),
    Recents(Vec<Track>),
}

enum Command {
    Connect(Url, oneshot::Sender<GatewayResult<bool>>),
    Send(Envelope),
    Heartbeat,
    Disconnect,
}

#[derive(Clone)]
pub struct GatewayClient {
    config: GatewayConfig,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl GatewayClient {
    pub fn spawn(config: GatewayConfig) -> (Self, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let handshake = Outbound::Initialize {
            token: config.token.clone(),
            broadcast: config.broadcast,
            presence: config.presence,
        };
        let worker = Worker {
            session: GatewaySession::new(handshake),
            url: None,
            socket: None,
            reconnect_at: None,
            heartbeats: Vec::new(),
            commands: cmd_tx.downgrade(),
            events: event_tx,
            state: state_tx,
        };
        tokio::spawn(worker.run(cmd_rx));

        let client = Self {
            config,
            commands: cmd_tx,
            state: state_rx,
        };
        (client, event_rx)
    }

    pub async fn connect(&self) -> GatewayResult<bool> {
        let url = endpoint(&self.config)?;
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect(url, tx))
            .map_err(|_| GatewayError::Closed)?;
        rx.await.map_err(|_| GatewayError::Closed)?
    }

    pub fn send(&self, message: impl Into<Envelope>) -> GatewayResult<()> {
        self.commands
            .send(Command::Send(message.into()))
            .map_err(|_| GatewayError::Closed)
    }

    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub async fn wait_for_state(&mut self, wanted: ConnectionState) -> GatewayResult<()> {
        self.state
            .wait_for(|state| *state == wanted)
            .await
            .map(drop)
            .map_err(|_| GatewayError::Closed)
    }
}

pub fn endpoint(config: &GatewayConfig) -> GatewayResult<Url> {
    let raw = match config.url.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Err(GatewayError::NotConfigured),
    };
    let url = Url::parse(raw).map_err(|err| GatewayError::InvalidUrl {
        url: raw.to_string(),
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(GatewayError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}

struct Worker {
    session: GatewaySession,
    url: Option<Url>,
    socket: Option<Ws>,
    reconnect_at: Option<Instant>,
    heartbeats: Vec<JoinHandle<()>>,
    commands: mpsc::WeakUnboundedSender<Command>,
    events: mpsc::UnboundedSender<GatewayEvent>,
    state: watch::Sender<ConnectionState>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let reconnect_at = self.reconnect_at;
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd).await,
                    None => break,
                },
                frame = next_frame(&mut self.socket) => self.on_frame(frame).await,
                _ = sleep_until(reconnect_at), if reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    info!("reconnecting to gateway");
                    let _ = self.open().await;
                }
            }
        }

        self.stop_heartbeats();
        if let Some(mut ws) = self.socket.take() {
            let _ = ws.close(None).await;
        }
        debug!("gateway worker exited");
    }

    async fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect(url, reply) => {
                if self.session.state() == ConnectionState::Connected
                    && self.url.as_ref() == Some(&url)
                {
                    let _ = reply.send(Ok(true));
                    return;
                }
                self.close_socket().await;
                self.url = Some(url);
                self.reconnect_at = None;
                let _ = reply.send(self.open().await.map(|_| true));
            }
            Command::Send(envelope) => self.send(envelope).await,
            Command::Heartbeat => self.send(Envelope::new(Outbound::Latency)).await,
            Command::Disconnect => {
                info!("gateway disconnect requested");
                self.session.disconnect();
                self.reconnect_at = None;
                self.stop_heartbeats();
                self.close_socket().await;
                self.publish_state();
                self.emit(GatewayEvent::Disconnected);
            }
        }
    }

    async fn open(&mut self) -> GatewayResult<()> {
        let Some(url) = self.url.clone() else {
            return Err(GatewayError::NotConfigured);
        };
        self.session.begin_connect();
        self.publish_state();

        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                info!(url = %url, "gateway connected");
                self.socket = Some(ws);
                let pending = self.session.on_open();
                self.publish_state();
                self.emit(GatewayEvent::Connected);
                self.flush(pending).await;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, url = %url, "gateway connect failed");
                self.schedule_reconnect();
                Err(err.into())
            }
        }
    }

    async fn send(&mut self, envelope: Envelope) {
        match self.session.send(envelope) {
            Some(envelope) => self.flush(VecDeque::from([envelope])).await,
            None => debug!(buffered = self.session.buffered(), "gateway offline; message buffered"),
        }
    }

    async fn flush(&mut self, mut pending: VecDeque<Envelope>) {
        while let Some(envelope) = pending.pop_front() {
            if let Err(err) = self.transmit(&envelope).await {
                warn!(error = %err, "gateway send failed; keeping unsent messages");
                if !matches!(err, GatewayError::Malformed(_)) {
                    pending.push_front(envelope);
                    self.session.restore(pending);
                    self.on_closed().await;
                    return;
                }
            }
        }
    }

    async fn transmit(&mut self, envelope: &Envelope) -> GatewayResult<()> {
        let text = envelope.encode(now_ms())?;
        let ws = self.socket.as_mut().ok_or(GatewayError::Closed)?;
        ws.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn on_frame(&mut self, frame: Option<Result<Message, tungstenite::Error>>) {
        match frame {
            Some(Ok(Message::Text(text))) => self.on_text(&text),
            Some(Ok(Message::Binary(bin))) => match std::str::from_utf8(&bin) {
                Ok(text) => self.on_text(text),
                Err(_) => warn!(len = bin.len(), "dropping non-utf8 gateway frame"),
            },
            Some(Ok(Message::Close(reason))) => {
                debug!(?reason, "gateway sent close");
                self.on_closed().await;
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                warn!(error = %err, "gateway socket error");
                self.on_closed().await;
            }
            None => self.on_closed().await,
        }
    }

    fn on_text(&mut self, raw: &str) {
        match parse_inbound(raw) {
            Ok(message) => self.dispatch(message),
            Err(err) => warn!(error = %err, "dropping malformed gateway frame"),
        }
    }

    fn dispatch(&mut self, message: Inbound) {
        match message {
            Inbound::Latency { .. } => self.schedule_heartbeat(),
            Inbound::Sync(cmd) => self.emit(GatewayEvent::Sync(cmd)),
            Inbound::Recents { recents } => self.emit(GatewayEvent::Recents(recents)),
            Inbound::Unknown => debug!("ignoring gateway message of unknown type"),
        }
    }

    fn schedule_heartbeat(&mut self) {
        self.heartbeats.retain(|h| !h.is_finished());
        let commands = self.commands.clone();
        self.heartbeats.push(tokio::spawn(async move {
            tokio::time::sleep(HEARTBEAT_DELAY).await;
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::Heartbeat);
            }
        }));
    }

    fn stop_heartbeats(&mut self) {
        for handle in self.heartbeats.drain(..) {
            handle.abort();
        }
    }

    async fn on_closed(&mut self) {
        self.socket = None;
        self.stop_heartbeats();
        if self.session.state() == ConnectionState::Connected {
            self.emit(GatewayEvent::Disconnected);
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        match self.session.on_closed() {
            Some(delay) => {
                warn!(delay_secs = delay.as_secs(), "gateway unavailable; will reconnect");
                self.reconnect_at = Some(Instant::now() + delay);
            }
            None => self.reconnect_at = None,
        }
        self.publish_state();
    }

    async fn close_socket(&mut self) {
        if let Some(mut ws) = self.socket.take() {
            if let Err(err) = ws.close(None).await {
                debug!(error = %err, "gateway close handshake failed");
            }
        }
    }

    fn publish_state(&self) {
        let _ = self.state.send(self.session.state());
    }

    fn emit(&self, event: GatewayEvent) {
        let _ = self.events.send(event);
    }
}

async fn next_frame(socket: &mut Option<Ws>) -> Option<Result<Message, tungstenite::Error>> {
    match socket {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::endpoint;
    use crate::error::GatewayError;
    use cadence_core::GatewayConfig;

    fn config(url: Option<&str>) -> GatewayConfig {
        GatewayConfig {
            url: url.map(str::to_string),
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn endpoint_requires_configuration() {
        assert!(matches!(endpoint(&config(None)), Err(GatewayError::NotConfigured)));
        assert!(matches!(endpoint(&config(Some("  "))), Err(GatewayError::NotConfigured)));
    }

    #[test]
    fn endpoint_rejects_non_websocket_urls() {
        assert!(matches!(
            endpoint(&config(Some("http://example.com/gateway"))),
            Err(GatewayError::InvalidUrl { .. })
        ));
        assert!(matches!(
            endpoint(&config(Some("::nope"))),
            Err(GatewayError::InvalidUrl { .. })
        ));
        let url = endpoint(&config(Some("wss://example.com/gateway"))).unwrap();
        assert_eq!(url.host_str(), Some("example.com"));
    }
}
