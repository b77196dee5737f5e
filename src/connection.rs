/// 단일 WebSocket 연결
/// TCP 연결 → (TLS) → 핸드셰이크 → Active → Closed.
/// 재연결 시에는 항상 새 Connection 을 만들고, Closed 가 된 인스턴스는 다시 쓰지 않는다.

use crate::endpoint::EndpointDescriptor;
use crate::errors::{Result, SocketError};
use crate::heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatSnapshot, HeartbeatStatus};

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{client_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 종료 프레임 송신에 쓰는 최대 대기 시간
const CLOSE_GRACE: Duration = Duration::from_secs(2);
/// 하트비트 비활성 시 select 에 걸어둘 먼 미래
const FAR_FUTURE: Duration = Duration::from_secs(86_400);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Handshaking,
    Active,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Handshaking => "Handshaking",
            ConnectionState::Active => "Active",
            ConnectionState::Closing => "Closing",
            ConnectionState::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// Active 상태의 연결이 끝난 이유
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// close() 호출 (사용자 또는 레지스트리)
    LocalClose,
    RemoteClose(Option<String>),
    HeartbeatTimeout,
    ReadIdle,
    Io(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::LocalClose => write!(f, "로컬 종료"),
            DisconnectReason::RemoteClose(Some(detail)) => write!(f, "서버 종료 ({})", detail),
            DisconnectReason::RemoteClose(None) => write!(f, "서버 종료"),
            DisconnectReason::HeartbeatTimeout => write!(f, "하트비트 응답 없음"),
            DisconnectReason::ReadIdle => write!(f, "수신 유휴 시간 초과"),
            DisconnectReason::Io(cause) => write!(f, "I/O 오류: {}", cause),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    /// true 면 인증서/호스트명 검증을 하지 않는다
    pub trust_all_certs: bool,
    /// None 이면 하트비트 없이 동작
    pub heartbeat: Option<HeartbeatConfig>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(5_000),
            handshake_timeout: Duration::from_millis(10_000),
            trust_all_certs: false,
            heartbeat: Some(HeartbeatConfig::default()),
        }
    }
}

/// 큐에 들어간 프레임의 실제 쓰기 결과를 받는 리스너
pub type WriteListener = Box<dyn FnOnce(Result<()>) + Send + 'static>;

pub(crate) struct Outbound {
    pub(crate) text: String,
    listener: Option<WriteListener>,
}

impl Outbound {
    pub(crate) fn complete(self, result: Result<()>) {
        if let Some(listener) = self.listener {
            listener(result);
        }
    }
}

/// 디코딩된 텍스트 프레임 수신자. 수신 순서대로 한 번씩 호출된다.
pub trait FrameSink: Send + Sync {
    fn on_text(&self, connection: &ConnectionHandle, text: &str);
}

struct Shared {
    id: u64,
    client_id: String,
    endpoint: Arc<EndpointDescriptor>,
    state: Mutex<ConnectionState>,
    heartbeat: Mutex<HeartbeatStatus>,
    outbound: mpsc::UnboundedSender<Outbound>,
    close_tx: watch::Sender<bool>,
}

/// Active 연결에 대한 공유 핸들 (전송 / 종료 / 상태 조회)
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.shared.id)
            .field("client_id", &self.shared.client_id)
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectionHandle {
    fn new(
        client_id: String,
        endpoint: Arc<EndpointDescriptor>,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>, watch::Receiver<bool>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = watch::channel(false);
        let shared = Shared {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            client_id,
            endpoint,
            state: Mutex::new(ConnectionState::Active),
            heartbeat: Mutex::new(HeartbeatStatus::new(Instant::now())),
            outbound,
            close_tx,
        };
        (Self { shared: Arc::new(shared) }, outbound_rx, close_rx)
    }

    /// 연결 인스턴스 고유 번호 (재연결마다 달라짐)
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn client_id(&self) -> &str {
        &self.shared.client_id
    }

    pub fn endpoint(&self) -> &EndpointDescriptor {
        &self.shared.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// 텍스트 프레임을 전송 큐에 넣는다. 블로킹하지 않으며 쓰기 실패는 보고되지 않는다.
    pub fn send(&self, text: impl Into<String>) -> Result<()> {
        self.enqueue(text.into(), None)
    }

    /// 쓰기 결과를 listener 로 비동기 통지받는 전송.
    /// Err 가 반환되면 listener 는 호출되지 않는다.
    pub fn send_with_listener(&self, text: impl Into<String>, listener: WriteListener) -> Result<()> {
        self.enqueue(text.into(), Some(listener))
    }

    fn enqueue(&self, text: String, listener: Option<WriteListener>) -> Result<()> {
        if !self.is_active() {
            return Err(SocketError::NotConnected(self.shared.client_id.clone()));
        }
        self.shared
            .outbound
            .send(Outbound { text, listener })
            .map_err(|_| SocketError::NotConnected(self.shared.client_id.clone()))
    }

    /// 연결 종료 요청. 여러 번 호출해도 안전하다.
    pub fn close(&self) {
        {
            let mut state = self.shared.state.lock();
            match *state {
                ConnectionState::Closing | ConnectionState::Closed => return,
                _ => *state = ConnectionState::Closing,
            }
        }
        debug!("🔒 [{}] 연결 #{} 종료 요청", self.shared.client_id, self.shared.id);
        self.shared.close_tx.send_replace(true);
    }

    pub fn heartbeat(&self) -> HeartbeatSnapshot {
        self.shared.heartbeat.lock().snapshot()
    }

    /// pong 수신 반영. pong 을 기다리던 중이었으면 true
    pub(crate) fn mark_pong(&self) -> bool {
        self.shared.heartbeat.lock().record_pong()
    }

    fn set_state(&self, next: ConnectionState) {
        *self.shared.state.lock() = next;
    }

    fn record_read(&self) {
        self.shared.heartbeat.lock().record_read(Instant::now());
    }

    fn record_write(&self) {
        self.shared.heartbeat.lock().record_write(Instant::now());
    }
}

/// 아직 연결되지 않은 연결 시도 하나
pub struct Connection {
    client_id: String,
    endpoint: Arc<EndpointDescriptor>,
    options: ConnectionOptions,
    state: ConnectionState,
}

impl Connection {
    pub fn new(client_id: impl Into<String>, endpoint: Arc<EndpointDescriptor>, options: ConnectionOptions) -> Self {
        Self {
            client_id: client_id.into(),
            endpoint,
            options,
            state: ConnectionState::Idle,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!("🔧 [{}] {} → {}", self.client_id, self.state, next);
        self.state = next;
    }

    /// TCP 연결과 핸드셰이크를 끝까지 진행한다.
    /// 성공 시 Active 핸들과 아직 시작되지 않은 드라이버를 돌려준다.
    pub async fn connect(mut self) -> Result<EstablishedConnection> {
        self.transition(ConnectionState::Connecting);

        let stream = match self.open().await {
            Ok(stream) => stream,
            Err(e) => {
                self.transition(ConnectionState::Closed);
                return Err(e);
            }
        };

        let (handle, outbound_rx, close_rx) = ConnectionHandle::new(self.client_id.clone(), Arc::clone(&self.endpoint));
        self.transition(ConnectionState::Active);

        Ok(EstablishedConnection {
            driver: ConnectionDriver {
                handle: handle.clone(),
                stream,
                outbound_rx,
                close_rx,
                heartbeat: self.options.heartbeat.clone(),
            },
            handle,
        })
    }

    async fn open(&mut self) -> Result<WsStream> {
        let endpoint = Arc::clone(&self.endpoint);
        let host = endpoint.host();
        let port = endpoint.port();

        info!("🚀 [{}] {} 연결 중", self.client_id, endpoint);

        let tcp = match time::timeout(self.options.connect_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(SocketError::ConnectFailed(format!("{}:{} - {}", host, port, e)));
            }
            Err(_) => {
                return Err(SocketError::ConnectFailed(format!(
                    "{}:{} - {}ms 내 연결되지 않음",
                    host,
                    port,
                    self.options.connect_timeout.as_millis()
                )));
            }
        };
        if let Err(e) = tcp.set_nodelay(true) {
            debug!("[{}] TCP_NODELAY 설정 실패: {}", self.client_id, e);
        }

        self.transition(ConnectionState::Handshaking);

        let request = endpoint.request_url()?;
        let connector = if endpoint.is_secure() {
            Some(build_tls_connector(self.options.trust_all_certs)?)
        } else {
            None
        };

        let handshake = client_async_tls_with_config(request.as_str(), tcp, None, connector);
        let (stream, response) = match time::timeout(self.options.handshake_timeout, handshake).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(classify_handshake_error(e)),
            Err(_) => {
                return Err(SocketError::HandshakeFailed(format!(
                    "{}ms 내 핸드셰이크 응답 없음",
                    self.options.handshake_timeout.as_millis()
                )));
            }
        };

        info!("🤝 [{}] WebSocket 핸드셰이크 완료 (상태: {})", self.client_id, response.status());
        Ok(stream)
    }
}

fn build_tls_connector(trust_all_certs: bool) -> Result<Connector> {
    let tls = native_tls::TlsConnector::builder()
        .min_protocol_version(Some(native_tls::Protocol::Tlsv12))
        .danger_accept_invalid_certs(trust_all_certs)
        .danger_accept_invalid_hostnames(trust_all_certs)
        .build()
        .map_err(|e| SocketError::ConnectFailed(format!("TLS 설정 실패: {}", e)))?;
    Ok(Connector::NativeTls(tls))
}

/// TLS 세션 수립 실패는 연결 단계(ConnectFailed), 그 뒤 업그레이드 실패는 HandshakeFailed
fn classify_handshake_error(error: WsError) -> SocketError {
    match error {
        WsError::Tls(e) => SocketError::ConnectFailed(format!("TLS 연결 실패: {}", e)),
        WsError::Http(response) => SocketError::HandshakeFailed(format!("HTTP {} 응답 (101 아님)", response.status())),
        other => SocketError::HandshakeFailed(other.to_string()),
    }
}

/// 핸드셰이크가 끝난 연결. 드라이버를 돌리기 전까지는 어떤 프레임도 읽지 않는다.
pub struct EstablishedConnection {
    handle: ConnectionHandle,
    driver: ConnectionDriver,
}

impl EstablishedConnection {
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn into_parts(self) -> (ConnectionHandle, ConnectionDriver) {
        (self.handle, self.driver)
    }
}

/// 연결 하나의 읽기/쓰기/하트비트 루프
pub struct ConnectionDriver {
    handle: ConnectionHandle,
    stream: WsStream,
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    close_rx: watch::Receiver<bool>,
    heartbeat: Option<HeartbeatConfig>,
}

impl ConnectionDriver {
    /// 연결이 끝날 때까지 돌고 종료 사유를 돌려준다. 반환 시점에 핸들은 Closed 상태다.
    pub async fn run(self, sink: Arc<dyn FrameSink>) -> DisconnectReason {
        let ConnectionDriver {
            handle,
            stream,
            mut outbound_rx,
            mut close_rx,
            heartbeat,
        } = self;
        let client_id = handle.client_id().to_string();
        let (mut write, mut read) = stream.split();

        let reason = loop {
            let closing = *close_rx.borrow();
            if closing {
                break DisconnectReason::LocalClose;
            }

            let deadline = heartbeat
                .as_ref()
                .map(|cfg| handle.shared.heartbeat.lock().next_deadline(cfg));
            let tick = time::sleep_until(deadline.unwrap_or_else(|| Instant::now() + FAR_FUTURE));

            tokio::select! {
                biased;

                changed = close_rx.changed() => {
                    let closing = changed.is_err() || *close_rx.borrow();
                    if closing {
                        break DisconnectReason::LocalClose;
                    }
                }

                Some(out) = outbound_rx.recv() => {
                    let result = write
                        .send(Message::Text(out.text.clone()))
                        .await
                        .map_err(|e| SocketError::SendFailed(e.to_string()));
                    let broken = match &result {
                        Ok(()) => {
                            handle.record_write();
                            None
                        }
                        Err(e) => Some(e.to_string()),
                    };
                    out.complete(result);
                    if let Some(cause) = broken {
                        break DisconnectReason::Io(cause);
                    }
                }

                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            handle.record_read();
                            sink.on_text(&handle, &text);
                        }
                        Some(Ok(Message::Binary(data))) => {
                            handle.record_read();
                            warn!("📨 [{}] 바이너리 프레임 수신 ({} bytes), 처리하지 않음", client_id, data.len());
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            handle.record_read();
                            debug!("🏓 [{}] Ping 수신, Pong 응답", client_id);
                            if let Err(e) = write.send(Message::Pong(payload)).await {
                                break DisconnectReason::Io(e.to_string());
                            }
                            handle.record_write();
                        }
                        Some(Ok(Message::Pong(_))) => {
                            handle.record_read();
                            handle.mark_pong();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            break DisconnectReason::RemoteClose(frame.map(|f| format!("{} {}", f.code, f.reason)));
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => break DisconnectReason::Io(e.to_string()),
                        None => break DisconnectReason::RemoteClose(None),
                    }
                }

                _ = tick, if deadline.is_some() => {
                    if let Some(cfg) = heartbeat.as_ref() {
                        let action = handle.shared.heartbeat.lock().evaluate(cfg, Instant::now());
                        match action {
                            HeartbeatAction::Idle => {}
                            HeartbeatAction::SendPing => {
                                match write.send(Message::Text(cfg.ping_message.clone())).await {
                                    Ok(()) => {
                                        handle.shared.heartbeat.lock().record_ping(Instant::now());
                                        debug!("💓 [{}] 하트비트 전송: {}", client_id, cfg.ping_message);
                                    }
                                    Err(e) => break DisconnectReason::Io(e.to_string()),
                                }
                            }
                            HeartbeatAction::PongTimeout => {
                                warn!("💔 [{}] {}, 연결 종료", client_id, SocketError::HeartbeatTimeout);
                                break DisconnectReason::HeartbeatTimeout;
                            }
                            HeartbeatAction::ReadIdle => {
                                warn!("💔 [{}] 수신 유휴 시간 초과, 연결 종료", client_id);
                                break DisconnectReason::ReadIdle;
                            }
                        }
                    }
                }
            }
        };

        handle.set_state(ConnectionState::Closing);
        let _ = time::timeout(CLOSE_GRACE, write.close()).await;
        handle.set_state(ConnectionState::Closed);

        // 아직 쓰지 못한 프레임은 실패로 통지
        outbound_rx.close();
        while let Ok(out) = outbound_rx.try_recv() {
            out.complete(Err(SocketError::SendFailed("연결 종료로 전송되지 않음".to_string())));
        }

        info!("🔚 [{}] 연결 #{} 종료: {}", client_id, handle.id(), reason);
        reason
    }
}

#[cfg(test)]
impl ConnectionHandle {
    /// 실제 소켓 없이 Active 상태인 핸들. 전송된 프레임은 수신 채널로 확인한다.
    pub(crate) fn detached(client_id: &str) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let endpoint = Arc::new(EndpointDescriptor::parse("ws://detached.test").unwrap());
        let (handle, rx, _close_rx) = ConnectionHandle::new(client_id.to_string(), endpoint);
        (handle, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{refused_url, RejectingServer, TestServer, WAIT};
    use pretty_assertions::assert_eq;

    /// 수신 프레임을 채널로 흘려보내고, pong 토큰이면 하트비트에 반영하는 싱크
    struct ChannelSink {
        tx: mpsc::UnboundedSender<String>,
        pong_token: Option<String>,
    }

    impl FrameSink for ChannelSink {
        fn on_text(&self, connection: &ConnectionHandle, text: &str) {
            if self.pong_token.as_deref() == Some(text) {
                connection.mark_pong();
                return;
            }
            let _ = self.tx.send(text.to_string());
        }
    }

    fn sink(pong_token: Option<&str>) -> (Arc<dyn FrameSink>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = ChannelSink {
            tx,
            pong_token: pong_token.map(str::to_string),
        };
        (Arc::new(sink), rx)
    }

    fn options(heartbeat: Option<HeartbeatConfig>) -> ConnectionOptions {
        ConnectionOptions {
            connect_timeout: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(2),
            trust_all_certs: false,
            heartbeat,
        }
    }

    fn connection(url: &str, heartbeat: Option<HeartbeatConfig>) -> Connection {
        let endpoint = Arc::new(EndpointDescriptor::parse(url).unwrap());
        Connection::new("test-client", endpoint, options(heartbeat))
    }

    #[tokio::test]
    async fn test_connect_send_and_receive() {
        let mut server = TestServer::start(false).await;
        let conn = connection(&server.url(), None);
        assert_eq!(conn.state(), ConnectionState::Idle);

        let (handle, driver) = conn.connect().await.unwrap().into_parts();
        assert_eq!(handle.state(), ConnectionState::Active);

        let (sink, mut received) = sink(None);
        let task = tokio::spawn(driver.run(sink));

        let mut peer = server.next_conn().await;
        handle.send("hello").unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("hello"));

        peer.send(r#"{"data":1}"#);
        let frame = time::timeout(WAIT, received.recv()).await.unwrap();
        assert_eq!(frame.as_deref(), Some(r#"{"data":1}"#));

        handle.close();
        let reason = time::timeout(WAIT, task).await.unwrap().unwrap();
        assert_eq!(reason, DisconnectReason::LocalClose);
        assert_eq!(handle.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_sends_keep_submission_order() {
        let mut server = TestServer::start(false).await;
        let (handle, driver) = connection(&server.url(), None).connect().await.unwrap().into_parts();
        let (sink, _received) = sink(None);
        let task = tokio::spawn(driver.run(sink));
        let mut peer = server.next_conn().await;

        for i in 0..50 {
            handle.send(format!("msg-{}", i)).unwrap();
        }
        for i in 0..50 {
            assert_eq!(peer.recv().await, Some(format!("msg-{}", i)));
        }

        handle.close();
        let _ = time::timeout(WAIT, task).await;
    }

    #[tokio::test]
    async fn test_write_listener_reports_success() {
        let mut server = TestServer::start(false).await;
        let (handle, driver) = connection(&server.url(), None).connect().await.unwrap().into_parts();
        let (sink, _received) = sink(None);
        let task = tokio::spawn(driver.run(sink));
        let _peer = server.next_conn().await;

        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        handle
            .send_with_listener(
                "subscribe",
                Box::new(move |result| {
                    let _ = done_tx.send(result.is_ok());
                }),
            )
            .unwrap();
        assert_eq!(time::timeout(WAIT, done_rx).await.unwrap().unwrap(), true);

        handle.close();
        let _ = time::timeout(WAIT, task).await;
    }

    #[tokio::test]
    async fn test_connect_refused_is_connect_failed() {
        let url = refused_url().await;
        match connection(&url, None).connect().await {
            Err(SocketError::ConnectFailed(_)) => {}
            Err(other) => panic!("ConnectFailed 이어야 함: {}", other),
            Ok(_) => panic!("연결이 성공하면 안 됨"),
        }
    }

    #[tokio::test]
    async fn test_tls_against_plain_server_is_connect_failed() {
        let server = TestServer::start(false).await;
        let url = server.url().replacen("ws://", "wss://", 1);
        let endpoint = Arc::new(EndpointDescriptor::parse(&url).unwrap());
        assert!(endpoint.is_secure());

        let mut opts = options(None);
        opts.trust_all_certs = true;
        let result = Connection::new("tls", endpoint, opts).connect().await;
        match result {
            Err(SocketError::ConnectFailed(cause)) => assert!(cause.contains("TLS"), "{}", cause),
            Err(other) => panic!("ConnectFailed 가 아님: {}", other),
            Ok(_) => panic!("평문 서버에 TLS 연결이 성공함"),
        }
    }

    #[test]
    fn test_tls_connector_for_both_trust_modes() {
        assert!(matches!(build_tls_connector(true).unwrap(), Connector::NativeTls(_)));
        assert!(matches!(build_tls_connector(false).unwrap(), Connector::NativeTls(_)));
    }

    #[tokio::test]
    async fn test_non_101_response_is_handshake_failed() {
        let server = RejectingServer::start().await;
        match connection(&server.url(), None).connect().await {
            Err(SocketError::HandshakeFailed(cause)) => assert!(cause.contains("400"), "{}", cause),
            Err(other) => panic!("HandshakeFailed 이어야 함: {}", other),
            Ok(_) => panic!("핸드셰이크가 성공하면 안 됨"),
        }
    }

    #[tokio::test]
    async fn test_missing_pong_closes_connection() {
        let mut server = TestServer::start(false).await;
        let heartbeat = HeartbeatConfig {
            ping_interval_ms: 50,
            pong_timeout_ms: 100,
            read_idle_timeout_ms: None,
            ..HeartbeatConfig::default()
        };
        let (handle, driver) = connection(&server.url(), Some(heartbeat)).connect().await.unwrap().into_parts();
        let (sink, _received) = sink(Some("pong"));
        let task = tokio::spawn(driver.run(sink));
        let mut peer = server.next_conn().await;

        assert_eq!(peer.recv().await.as_deref(), Some("ping"));
        let reason = time::timeout(WAIT, task).await.unwrap().unwrap();
        assert_eq!(reason, DisconnectReason::HeartbeatTimeout);
        assert_eq!(handle.state(), ConnectionState::Closed);
        assert!(handle.heartbeat().awaiting_pong);
    }

    #[tokio::test]
    async fn test_pong_keeps_connection_alive() {
        let mut server = TestServer::start(true).await;
        let heartbeat = HeartbeatConfig {
            ping_interval_ms: 40,
            pong_timeout_ms: 80,
            read_idle_timeout_ms: None,
            ..HeartbeatConfig::default()
        };
        let (handle, driver) = connection(&server.url(), Some(heartbeat)).connect().await.unwrap().into_parts();
        let (sink, mut received) = sink(Some("pong"));
        let mut task = tokio::spawn(driver.run(sink));
        let _peer = server.next_conn().await;

        // 여러 주기가 지나도 연결 유지
        assert!(time::timeout(Duration::from_millis(400), &mut task).await.is_err());
        assert!(handle.is_active());
        assert!(handle.heartbeat().last_ping_sent_at.is_some());
        // pong 은 싱크에서 걸러졌으므로 데이터로 올라오지 않음
        assert!(received.try_recv().is_err());

        handle.close();
        let _ = time::timeout(WAIT, task).await;
    }

    #[tokio::test]
    async fn test_read_idle_closes_connection() {
        let mut server = TestServer::start(true).await;
        let heartbeat = HeartbeatConfig {
            ping_interval_ms: 10_000,
            pong_timeout_ms: 10_000,
            read_idle_timeout_ms: Some(100),
            ..HeartbeatConfig::default()
        };
        let (_handle, driver) = connection(&server.url(), Some(heartbeat)).connect().await.unwrap().into_parts();
        let (sink, _received) = sink(Some("pong"));
        let task = tokio::spawn(driver.run(sink));
        let _peer = server.next_conn().await;

        let reason = time::timeout(WAIT, task).await.unwrap().unwrap();
        assert_eq!(reason, DisconnectReason::ReadIdle);
    }

    #[tokio::test]
    async fn test_remote_close_is_reported() {
        let mut server = TestServer::start(false).await;
        let (_handle, driver) = connection(&server.url(), None).connect().await.unwrap().into_parts();
        let (sink, _received) = sink(None);
        let task = tokio::spawn(driver.run(sink));

        let peer = server.next_conn().await;
        peer.close();

        let reason = time::timeout(WAIT, task).await.unwrap().unwrap();
        assert!(matches!(reason, DisconnectReason::RemoteClose(_) | DisconnectReason::Io(_)), "{:?}", reason);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_send() {
        let server = TestServer::start(false).await;
        let (handle, driver) = connection(&server.url(), None).connect().await.unwrap().into_parts();
        let (sink, _received) = sink(None);

        handle.close();
        handle.close();
        assert_eq!(handle.state(), ConnectionState::Closing);
        assert!(matches!(handle.send("late"), Err(SocketError::NotConnected(_))));

        // 드라이버 시작 전에 닫힌 연결은 즉시 종료
        let reason = time::timeout(WAIT, driver.run(sink)).await.unwrap();
        assert_eq!(reason, DisconnectReason::LocalClose);
        assert_eq!(handle.state(), ConnectionState::Closed);
        handle.close();
        assert_eq!(handle.state(), ConnectionState::Closed);
    }
}
