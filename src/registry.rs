/// 연결 레지스트리
/// 클라이언트 id 마다 감독 태스크 하나가 연결, 구독 재전송, 재연결, 소진 처리를 맡는다.
/// 클라이언트 간에는 공유 락이 없으므로 한 클라이언트의 재연결이 다른 클라이언트를 막지 않는다.

use crate::callback::{ConnectionCallback, SubscriptionCallback};
use crate::client::{ClientId, ClientSpec};
use crate::codec::SubscriptionCodec;
use crate::connection::{Connection, ConnectionHandle, ConnectionOptions, ConnectionState, FrameSink, WriteListener};
use crate::dispatcher::{Dispatcher, Routed};
use crate::endpoint::EndpointDescriptor;
use crate::errors::{Result, SocketError};
use crate::handler::{HandlerChain, HandlerId, MessageHandler};
use crate::heartbeat::HeartbeatSnapshot;
use crate::reconnect::{ReconnectPolicy, ReconnectState};
use crate::subscription::{SubscribeOutcome, SubscriptionRegistry};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;

/// start_client 결과
#[derive(Debug, Clone)]
pub struct Registration {
    client_id: ClientId,
    endpoint: Arc<EndpointDescriptor>,
    /// false 면 이미 등록되어 있던 클라이언트
    created: bool,
}

impl Registration {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn endpoint(&self) -> &EndpointDescriptor {
        &self.endpoint
    }

    pub fn created(&self) -> bool {
        self.created
    }
}

struct SupervisorState {
    current: Option<ConnectionHandle>,
    reconnect: ReconnectState,
}

struct ClientEntry {
    client_id: ClientId,
    endpoint: Arc<EndpointDescriptor>,
    running: AtomicBool,
    stop_tx: watch::Sender<bool>,
    state: Mutex<SupervisorState>,
    dispatcher: Dispatcher,
    codec: Arc<dyn SubscriptionCodec>,
    callback: Arc<dyn ConnectionCallback>,
    subscription_callback: Arc<dyn SubscriptionCallback>,
    options: ConnectionOptions,
    policy: ReconnectPolicy,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ClientEntry {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn current(&self) -> Option<ConnectionHandle> {
        self.state.lock().current.clone()
    }

    /// running 해제, 대기 중인 재연결 취소, 현재 연결 종료. 처음 호출일 때만 true
    fn stop(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.stop_tx.send_replace(true);
        let current = self.state.lock().current.take();
        if let Some(connection) = current {
            connection.close();
        }
        true
    }
}

struct Inner {
    runtime: Handle,
    clients: DashMap<ClientId, Arc<ClientEntry>>,
    subscriptions: SubscriptionRegistry,
    shutting_down: AtomicBool,
    /// 중지된 클라이언트의 감독 태스크 (shutdown 에서 대기)
    retired: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn retire(&self, entry: &ClientEntry) {
        if let Some(task) = entry.task.lock().take() {
            let mut retired = self.retired.lock();
            retired.retain(|t| !t.is_finished());
            retired.push(task);
        }
    }
}

/// 클라이언트 id → 연결 상태를 관리하는 레지스트리
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Inner>,
}

impl ConnectionRegistry {
    pub fn new(runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                runtime,
                clients: DashMap::new(),
                subscriptions: SubscriptionRegistry::new(),
                shutting_down: AtomicBool::new(false),
                retired: Mutex::new(Vec::new()),
            }),
        }
    }

    /// 현재 tokio 런타임 위에서 생성
    pub fn from_current() -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| SocketError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        Ok(Self::new(runtime))
    }

    /// 클라이언트 등록 후 백그라운드에서 연결 시작.
    /// URL 오류만 즉시 반환되고, 연결 결과는 콜백으로 통지된다.
    pub fn start_client(&self, spec: ClientSpec) -> Result<Registration> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(SocketError::ShutDown);
        }
        let endpoint = Arc::new(EndpointDescriptor::parse(&spec.url)?);

        let entry = match self.inner.clients.entry(spec.client_id.clone()) {
            Entry::Occupied(existing) => {
                debug!("📋 [{}] 이미 등록된 클라이언트", spec.client_id);
                return Ok(Registration {
                    client_id: spec.client_id,
                    endpoint: Arc::clone(&existing.get().endpoint),
                    created: false,
                });
            }
            Entry::Vacant(vacant) => {
                let entry = Arc::new(new_entry(&spec, Arc::clone(&endpoint)));
                vacant.insert(Arc::clone(&entry));
                entry
            }
        };

        // 초기 토픽은 기록만 하고 첫 연결 때 재전송으로 보낸다
        for topic in &spec.topics {
            self.inner.subscriptions.subscribe(
                &entry.client_id,
                topic,
                || None,
                entry.codec.as_ref(),
                &entry.subscription_callback,
            );
        }

        info!("🚀 [{}] 클라이언트 시작: {}", entry.client_id, endpoint);
        let task = self
            .inner
            .runtime
            .spawn(supervise(Arc::clone(&self.inner), Arc::clone(&entry)));
        *entry.task.lock() = Some(task);

        Ok(Registration {
            client_id: spec.client_id,
            endpoint,
            created: true,
        })
    }

    /// 클라이언트 중지 및 상태 삭제. 없는 id 면 false (여러 번 호출해도 안전)
    pub fn stop_client(&self, client_id: &str) -> bool {
        let Some((_, entry)) = self.inner.clients.remove(client_id) else {
            return false;
        };
        entry.stop();
        self.inner.subscriptions.clear(client_id);
        self.inner.retire(&entry);
        info!("🛑 [{}] 클라이언트 중지", client_id);
        true
    }

    /// 모든 클라이언트를 멈추고 감독 태스크 종료까지 기다린다.
    /// 이후 start_client 는 ShutDown 에러를 돌려준다.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);

        let ids = self.client_ids();
        info!("🛑 레지스트리 종료 중 (클라이언트 {}개)", ids.len());
        for id in &ids {
            self.stop_client(id);
        }

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.retired.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("⚠️ 감독 태스크 비정상 종료: {}", e);
            }
        }
        info!("✅ 레지스트리 종료 완료");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    fn entry(&self, client_id: &str) -> Result<Arc<ClientEntry>> {
        self.inner
            .clients
            .get(client_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SocketError::UnknownClient(client_id.to_string()))
    }

    /// 원문 텍스트 전송. 쓰기 실패는 on_send_failed 로 통지된다.
    pub fn send(&self, client_id: &str, text: impl Into<String>) -> Result<()> {
        let entry = self.entry(client_id)?;
        let connection = entry
            .current()
            .ok_or_else(|| SocketError::NotConnected(client_id.to_string()))?;

        let callback = Arc::clone(&entry.callback);
        let owner = entry.client_id.clone();
        let listener: WriteListener = Box::new(move |result| {
            if let Err(e) = result {
                callback.on_send_failed(&owner, &e);
            }
        });
        connection.send_with_listener(text, listener)
    }

    pub fn subscribe(&self, client_id: &str, topic: &str) -> Result<SubscribeOutcome> {
        let entry = self.entry(client_id)?;
        let callback = Arc::clone(&entry.subscription_callback);
        self.subscribe_with(client_id, topic, callback)
    }

    /// 이 호출에 한해 다른 구독 콜백을 쓴다
    pub fn subscribe_with(
        &self,
        client_id: &str,
        topic: &str,
        callback: Arc<dyn SubscriptionCallback>,
    ) -> Result<SubscribeOutcome> {
        let entry = self.entry(client_id)?;
        Ok(self
            .inner
            .subscriptions
            .subscribe(client_id, topic, || entry.current(), entry.codec.as_ref(), &callback))
    }

    /// 구독 중이던 토픽이면 true
    pub fn unsubscribe(&self, client_id: &str, topic: &str) -> Result<bool> {
        let entry = self.entry(client_id)?;
        Ok(self.inner.subscriptions.unsubscribe(
            client_id,
            topic,
            || entry.current(),
            entry.codec.as_ref(),
            &entry.subscription_callback,
        ))
    }

    pub fn topics(&self, client_id: &str) -> Vec<String> {
        self.inner.subscriptions.topics(client_id)
    }

    pub fn is_subscribed(&self, client_id: &str, topic: &str) -> bool {
        self.inner.subscriptions.is_subscribed(client_id, topic)
    }

    pub fn add_handler(&self, client_id: &str, handler: Arc<dyn MessageHandler>) -> Result<HandlerId> {
        Ok(self.entry(client_id)?.dispatcher.chain().add(handler))
    }

    pub fn remove_handler(&self, client_id: &str, handler_id: HandlerId) -> Result<bool> {
        Ok(self.entry(client_id)?.dispatcher.chain().remove(handler_id))
    }

    pub fn is_client_active(&self, client_id: &str) -> bool {
        self.entry(client_id)
            .ok()
            .and_then(|entry| entry.current())
            .map(|connection| connection.is_active())
            .unwrap_or(false)
    }

    pub fn active_clients_count(&self) -> usize {
        self.client_ids()
            .iter()
            .filter(|id| self.is_client_active(id))
            .count()
    }

    /// 등록되지 않은 id 면 None, 연결 사이(재연결 대기 등)면 Idle
    pub fn connection_state(&self, client_id: &str) -> Option<ConnectionState> {
        let entry = self.entry(client_id).ok()?;
        let state = entry
            .current()
            .map(|connection| connection.state())
            .unwrap_or(ConnectionState::Idle);
        Some(state)
    }

    pub fn heartbeat(&self, client_id: &str) -> Option<HeartbeatSnapshot> {
        self.entry(client_id).ok()?.current().map(|connection| connection.heartbeat())
    }

    /// 현재 연속 실패 횟수
    pub fn reconnect_attempts(&self, client_id: &str) -> Option<u32> {
        let entry = self.entry(client_id).ok()?;
        let attempts = entry.state.lock().reconnect.attempt_count();
        Some(attempts)
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.inner.clients.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }
}

fn new_entry(spec: &ClientSpec, endpoint: Arc<EndpointDescriptor>) -> ClientEntry {
    let chain = Arc::new(HandlerChain::new());
    for handler in &spec.handlers {
        chain.add(Arc::clone(handler));
    }
    let (stop_tx, _) = watch::channel(false);

    ClientEntry {
        client_id: spec.client_id.clone(),
        endpoint,
        running: AtomicBool::new(true),
        stop_tx,
        state: Mutex::new(SupervisorState {
            current: None,
            reconnect: spec.reconnect.new_state(),
        }),
        dispatcher: Dispatcher::new(spec.client_id.clone(), spec.pong_token(), chain),
        codec: Arc::clone(&spec.codec),
        callback: Arc::clone(&spec.callback),
        subscription_callback: Arc::clone(&spec.subscription_callback),
        options: spec.options.clone(),
        policy: spec.reconnect.clone(),
        task: Mutex::new(None),
    }
}

/// 수신 프레임 → 구독 응답 처리 → 디스패처
struct InboundRouter {
    inner: Arc<Inner>,
    entry: Arc<ClientEntry>,
}

impl FrameSink for InboundRouter {
    fn on_text(&self, connection: &ConnectionHandle, text: &str) {
        let entry = &self.entry;
        if !entry.dispatcher.is_pong(text) {
            self.inner.subscriptions.handle_ack(
                &entry.client_id,
                text,
                entry.codec.as_ref(),
                &entry.subscription_callback,
            );
        }
        if let Routed::Chain(outcome) = entry.dispatcher.route(connection, text) {
            if outcome.stopped {
                debug!("[{}] 핸들러 체인 중단 ({}개 호출)", entry.client_id, outcome.invoked);
            }
        }
    }
}

/// 정지 신호가 올 때까지 대기
async fn stopped(stop_rx: &mut watch::Receiver<bool>) {
    loop {
        let stopped = *stop_rx.borrow_and_update();
        if stopped || stop_rx.changed().await.is_err() {
            return;
        }
    }
}

/// 클라이언트 하나의 감독 루프. 이 태스크만 해당 클라이언트의 연결을 만든다.
async fn supervise(inner: Arc<Inner>, entry: Arc<ClientEntry>) {
    let client_id = entry.client_id.clone();
    let mut stop_rx = entry.stop_tx.subscribe();
    let router: Arc<dyn FrameSink> = Arc::new(InboundRouter {
        inner: Arc::clone(&inner),
        entry: Arc::clone(&entry),
    });

    let mut connected_before = false;

    while entry.is_running() {
        let attempt = entry.state.lock().reconnect.attempt_count() + 1;
        info!(
            "🔌 [{}] 연결 시도 #{}/{}",
            client_id,
            attempt,
            entry.policy.max_attempts.max(1)
        );

        let connection = Connection::new(client_id.clone(), Arc::clone(&entry.endpoint), entry.options.clone());
        let outcome = tokio::select! {
            biased;
            _ = stopped(&mut stop_rx) => None,
            result = connection.connect() => Some(result),
        };

        let established = match outcome {
            None => break,
            Some(Ok(established)) => established,
            Some(Err(e)) => {
                warn!("❌ [{}] 연결 실패: {}", client_id, e);
                if !after_failure(&inner, &entry, &mut stop_rx).await {
                    break;
                }
                continue;
            }
        };
        let (connection, driver) = established.into_parts();

        // stop_client 와 같은 락 아래에서 등록 여부를 결정
        let accepted = {
            let mut state = entry.state.lock();
            if entry.is_running() {
                state.reconnect.reset();
                state.current = Some(connection.clone());
                true
            } else {
                false
            }
        };
        if !accepted {
            debug!("🔒 [{}] 중지된 클라이언트의 새 연결 즉시 종료", client_id);
            connection.close();
            driver.run(Arc::clone(&router)).await;
            break;
        }

        // 재전송을 큐에 넣은 뒤에 연결 완료를 알리고, 그 다음에 수신을 시작한다
        inner.subscriptions.replay(
            &client_id,
            &connection,
            entry.codec.as_ref(),
            &entry.subscription_callback,
        );
        entry.callback.on_connected(&client_id);
        if connected_before {
            entry.callback.on_reconnected(&client_id);
        }
        connected_before = true;

        let reason = driver.run(Arc::clone(&router)).await;

        let still_running = {
            let mut state = entry.state.lock();
            if state.current.as_ref().map(|c| c.id()) == Some(connection.id()) {
                state.current = None;
            }
            entry.is_running()
        };
        if !still_running {
            break;
        }

        entry.callback.on_disconnected(&client_id, &reason);
        if !after_failure(&inner, &entry, &mut stop_rx).await {
            break;
        }
    }

    debug!("[{}] 감독 태스크 종료", client_id);
}

/// 실패 한 번 기록 후 재시도 대기. 계속 진행하면 true
async fn after_failure(inner: &Inner, entry: &Arc<ClientEntry>, stop_rx: &mut watch::Receiver<bool>) -> bool {
    let (exhausted, attempts) = {
        let mut state = entry.state.lock();
        let exhausted = state.reconnect.record_failure();
        (exhausted, state.reconnect.attempt_count())
    };

    if exhausted {
        // stop_client 와 경합했다면 그쪽이 이미 정리했다
        if entry.stop() {
            error!(
                "💀 {} ({}회 시도). 연결 포기",
                SocketError::ReconnectExhausted(entry.client_id.clone()),
                attempts
            );
            inner
                .clients
                .remove_if(&entry.client_id, |_, existing| Arc::ptr_eq(existing, entry));
            inner.subscriptions.clear(&entry.client_id);
            entry.callback.on_exhausted(&entry.client_id);
        }
        return false;
    }

    let delay = entry.policy.delay_for(attempts.saturating_sub(1));
    warn!(
        "🔄 [{}] {}ms 후 재연결 ({}/{})",
        entry.client_id,
        delay.as_millis(),
        attempts,
        entry.policy.max_attempts.max(1)
    );

    tokio::select! {
        biased;
        _ = stopped(stop_rx) => false,
        _ = time::sleep(delay) => entry.is_running(),
    }
}
