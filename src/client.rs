/// 클라이언트 등록 정보
/// start_client 에 넘기는 한 논리 연결의 설정 묶음

use crate::callback::{ConnectionCallback, LoggingCallback, SubscriptionCallback};
use crate::codec::{JsonOpCodec, SubscriptionCodec};
use crate::connection::ConnectionOptions;
use crate::handler::MessageHandler;
use crate::heartbeat::HeartbeatConfig;
use crate::reconnect::ReconnectPolicy;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// 호출자가 정하는 논리 연결 이름. 재연결과 무관하게 유지된다.
pub type ClientId = String;

#[derive(Clone)]
pub struct ClientSpec {
    pub client_id: ClientId,
    pub url: String,
    pub codec: Arc<dyn SubscriptionCodec>,
    pub callback: Arc<dyn ConnectionCallback>,
    pub subscription_callback: Arc<dyn SubscriptionCallback>,
    pub options: ConnectionOptions,
    pub reconnect: ReconnectPolicy,
    pub handlers: Vec<Arc<dyn MessageHandler>>,
    /// 시작 시점에 등록할 토픽. 첫 연결 때 전송된다
    pub topics: Vec<String>,
}

impl fmt::Debug for ClientSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSpec")
            .field("client_id", &self.client_id)
            .field("url", &self.url)
            .field("options", &self.options)
            .field("reconnect", &self.reconnect)
            .field("handlers", &self.handlers.len())
            .field("topics", &self.topics)
            .finish_non_exhaustive()
    }
}

impl ClientSpec {
    pub fn new(client_id: impl Into<ClientId>, url: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            url: url.into(),
            codec: Arc::new(JsonOpCodec),
            callback: Arc::new(LoggingCallback),
            subscription_callback: Arc::new(LoggingCallback),
            options: ConnectionOptions::default(),
            reconnect: ReconnectPolicy::default(),
            handlers: Vec::new(),
            topics: Vec::new(),
        }
    }

    pub fn codec(mut self, codec: Arc<dyn SubscriptionCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn callback(mut self, callback: Arc<dyn ConnectionCallback>) -> Self {
        self.callback = callback;
        self
    }

    pub fn subscription_callback(mut self, callback: Arc<dyn SubscriptionCallback>) -> Self {
        self.subscription_callback = callback;
        self
    }

    pub fn trust_all_certs(mut self, trust: bool) -> Self {
        self.options.trust_all_certs = trust;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.options.handshake_timeout = timeout;
        self
    }

    /// None 이면 하트비트 비활성
    pub fn heartbeat(mut self, heartbeat: Option<HeartbeatConfig>) -> Self {
        self.options.heartbeat = heartbeat;
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.push(topic.into());
        self
    }

    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics.extend(topics.into_iter().map(Into::into));
        self
    }

    /// 하트비트가 켜져 있을 때만 pong 토큰을 가진다
    pub(crate) fn pong_token(&self) -> Option<String> {
        self.options.heartbeat.as_ref().map(|hb| hb.pong_token.clone())
    }
}
