/// 연결 수명주기 / 구독 결과 콜백
/// 모든 메서드는 기본 구현을 가지므로 필요한 것만 재정의하면 된다.

use crate::connection::DisconnectReason;
use crate::errors::SocketError;
use log::{error, info, warn};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionAction {
    Subscribe,
    Unsubscribe,
    /// 재연결 후 자동 재구독
    Resubscribe,
}

impl SubscriptionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionAction::Subscribe => "subscribe",
            SubscriptionAction::Unsubscribe => "unsubscribe",
            SubscriptionAction::Resubscribe => "resubscribe",
        }
    }
}

impl fmt::Display for SubscriptionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait ConnectionCallback: Send + Sync {
    /// 연결 + 구독 재전송이 끝난 뒤 호출
    fn on_connected(&self, _client_id: &str) {}

    /// 끊겼던 연결이 다시 붙었을 때. 같은 연결에 대한 on_connected 바로 뒤에 호출된다.
    fn on_reconnected(&self, _client_id: &str) {}

    /// Active 상태였던 연결이 예기치 않게 끊겼을 때 (stop_client 에 의한 종료는 제외)
    fn on_disconnected(&self, _client_id: &str, _reason: &DisconnectReason) {}

    /// 재연결 시도 소진. 클라이언트 상태는 이미 제거된 뒤다.
    fn on_exhausted(&self, _client_id: &str) {}

    /// send() 로 큐에 들어간 프레임의 쓰기가 실패한 경우
    fn on_send_failed(&self, _client_id: &str, _error: &SocketError) {}
}

pub trait SubscriptionCallback: Send + Sync {
    fn on_success(&self, _client_id: &str, _topic: &str, _action: SubscriptionAction) {}

    fn on_failure(&self, _client_id: &str, _topic: &str, _action: SubscriptionAction, _reason: &str) {}
}

/// 로그만 남기는 기본 콜백
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingCallback;

impl ConnectionCallback for LoggingCallback {
    fn on_connected(&self, client_id: &str) {
        info!("✅ [{}] 연결 완료", client_id);
    }

    fn on_reconnected(&self, client_id: &str) {
        info!("🔄 [{}] 재연결 완료", client_id);
    }

    fn on_disconnected(&self, client_id: &str, reason: &DisconnectReason) {
        warn!("🔌 [{}] 연결 끊김: {}", client_id, reason);
    }

    fn on_exhausted(&self, client_id: &str) {
        error!("💀 [{}] 재연결 포기", client_id);
    }

    fn on_send_failed(&self, client_id: &str, error: &SocketError) {
        error!("❌ [{}] 전송 실패: {}", client_id, error);
    }
}

impl SubscriptionCallback for LoggingCallback {
    fn on_success(&self, client_id: &str, topic: &str, action: SubscriptionAction) {
        info!("📨 [{}] {} 성공: {}", client_id, action, topic);
    }

    fn on_failure(&self, client_id: &str, topic: &str, action: SubscriptionAction, reason: &str) {
        error!("❌ [{}] {} 실패: {} ({})", client_id, action, topic, reason);
    }
}
