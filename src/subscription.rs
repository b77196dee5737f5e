/// 클라이언트별 구독 목록
/// 재연결을 넘어 유지되며, 연결될 때마다 전체 목록을 다시 보낸다.

use crate::callback::{SubscriptionAction, SubscriptionCallback};
use crate::client::ClientId;
use crate::codec::SubscriptionCodec;
use crate::connection::{ConnectionHandle, WriteListener};
use dashmap::DashMap;
use log::{debug, info};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// 이미 구독 중 (전송 없음)
    AlreadySubscribed,
    /// 활성 연결로 즉시 전송
    Sent,
    /// 연결이 없어 기록만 함. 다음 연결 때 전송된다
    Recorded,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    sets: DashMap<ClientId, HashSet<String>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 토픽을 목록에 넣고, 활성 연결이 있으면 바로 전송한다.
    /// `current` 는 목록 갱신 뒤 같은 항목 락 아래에서 읽으므로
    /// 동시에 진행되는 replay 와 합쳐서 토픽이 빠지는 일은 없다.
    pub fn subscribe<F>(
        &self,
        client_id: &str,
        topic: &str,
        current: F,
        codec: &dyn SubscriptionCodec,
        callback: &Arc<dyn SubscriptionCallback>,
    ) -> SubscribeOutcome
    where
        F: FnOnce() -> Option<ConnectionHandle>,
    {
        let mut set = self.sets.entry(client_id.to_string()).or_default();
        if !set.insert(topic.to_string()) {
            drop(set);
            debug!("📋 [{}] 이미 구독 중: {}", client_id, topic);
            callback.on_success(client_id, topic, SubscriptionAction::Subscribe);
            return SubscribeOutcome::AlreadySubscribed;
        }

        match current().filter(|conn| conn.is_active()) {
            Some(conn) => {
                let frame = codec.format_subscribe(topic);
                if send_tracked(&conn, frame, client_id, topic, SubscriptionAction::Subscribe, callback) {
                    SubscribeOutcome::Sent
                } else {
                    SubscribeOutcome::Recorded
                }
            }
            None => {
                debug!("📋 [{}] 연결 전이므로 구독만 기록: {}", client_id, topic);
                SubscribeOutcome::Recorded
            }
        }
    }

    /// 구독 중이던 토픽이면 true. 모르는 토픽은 에러 없이 무시한다.
    /// 해제 프레임은 항목 락 아래에서 큐에 넣으므로 replay 의 구독 프레임보다 앞서지 않는다.
    pub fn unsubscribe<F>(
        &self,
        client_id: &str,
        topic: &str,
        current: F,
        codec: &dyn SubscriptionCodec,
        callback: &Arc<dyn SubscriptionCallback>,
    ) -> bool
    where
        F: FnOnce() -> Option<ConnectionHandle>,
    {
        let Some(mut set) = self.sets.get_mut(client_id) else {
            debug!("📋 [{}] 구독 목록 없음, 해제 요청 무시: {}", client_id, topic);
            return false;
        };
        if !set.remove(topic) {
            debug!("📋 [{}] 구독 중이 아닌 토픽 해제 요청 무시: {}", client_id, topic);
            return false;
        }

        if let Some(conn) = current().filter(|conn| conn.is_active()) {
            let frame = codec.format_unsubscribe(topic);
            send_tracked(&conn, frame, client_id, topic, SubscriptionAction::Unsubscribe, callback);
        }
        true
    }

    /// 연결 직후 전체 구독 재전송. 큐에 넣은 건수를 돌려준다.
    /// 전송이 끝날 때까지 항목 락을 잡고 있어 subscribe / unsubscribe 와 순서가 섞이지 않는다.
    pub fn replay(
        &self,
        client_id: &str,
        connection: &ConnectionHandle,
        codec: &dyn SubscriptionCodec,
        callback: &Arc<dyn SubscriptionCallback>,
    ) -> usize {
        let Some(set) = self.sets.get(client_id) else {
            return 0;
        };
        let total = set.len();
        let sent = set
            .iter()
            .filter(|topic| {
                let frame = codec.format_subscribe(topic);
                send_tracked(connection, frame, client_id, topic, SubscriptionAction::Resubscribe, callback)
            })
            .count();
        drop(set);

        if total > 0 {
            info!("🔁 [{}] 구독 {}/{}건 재전송", client_id, sent, total);
        }
        sent
    }

    /// 정렬된 토픽 목록 (복사본)
    pub fn topics(&self, client_id: &str) -> Vec<String> {
        let mut topics: Vec<String> = self
            .sets
            .get(client_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }

    pub fn is_subscribed(&self, client_id: &str, topic: &str) -> bool {
        self.sets
            .get(client_id)
            .map(|set| set.contains(topic))
            .unwrap_or(false)
    }

    /// 클라이언트의 구독 목록 삭제. 지운 토픽 수
    pub fn clear(&self, client_id: &str) -> usize {
        self.sets.remove(client_id).map(|(_, set)| set.len()).unwrap_or(0)
    }

    /// 구독 응답 프레임이면 콜백을 호출하고 true
    pub fn handle_ack(
        &self,
        client_id: &str,
        frame: &str,
        codec: &dyn SubscriptionCodec,
        callback: &Arc<dyn SubscriptionCallback>,
    ) -> bool {
        let Some(ack) = codec.parse_ack(frame) else {
            return false;
        };

        // 구독 목록에 있는 원래 토픽 표기로 보고
        let topic = self
            .sets
            .get(client_id)
            .and_then(|set| set.iter().find(|t| codec.matches_topic(t, &ack.topic)).cloned())
            .unwrap_or_else(|| ack.topic.clone());

        match ack.error {
            None => callback.on_success(client_id, &topic, ack.action),
            Some(reason) => callback.on_failure(client_id, &topic, ack.action, &reason),
        }
        true
    }
}

/// 쓰기 실패 시 on_failure 로 통지되는 전송. 큐에 들어갔으면 true
fn send_tracked(
    connection: &ConnectionHandle,
    frame: String,
    client_id: &str,
    topic: &str,
    action: SubscriptionAction,
    callback: &Arc<dyn SubscriptionCallback>,
) -> bool {
    let callback = Arc::clone(callback);
    let owner = client_id.to_string();
    let failed_topic = topic.to_string();
    let listener: WriteListener = Box::new(move |result| {
        if let Err(e) = result {
            callback.on_failure(&owner, &failed_topic, action, &e.to_string());
        }
    });

    match connection.send_with_listener(frame, listener) {
        Ok(()) => true,
        Err(e) => {
            // 방금 연결이 끊긴 경우. 목록에 남아 있으므로 재연결 시 다시 전송된다
            debug!("📋 [{}] {} 전송 보류 ({}): {}", client_id, action, e, topic);
            false
        }
    }
}
