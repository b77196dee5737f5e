/// 구독 메시지 코덱
/// 토픽 문자열 → 거래소별 구독/구독해제 프레임. 토픽 자체는 코어에서 해석하지 않는다.

use crate::callback::SubscriptionAction;
use std::fmt;
use std::sync::Arc;

/// 거래소가 돌려준 구독 응답 (ack / nack)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionAck {
    pub action: SubscriptionAction,
    pub topic: String,
    /// Some 이면 거래소가 거부한 것
    pub error: Option<String>,
}

pub trait SubscriptionCodec: Send + Sync {
    fn format_subscribe(&self, topic: &str) -> String;

    fn format_unsubscribe(&self, topic: &str) -> String;

    /// 수신 프레임이 구독 응답이면 파싱한다.
    /// 기본 형식: `ACK:SUBSCRIBE:<topic>` / `ACK:UNSUBSCRIBE:<topic>`
    fn parse_ack(&self, frame: &str) -> Option<SubscriptionAck> {
        let mut parts = frame.splitn(3, ':');
        if parts.next()? != "ACK" {
            return None;
        }
        let action = match parts.next()? {
            "SUBSCRIBE" => SubscriptionAction::Subscribe,
            "UNSUBSCRIBE" => SubscriptionAction::Unsubscribe,
            _ => return None,
        };
        let topic = parts.next()?;
        Some(SubscriptionAck {
            action,
            topic: topic.to_string(),
            error: None,
        })
    }

    /// ack 에 실린 토픽과 구독 목록의 토픽이 같은지
    fn matches_topic(&self, subscribed: &str, acked: &str) -> bool {
        subscribed == acked
    }
}

/// `{"op":"subscribe","args":[<topic>]}` 형식. 토픽은 JSON 조각으로 그대로 삽입된다.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonOpCodec;

impl SubscriptionCodec for JsonOpCodec {
    fn format_subscribe(&self, topic: &str) -> String {
        format!("{{\"op\":\"subscribe\",\"args\":[{}]}}", topic)
    }

    fn format_unsubscribe(&self, topic: &str) -> String {
        format!("{{\"op\":\"unsubscribe\",\"args\":[{}]}}", topic)
    }
}

type Formatter = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// 호출자가 넘긴 클로저 쌍으로 메시지를 만드는 코덱
#[derive(Clone)]
pub struct FnCodec {
    subscribe: Formatter,
    unsubscribe: Formatter,
}

impl FnCodec {
    pub fn new<S, U>(subscribe: S, unsubscribe: U) -> Self
    where
        S: Fn(&str) -> String + Send + Sync + 'static,
        U: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            subscribe: Arc::new(subscribe),
            unsubscribe: Arc::new(unsubscribe),
        }
    }

    /// `SUB:<topic>` / `UNSUB:<topic>` 텍스트 프로토콜
    pub fn prefixed() -> Self {
        Self::new(|t| format!("SUB:{}", t), |t| format!("UNSUB:{}", t))
    }
}

impl fmt::Debug for FnCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCodec").finish_non_exhaustive()
    }
}

impl SubscriptionCodec for FnCodec {
    fn format_subscribe(&self, topic: &str) -> String {
        (self.subscribe)(topic)
    }

    fn format_unsubscribe(&self, topic: &str) -> String {
        (self.unsubscribe)(topic)
    }
}
