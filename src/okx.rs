/// OKX v5 WebSocket 지원
/// 구독 메시지 형식, 구독 응답 파싱, 티커 로그 핸들러

use crate::callback::SubscriptionAction;
use crate::codec::{SubscriptionAck, SubscriptionCodec};
use crate::handler::{HandlerContext, MessageHandler};
use anyhow::Context;
use chrono::Utc;
use log::info;
use serde::Deserialize;
use serde_json::{json, Value};

pub const OKX_PUBLIC_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";
/// 데모 트레이딩 환경
pub const OKX_DEMO_PUBLIC_URL: &str = "wss://wspap.okx.com:8443/ws/v5/public";

/// `{"id":"<millis>","op":"subscribe","args":[<topic>]}`
/// 토픽이 JSON 이면 객체로, 아니면 문자열로 args 에 넣는다.
#[derive(Debug, Default, Clone, Copy)]
pub struct OkxCodec;

impl OkxCodec {
    fn envelope(op: &str, topic: &str) -> String {
        let arg = serde_json::from_str::<Value>(topic).unwrap_or_else(|_| Value::String(topic.to_string()));
        json!({
            "id": Utc::now().timestamp_millis().to_string(),
            "op": op,
            "args": [arg],
        })
        .to_string()
    }
}

#[derive(Debug, Deserialize)]
struct OkxEvent {
    event: String,
    #[serde(default)]
    arg: Option<Value>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    msg: Option<String>,
}

impl SubscriptionCodec for OkxCodec {
    fn format_subscribe(&self, topic: &str) -> String {
        Self::envelope("subscribe", topic)
    }

    fn format_unsubscribe(&self, topic: &str) -> String {
        Self::envelope("unsubscribe", topic)
    }

    fn parse_ack(&self, frame: &str) -> Option<SubscriptionAck> {
        if !frame.contains("\"event\"") {
            return None;
        }
        let event: OkxEvent = serde_json::from_str(frame).ok()?;
        let topic = event.arg.as_ref().map(Value::to_string).unwrap_or_default();

        match event.event.as_str() {
            "subscribe" => Some(SubscriptionAck {
                action: SubscriptionAction::Subscribe,
                topic,
                error: None,
            }),
            "unsubscribe" => Some(SubscriptionAck {
                action: SubscriptionAction::Unsubscribe,
                topic,
                error: None,
            }),
            "error" => Some(SubscriptionAck {
                action: SubscriptionAction::Subscribe,
                topic,
                error: Some(format!(
                    "{} {}",
                    event.code.unwrap_or_default(),
                    event.msg.unwrap_or_default()
                )),
            }),
            _ => None,
        }
    }

    /// 키 순서와 공백에 상관없이 JSON 값으로 비교
    fn matches_topic(&self, subscribed: &str, acked: &str) -> bool {
        match (
            serde_json::from_str::<Value>(subscribed),
            serde_json::from_str::<Value>(acked),
        ) {
            (Ok(a), Ok(b)) => a == b,
            _ => subscribed == acked,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerUpdate {
    pub channel: String,
    pub inst_id: String,
    pub last: String,
}

#[derive(Debug, Deserialize)]
struct OkxPush {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    arg: Option<OkxArg>,
    #[serde(default)]
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct OkxArg {
    channel: String,
    #[serde(rename = "instId", default)]
    inst_id: Option<String>,
}

/// 티커 푸시면 마지막 데이터 항목을 꺼낸다. 이벤트 / pong 프레임은 None
pub fn parse_ticker(message: &str) -> anyhow::Result<Option<TickerUpdate>> {
    if message.eq_ignore_ascii_case("pong") {
        return Ok(None);
    }

    let push: OkxPush = serde_json::from_str(message).with_context(|| format!("OKX 메시지 파싱 실패: {}", message))?;
    if push.event.is_some() {
        return Ok(None);
    }
    let Some(arg) = push.arg else {
        return Ok(None);
    };
    let last = push
        .data
        .last()
        .and_then(|item| item.get("last"))
        .and_then(Value::as_str)
        .with_context(|| format!("{} 데이터에 last 없음", arg.channel))?;

    Ok(Some(TickerUpdate {
        channel: arg.channel,
        inst_id: arg.inst_id.unwrap_or_default(),
        last: last.to_string(),
    }))
}

/// 티커 푸시를 로그로 남기는 핸들러. 체인은 항상 계속 진행한다.
#[derive(Debug, Default, Clone, Copy)]
pub struct OkxTickerHandler;

impl MessageHandler for OkxTickerHandler {
    fn handle(&self, message: &str, ctx: &HandlerContext<'_>) -> anyhow::Result<bool> {
        if let Some(ticker) = parse_ticker(message)? {
            info!(
                "📈 [{}] channel: {}, instId: {}, price: {}",
                ctx.client_id, ticker.channel, ticker.inst_id, ticker.last
            );
        }
        Ok(true)
    }
}
