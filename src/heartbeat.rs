/// 하트비트 정책
/// 쓰기 유휴 시 ping 전송, pong 대기 시간 초과 / 읽기 유휴 시 연결 종료 판단.
/// 타이머 자체는 연결 드라이버가 돌리고, 여기서는 시각 기반 판단만 한다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub ping_interval_ms: u64,
    pub pong_timeout_ms: u64,
    /// None 이면 읽기 유휴 감시를 하지 않는다
    pub read_idle_timeout_ms: Option<u64>,
    pub ping_message: String,
    pub pong_token: String,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        // OKX 는 30초 무응답 시 서버가 끊으므로 그보다 짧게
        Self {
            ping_interval_ms: 20_000,
            pong_timeout_ms: 10_000,
            read_idle_timeout_ms: Some(60_000),
            ping_message: "ping".to_string(),
            pong_token: "pong".to_string(),
        }
    }
}

impl HeartbeatConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms.max(1))
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms.max(1))
    }

    pub fn read_idle_timeout(&self) -> Option<Duration> {
        self.read_idle_timeout_ms.map(|ms| Duration::from_millis(ms.max(1)))
    }

    pub fn is_pong(&self, frame: &str) -> bool {
        frame == self.pong_token
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    Idle,
    SendPing,
    /// 이전 ping 에 대한 pong 이 오지 않음
    PongTimeout,
    /// 아무 프레임도 수신되지 않음
    ReadIdle,
}

/// 호출자에게 노출되는 하트비트 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeartbeatSnapshot {
    pub last_ping_sent_at: Option<DateTime<Utc>>,
    pub awaiting_pong: bool,
}

#[derive(Debug, Clone)]
pub struct HeartbeatStatus {
    last_ping_sent_at: Option<Instant>,
    last_ping_wall: Option<DateTime<Utc>>,
    awaiting_pong: bool,
    last_write: Instant,
    last_read: Instant,
}

impl HeartbeatStatus {
    pub fn new(now: Instant) -> Self {
        Self {
            last_ping_sent_at: None,
            last_ping_wall: None,
            awaiting_pong: false,
            last_write: now,
            last_read: now,
        }
    }

    pub fn record_write(&mut self, now: Instant) {
        self.last_write = now;
    }

    pub fn record_read(&mut self, now: Instant) {
        self.last_read = now;
    }

    pub fn record_ping(&mut self, now: Instant) {
        self.last_ping_sent_at = Some(now);
        self.last_ping_wall = Some(Utc::now());
        self.awaiting_pong = true;
        self.last_write = now;
    }

    /// pong 수신 처리. 대기 중이었으면 true
    pub fn record_pong(&mut self) -> bool {
        std::mem::replace(&mut self.awaiting_pong, false)
    }

    pub fn awaiting_pong(&self) -> bool {
        self.awaiting_pong
    }

    pub fn evaluate(&self, config: &HeartbeatConfig, now: Instant) -> HeartbeatAction {
        if let Some(idle) = config.read_idle_timeout() {
            if now >= self.last_read + idle {
                return HeartbeatAction::ReadIdle;
            }
        }

        if self.awaiting_pong {
            if let Some(sent) = self.last_ping_sent_at {
                if now >= sent + config.pong_timeout() {
                    return HeartbeatAction::PongTimeout;
                }
            }
        }

        if now >= self.last_write + config.ping_interval() {
            // 직전 ping 에 응답이 없는 상태에서 다시 쓰기 유휴 → 상대가 죽은 것으로 간주
            if self.awaiting_pong {
                return HeartbeatAction::PongTimeout;
            }
            return HeartbeatAction::SendPing;
        }

        HeartbeatAction::Idle
    }

    /// 다음으로 evaluate 해야 하는 시각
    pub fn next_deadline(&self, config: &HeartbeatConfig) -> Instant {
        let mut deadline = self.last_write + config.ping_interval();

        if self.awaiting_pong {
            if let Some(sent) = self.last_ping_sent_at {
                deadline = deadline.min(sent + config.pong_timeout());
            }
        }

        if let Some(idle) = config.read_idle_timeout() {
            deadline = deadline.min(self.last_read + idle);
        }

        deadline
    }

    pub fn snapshot(&self) -> HeartbeatSnapshot {
        HeartbeatSnapshot {
            last_ping_sent_at: self.last_ping_wall,
            awaiting_pong: self.awaiting_pong,
        }
    }
}
