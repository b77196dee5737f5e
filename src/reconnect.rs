/// 재연결 정책
/// 실패 횟수 카운트와 다음 시도까지의 지연 계산

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// 최초 시도를 포함한 최대 연속 실패 횟수
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff: Backoff,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 3_000,
            max_delay_ms: 60_000,
            backoff: Backoff::Fixed,
        }
    }
}

impl ReconnectPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        let delay_ms = delay.as_millis() as u64;
        Self {
            max_attempts,
            base_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            backoff: Backoff::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            base_delay_ms: base.as_millis() as u64,
            max_delay_ms: max.as_millis() as u64,
            backoff: Backoff::Exponential,
        }
    }

    /// retry_count 번째 실패(0부터) 이후 대기 시간
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let delay_ms = match self.backoff {
            Backoff::Fixed => self.base_delay_ms,
            // 2배씩 증가, 최대 max_delay
            Backoff::Exponential => self
                .base_delay_ms
                .saturating_mul(2_u64.pow(retry_count.min(16)))
                .min(self.max_delay_ms),
        };
        Duration::from_millis(delay_ms)
    }

    pub fn new_state(&self) -> ReconnectState {
        ReconnectState {
            attempt_count: 0,
            max_attempts: self.max_attempts.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectState {
    attempt_count: u32,
    max_attempts: u32,
}

impl ReconnectState {
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 연결 성공 시
    pub fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// 실패 기록. 소진되었으면 true
    pub fn record_failure(&mut self) -> bool {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.is_exhausted()
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }
}
