/// 클라이언트별 수신 라우팅
/// pong 토큰은 하트비트로 흡수하고, 나머지는 핸들러 체인으로 넘긴다.

use crate::connection::ConnectionHandle;
use crate::handler::{ChainOutcome, HandlerChain, HandlerContext};
use log::{debug, trace};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Heartbeat,
    Chain(ChainOutcome),
}

pub struct Dispatcher {
    client_id: String,
    /// None 이면 하트비트 없이 동작하는 클라이언트
    pong_token: Option<String>,
    chain: Arc<HandlerChain>,
}

impl Dispatcher {
    pub fn new(client_id: impl Into<String>, pong_token: Option<String>, chain: Arc<HandlerChain>) -> Self {
        Self {
            client_id: client_id.into(),
            pong_token,
            chain,
        }
    }

    pub fn chain(&self) -> &Arc<HandlerChain> {
        &self.chain
    }

    pub fn is_pong(&self, message: &str) -> bool {
        self.pong_token.as_deref() == Some(message)
    }

    pub fn route(&self, connection: &ConnectionHandle, message: &str) -> Routed {
        if self.is_pong(message) {
            if connection.mark_pong() {
                trace!("💓 [{}] pong 수신", self.client_id);
            }
            return Routed::Heartbeat;
        }

        let ctx = HandlerContext {
            client_id: &self.client_id,
            connection,
        };
        let outcome = self.chain.dispatch(message, &ctx);
        if outcome.invoked == 0 {
            debug!("📭 [{}] 등록된 핸들러 없음, 메시지 버림", self.client_id);
        }
        Routed::Chain(outcome)
    }
}
