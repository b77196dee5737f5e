/// 메시지 핸들러 체인
/// 등록 순서대로 호출하고, 어떤 핸들러가 false(중단)를 돌려주면 거기서 멈춘다.
/// 핸들러의 에러나 패닉은 로그만 남기고 다음 핸들러로 넘어간다.

use crate::connection::ConnectionHandle;
use crate::errors::Result;
use log::{error, warn};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type HandlerId = u64;

/// 핸들러가 받는 연결 정보
pub struct HandlerContext<'a> {
    pub client_id: &'a str,
    pub connection: &'a ConnectionHandle,
}

impl<'a> HandlerContext<'a> {
    /// 같은 연결로 응답 전송
    pub fn send(&self, text: impl Into<String>) -> Result<()> {
        self.connection.send(text)
    }
}

pub trait MessageHandler: Send + Sync {
    /// Ok(true) 면 다음 핸들러로 계속, Ok(false) 면 이 메시지의 체인을 끝낸다
    fn handle(&self, message: &str, ctx: &HandlerContext<'_>) -> anyhow::Result<bool>;
}

/// 클로저를 핸들러로 감싼다
pub struct FnHandler<F>(F);

impl<F> FnHandler<F>
where
    F: Fn(&str, &HandlerContext<'_>) -> anyhow::Result<bool> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&str, &HandlerContext<'_>) -> anyhow::Result<bool> + Send + Sync,
{
    fn handle(&self, message: &str, ctx: &HandlerContext<'_>) -> anyhow::Result<bool> {
        (self.0)(message, ctx)
    }
}

pub fn handler_fn<F>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(&str, &HandlerContext<'_>) -> anyhow::Result<bool> + Send + Sync + 'static,
{
    Arc::new(FnHandler::new(f))
}

type Entries = Arc<Vec<(HandlerId, Arc<dyn MessageHandler>)>>;

/// 한 번의 dispatch 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChainOutcome {
    pub invoked: usize,
    pub stopped: bool,
}

/// 복사 후 교체 방식의 핸들러 목록. 디스패치 중에도 추가/삭제가 가능하다.
pub struct HandlerChain {
    entries: RwLock<Entries>,
    next_id: AtomicU64,
}

impl Default for HandlerChain {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerChain {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn add(&self, handler: Arc<dyn MessageHandler>) -> HandlerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.write();
        let mut next = Vec::with_capacity(entries.len() + 1);
        next.extend(entries.iter().cloned());
        next.push((id, handler));
        *entries = Arc::new(next);
        id
    }

    /// 없는 id 면 false
    pub fn remove(&self, id: HandlerId) -> bool {
        let mut entries = self.entries.write();
        if !entries.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        let next: Vec<_> = entries.iter().filter(|(existing, _)| *existing != id).cloned().collect();
        *entries = Arc::new(next);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Entries {
        Arc::clone(&self.entries.read())
    }

    /// 락 없이 스냅샷 위에서 순서대로 호출
    pub fn dispatch(&self, message: &str, ctx: &HandlerContext<'_>) -> ChainOutcome {
        let entries = self.snapshot();
        let mut outcome = ChainOutcome::default();

        for (id, handler) in entries.iter() {
            outcome.invoked += 1;
            match catch_unwind(AssertUnwindSafe(|| handler.handle(message, ctx))) {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => {
                    outcome.stopped = true;
                    break;
                }
                Ok(Err(e)) => {
                    warn!("⚠️ [{}] 핸들러 #{} 처리 실패: {:#}", ctx.client_id, id, e);
                }
                Err(_) => {
                    error!("💥 [{}] 핸들러 #{} 패닉, 다음 핸들러로 진행", ctx.client_id, id);
                }
            }
        }

        outcome
    }
}
