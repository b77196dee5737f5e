use thiserror::Error;

#[derive(Error, Debug)]
pub enum SocketError {
    #[error("지원하지 않는 스킴 (ws:// 또는 wss:// 필요): {0}")]
    InvalidScheme(String),

    #[error("호스트가 비어있음: {0}")]
    InvalidHost(String),

    #[error("잘못된 포트: {0}")]
    InvalidPort(String),

    #[error("연결 실패: {0}")]
    ConnectFailed(String),

    #[error("WebSocket 핸드셰이크 실패: {0}")]
    HandshakeFailed(String),

    #[error("하트비트 응답 없음")]
    HeartbeatTimeout,

    #[error("전송 실패: {0}")]
    SendFailed(String),

    #[error("클라이언트 {0} 연결되지 않음")]
    NotConnected(String),

    #[error("등록되지 않은 클라이언트: {0}")]
    UnknownClient(String),

    #[error("클라이언트 {0} 최대 재연결 횟수 초과")]
    ReconnectExhausted(String),

    #[error("레지스트리가 종료됨")]
    ShutDown,

    #[error("설정 오류: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O 오류: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SocketError>;
