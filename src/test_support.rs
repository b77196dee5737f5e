//! 테스트용 로컬 서버
//! 127.0.0.1 임의 포트에 WebSocket 서버를 띄우고, 접속별로 수신 프레임 / 송신 명령 채널을 돌려준다.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;

pub(crate) const WAIT: Duration = Duration::from_secs(5);

enum ServerCommand {
    Text(String),
    Close,
    Drop,
}

/// 서버 쪽에서 본 접속 하나
pub(crate) struct ServerConn {
    incoming: mpsc::UnboundedReceiver<String>,
    commands: mpsc::UnboundedSender<ServerCommand>,
}

impl ServerConn {
    /// 다음 수신 텍스트 프레임 (WAIT 안에 오지 않으면 None)
    pub(crate) async fn recv(&mut self) -> Option<String> {
        self.recv_within(WAIT).await
    }

    pub(crate) async fn recv_within(&mut self, wait: Duration) -> Option<String> {
        time::timeout(wait, self.incoming.recv()).await.ok().flatten()
    }

    /// ping 은 건너뛰고 다음 프레임
    pub(crate) async fn recv_data(&mut self) -> Option<String> {
        loop {
            match self.recv().await {
                Some(frame) if frame == "ping" => continue,
                other => return other,
            }
        }
    }

    pub(crate) fn send(&self, text: &str) {
        let _ = self.commands.send(ServerCommand::Text(text.to_string()));
    }

    /// Close 프레임을 보내고 접속 종료
    pub(crate) fn close(&self) {
        let _ = self.commands.send(ServerCommand::Close);
    }

    /// Close 프레임 없이 소켓을 끊는다
    pub(crate) fn drop_transport(&self) {
        let _ = self.commands.send(ServerCommand::Drop);
    }
}

pub(crate) struct TestServer {
    addr: SocketAddr,
    conns: mpsc::UnboundedReceiver<ServerConn>,
    accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl TestServer {
    /// auto_pong 이면 "ping" 텍스트에 "pong" 으로 답한다
    pub(crate) async fn start(auto_pong: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (conn_tx, conns) = mpsc::unbounded_channel();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let conn_tx = conn_tx.clone();
                tokio::spawn(async move {
                    let Ok(ws) = accept_async(stream).await else {
                        return;
                    };
                    let (mut write, mut read) = ws.split();
                    let (in_tx, incoming) = mpsc::unbounded_channel();
                    let (commands, mut cmd_rx) = mpsc::unbounded_channel();
                    if conn_tx.send(ServerConn { incoming, commands }).is_err() {
                        return;
                    }

                    loop {
                        tokio::select! {
                            msg = read.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    if auto_pong && text == "ping" {
                                        let _ = write.send(Message::Text("pong".to_string())).await;
                                    }
                                    let _ = in_tx.send(text);
                                }
                                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                Some(Ok(_)) => {}
                            },
                            Some(cmd) = cmd_rx.recv() => match cmd {
                                ServerCommand::Text(text) => {
                                    if write.send(Message::Text(text)).await.is_err() {
                                        break;
                                    }
                                }
                                ServerCommand::Close => {
                                    let _ = write.send(Message::Close(None)).await;
                                    break;
                                }
                                ServerCommand::Drop => break,
                            },
                        }
                    }
                });
            }
        });

        Self {
            addr,
            conns,
            accepted,
            task,
        }
    }

    pub(crate) fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub(crate) async fn next_conn(&mut self) -> ServerConn {
        time::timeout(WAIT, self.conns.recv())
            .await
            .expect("접속 대기 시간 초과")
            .expect("서버 종료됨")
    }

    pub(crate) fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// 모든 업그레이드 요청에 HTTP 400 으로 답하는 서버. 접속 수를 센다.
pub(crate) struct RejectingServer {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl RejectingServer {
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);

        let task = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    // 요청 헤더를 끝까지 읽은 뒤 응답
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    let _ = stream
                        .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                        .await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self { addr, accepted, task }
    }

    pub(crate) fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub(crate) fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for RejectingServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// 아무도 듣고 있지 않은 주소
pub(crate) async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}", addr)
}
