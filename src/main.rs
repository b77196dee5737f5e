use anyhow::Result;
use log::{debug, error, info, warn};
use socket_feeder::config::{FeederConfig, Protocol};
use socket_feeder::handler::handler_fn;
use socket_feeder::okx::OkxTickerHandler;
use socket_feeder::registry::ConnectionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Builder as TokioRuntimeBuilder;
use tokio::signal;

/// 활성 연결 수 로그 주기
const STATUS_INTERVAL: Duration = Duration::from_secs(30);

fn main() -> Result<()> {
    // 설정 로드 (런타임 쓰레드 수를 적용하기 위함)
    let config = FeederConfig::load()?;

    // 로깅 초기화 - config에서 수준/파일 설정 적용
    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.logging.level));
    logger
        .filter_module("tokio_tungstenite", log::LevelFilter::Info)
        .filter_module("tungstenite", log::LevelFilter::Info);
    if let Some(ref path) = config.logging.file_path {
        let path = std::path::Path::new(path);
        let _ = std::fs::create_dir_all(path.parent().unwrap_or(std::path::Path::new(".")));
        match std::fs::File::create(path) {
            Ok(file) => {
                logger.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("⚠️ 로그 파일 생성 실패 ({}): {}", path.display(), e),
        }
    }
    logger.init();

    // Tokio 런타임 구성 (runtime_threads 적용, 0 또는 None이면 기본값)
    let mut builder = TokioRuntimeBuilder::new_multi_thread();
    match config.runtime_threads() {
        Some(threads) => {
            info!("🧵 Tokio 멀티스레드 런타임 생성: worker_threads={}", threads);
            builder.worker_threads(threads);
        }
        None => info!("🧵 Tokio 멀티스레드 런타임 생성: 기본 쓰레드 수"),
    }
    let rt = builder
        .enable_all()
        .build()
        .map_err(|e| anyhow::anyhow!("Tokio 런타임 생성 실패: {}", e))?;

    rt.block_on(async_main(config))
}

async fn async_main(config: FeederConfig) -> Result<()> {
    // 명령행 인수에서 타이머 설정 읽기
    let timeout_seconds = parse_timeout_arg();

    info!("🚀 SocketFeeder 시작 중...");
    if let Some(timeout) = timeout_seconds {
        info!("⏰ {}초 후 자동 종료 예정", timeout);
    } else {
        info!("🔄 무한 실행 모드 (Ctrl+C로 종료)");
    }

    let registry = ConnectionRegistry::from_current()?;

    let total = config.clients.len();
    let mut started = 0;
    for client in config.enabled_clients() {
        let spec = match client.protocol {
            Protocol::Okx => client.to_spec().handler(Arc::new(OkxTickerHandler)),
            Protocol::JsonOp | Protocol::Prefixed => {
                let id = client.id.clone();
                client.to_spec().handler(handler_fn(move |message, _ctx| {
                    debug!("📨 [{}] {}", id, message);
                    Ok(true)
                }))
            }
        };

        match registry.start_client(spec) {
            Ok(registration) => {
                info!("   └─ {}: {}", registration.client_id(), registration.endpoint());
                started += 1;
            }
            Err(e) => error!("❌ [{}] 클라이언트 시작 실패: {}", client.id, e),
        }
    }
    info!("🌐 {}개 클라이언트 중 {}개 시작됨", total, started);
    if started == 0 {
        warn!("⚠️ 활성화된 클라이언트가 없습니다!");
    }

    // 상태 로그 태스크
    let status_registry = registry.clone();
    let status_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATUS_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            info!(
                "📊 활성 연결 {}/{}",
                status_registry.active_clients_count(),
                status_registry.client_ids().len()
            );
        }
    });

    // 종료 신호 대기 (선택적 타이머)
    let timer = async {
        match timeout_seconds {
            Some(timeout) => tokio::time::sleep(Duration::from_secs(timeout)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                error!("❌ 종료 신호 대기 실패: {}", e);
            }
            info!("🛑 종료 신호 수신, 프로그램을 정리하는 중...");
        }
        _ = timer => {
            info!("⏰ 타이머 만료, 프로그램 자동 종료");
        }
    }

    status_task.abort();
    registry.shutdown().await;

    info!("✅ SocketFeeder 종료 완료");
    Ok(())
}

/// 명령행 인수에서 타이머 설정을 파싱합니다.
/// 사용법: socket-feeder [timeout_seconds]
/// 예시: socket-feeder 60  (60초 후 종료)
///       socket-feeder     (무한 실행)
fn parse_timeout_arg() -> Option<u64> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() >= 2 {
        match args[1].parse::<u64>() {
            Ok(seconds) if seconds > 0 => Some(seconds),
            Ok(_) => {
                eprintln!("⚠️ 타이머는 0보다 큰 값이어야 합니다. 무한 실행 모드로 시작합니다.");
                None
            }
            Err(_) => {
                eprintln!("⚠️ 잘못된 타이머 값: '{}'. 무한 실행 모드로 시작합니다.", args[1]);
                None
            }
        }
    } else {
        None
    }
}
