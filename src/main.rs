pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod provider;
pub mod storage;
pub mod task;
pub mod token_pool;
pub mod util;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::Config::load();

    init_tracing(&cfg);

    let store = storage::build(&cfg).await.context("初始化存储后端失败")?;

    let client =
        provider::common::UpstreamClient::new(&cfg).context("初始化上游 HTTP 客户端失败")?;
    let registry = gateway::build_registry(&client);
    let pool = gateway::build_pool(&cfg, &registry, store.clone());
    let tasks = task::TaskStore::new(store, cfg.task_result_ttl_secs);

    if cfg.api_tokens.is_empty() {
        tracing::warn!("未配置 API_TOKEN，/api/v1 接口不做鉴权");
    }

    let state = Arc::new(gateway::AppState {
        cfg: cfg.clone(),
        gateway: gateway::Gateway::new(Arc::new(registry), Arc::new(pool), tasks),
    });
    let app = gateway::router(state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], cfg.port)));

    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("绑定监听端口失败")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("服务异常退出")?;

    Ok(())
}

fn init_tracing(cfg: &config::Config) {
    // 依赖库日志默认压到 warn，本项目自身至少保留 info；DEBUG=off 时完全静默。
    let debug = cfg.debug.trim().to_lowercase();
    let filter = if debug == "off" {
        EnvFilter::new("off")
    } else {
        let env = std::env::var("RUST_LOG").unwrap_or_default();
        let env = env.trim();
        if env.is_empty() {
            EnvFilter::new("warn,imagine=info")
        } else if env.contains("imagine") {
            EnvFilter::new(env)
        } else {
            EnvFilter::new(format!("{env},imagine=info"))
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .try_init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("收到退出信号，准备关闭服务...");
}
