//! 主应用程序入口
//!
//! 加载配置，装配基础设施与协调器，启动 Axum 服务。

use std::sync::Arc;

use anyhow::Context;
use application::{
    ChatCoordinator, ChatCoordinatorDependencies, CoordinatorSettings, LocalTransport, SystemClock,
};
use config::AppConfig;
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志，默认 info
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    let infrastructure = Infrastructure::connect(&config)
        .await
        .context("failed to initialise infrastructure")?;

    let settings = CoordinatorSettings::from(&config.chat);
    let prune_every = settings.message_window.max(settings.typing_window);
    let transport = Arc::new(LocalTransport::new());
    let coordinator = Arc::new(ChatCoordinator::new(ChatCoordinatorDependencies {
        store: infrastructure.store.clone(),
        transport: transport.clone(),
        relay: infrastructure.relay_trait(),
        clock: Arc::new(SystemClock),
        settings,
    }));
    tracing::info!(
        instance_id = %coordinator.instance_id(),
        storage = ?config.storage.driver,
        relay = infrastructure.relay.is_some(),
        "chat coordinator ready"
    );

    // 定期释放过期的限流记录
    let pruner = coordinator.spawn_rate_limit_pruner(prune_every);

    // 其他实例发布的广播投递到本进程的连接
    if let Some(subscriber) = infrastructure.relay_subscriber.clone() {
        let mut envelopes = subscriber.start();
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            while let Some(envelope) = envelopes.recv().await {
                coordinator.deliver_relayed(envelope).await;
            }
        });
    }

    let state = AppState::new(coordinator, transport, infrastructure.verifier_trait());
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("chatline 服务启动在 http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pruner.abort();
    if let Some(subscriber) = infrastructure.relay_subscriber {
        subscriber.shutdown();
    }
    tracing::info!("chatline 服务已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
