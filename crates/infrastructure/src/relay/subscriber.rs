//! Redis 广播订阅者
//!
//! 后台任务订阅广播频道，把解码后的信封写入通道；连接断开后按指数退避重连。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use application::RelayEnvelope;
use futures_util::stream::StreamExt;
use redis::Client;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::{events_channel, RelayError, RelayResult};
use crate::retry::Backoff;

pub struct RedisRelaySubscriber {
    client: Client,
    channel: String,
    backoff: Backoff,
    shutdown_signal: Arc<AtomicBool>,
}

impl RedisRelaySubscriber {
    pub fn new(url: &str, channel_prefix: &str) -> RelayResult<Self> {
        let client = Client::open(url).map_err(|e| RelayError::Connection {
            message: format!("invalid redis url: {e}"),
        })?;
        Ok(Self {
            client,
            channel: events_channel(channel_prefix),
            backoff: Backoff::exponential(Duration::from_millis(200))
                .capped(Duration::from_secs(10)),
            shutdown_signal: Arc::new(AtomicBool::new(false)),
        })
    }

    /// 启动后台监听，返回接收信封的通道；接收端被丢弃后监听随之结束
    pub fn start(&self) -> mpsc::UnboundedReceiver<RelayEnvelope> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let channel = self.channel.clone();
        let backoff = self.backoff.clone();
        let shutdown_signal = Arc::clone(&self.shutdown_signal);

        tokio::spawn(async move {
            Self::listen_loop(client, channel, backoff, shutdown_signal, sender).await;
        });
        receiver
    }

    pub fn shutdown(&self) {
        self.shutdown_signal.store(true, Ordering::Relaxed);
    }

    async fn listen_loop(
        client: Client,
        channel: String,
        backoff: Backoff,
        shutdown_signal: Arc<AtomicBool>,
        sender: mpsc::UnboundedSender<RelayEnvelope>,
    ) {
        let mut attempt = 0u32;
        while !shutdown_signal.load(Ordering::Relaxed) && !sender.is_closed() {
            match Self::listen_once(&client, &channel, &shutdown_signal, &sender, &mut attempt).await
            {
                Ok(()) => break,
                Err(e) => {
                    attempt += 1;
                    let delay = backoff.delay_at(attempt);
                    error!(
                        channel = %channel,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "redis relay subscription lost, reconnecting"
                    );
                    sleep(delay).await;
                }
            }
        }
        info!(channel = %channel, "redis relay subscriber stopped");
    }

    async fn listen_once(
        client: &Client,
        channel: &str,
        shutdown_signal: &AtomicBool,
        sender: &mpsc::UnboundedSender<RelayEnvelope>,
        attempt: &mut u32,
    ) -> RelayResult<()> {
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| RelayError::Subscribe {
                message: format!("subscribe {channel}: {e}"),
            })?;
        info!(channel = %channel, "redis relay subscribed");
        *attempt = 0;

        let mut messages = std::pin::pin!(pubsub.on_message());
        loop {
            if shutdown_signal.load(Ordering::Relaxed) {
                return Ok(());
            }
            // 超时只用于定期检查关闭信号
            let next = tokio::time::timeout(Duration::from_secs(1), messages.next()).await;
            let msg = match next {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    return Err(RelayError::Subscribe {
                        message: "message stream ended".to_string(),
                    })
                }
                Err(_) => continue,
            };

            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "unreadable relay payload");
                    continue;
                }
            };
            if let Some(envelope) = decode_envelope(&payload) {
                if sender.send(envelope).is_err() {
                    debug!("relay receiver dropped");
                    return Ok(());
                }
            }
        }
    }
}

/// 解码失败的信封只记录日志并丢弃
pub fn decode_envelope(payload: &str) -> Option<RelayEnvelope> {
    match serde_json::from_str(payload) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            warn!(error = %e, "malformed relay envelope dropped");
            None
        }
    }
}
