use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ProviderConfig, ProviderKind};
use crate::db::{DbManager, QueuedNotification};
use crate::error::{HeronError, Result};

/// 通知投递回调
pub type SenderFn = Arc<
    dyn Fn(ProviderConfig, String) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>
        + Send
        + Sync,
>;

/// 按提供方节流的通知队列
///
/// 每个提供方独立维护一个节流状态机：idle → armed → flushing → idle。
/// 距离上次发送超过间隔时立即发送；否则消息进入持久化待发列表，
/// 并（在未布防时）布防一个在间隔边界触发的冲刷定时器。冲刷把全部
/// 待发消息合并成一条批量通知，发送成功后原子地清空列表并更新
/// last_sent；发送失败保持列表不动，等下一次冲刷。
pub struct NotificationQueue {
    db: DbManager,
    providers: Vec<ProviderConfig>,
    sender: SenderFn,
    /// 串行化各提供方的读改写决策
    gate: Mutex<()>,
    /// 每个提供方已布防的冲刷定时器
    timers: std::sync::Mutex<HashMap<String, JoinHandle<()>>>,
}

impl NotificationQueue {
    pub fn new(db: DbManager, providers: Vec<ProviderConfig>) -> Arc<Self> {
        let client = reqwest::Client::new();
        Self::with_sender(db, providers, http_sender(client))
    }

    /// 注入自定义投递回调（测试使用）
    pub fn with_sender(
        db: DbManager,
        providers: Vec<ProviderConfig>,
        sender: SenderFn,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            providers,
            sender,
            gate: Mutex::new(()),
            timers: std::sync::Mutex::new(HashMap::new()),
        })
    }

    fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// 提交一条通知消息
    pub async fn submit(self: &Arc<Self>, message: QueuedNotification, provider_name: &str) -> Result<()> {
        let Some(provider) = self.provider(provider_name).cloned() else {
            warn!("未配置的通知提供方: {}，消息丢弃", provider_name);
            return Ok(());
        };

        let _guard = self.gate.lock().await;
        let now = Utc::now();
        let state = self.db.ensure_queue_state(provider_name, now).await?;
        let interval_secs = provider.batch_interval_secs() as i64;
        let elapsed_secs = (now - state.last_sent).num_seconds();

        if elapsed_secs > interval_secs && state.pending.is_empty() {
            // 间隔已过且无积压，立即发送并重置时钟
            match (self.sender)(provider.clone(), message.body.clone()).await {
                Ok(()) => {
                    info!("通知已发送: provider={}", provider_name);
                    return self.db.mark_sent(provider_name, now).await;
                }
                Err(e) => {
                    warn!("通知发送失败，转入待发列表: provider={} ({})", provider_name, e);
                    self.db.append_pending(provider_name, message).await?;
                    self.arm_timer(provider_name, Duration::from_secs(interval_secs as u64));
                    return Ok(());
                }
            }
        }

        // 间隔内，进入待发列表并确保定时器已布防
        self.db.append_pending(provider_name, message).await?;
        let delay_secs = (interval_secs - elapsed_secs).max(0) as u64;
        self.arm_timer(provider_name, Duration::from_secs(delay_secs));
        Ok(())
    }

    /// 布防冲刷定时器（已布防时不重复）
    fn arm_timer(self: &Arc<Self>, provider_name: &str, delay: Duration) {
        let Ok(mut timers) = self.timers.lock() else {
            return;
        };

        if let Some(handle) = timers.get(provider_name) {
            if !handle.is_finished() {
                debug!("冲刷定时器已布防: provider={}", provider_name);
                return;
            }
        }

        let handle = self.spawn_flush(provider_name, delay);
        timers.insert(provider_name.to_string(), handle);
    }

    /// 重新布防（冲刷失败时从定时器任务内部调用，直接替换旧句柄）
    fn rearm_timer(self: &Arc<Self>, provider_name: &str, delay: Duration) {
        let Ok(mut timers) = self.timers.lock() else {
            return;
        };
        let handle = self.spawn_flush(provider_name, delay);
        timers.insert(provider_name.to_string(), handle);
    }

    fn spawn_flush(self: &Arc<Self>, provider_name: &str, delay: Duration) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        let name = provider_name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = queue.flush(&name).await {
                warn!("冲刷通知队列失败: provider={} ({})", name, e);
            }
        })
    }

    /// 冲刷一个提供方的待发列表
    ///
    /// 全部待发消息合并成一条批量通知（按类别/任务分组）。发送成功后
    /// 清空列表并更新 last_sent（单条 Actor 消息内原子完成）；发送失败
    /// 保持列表不动并重新布防。
    pub async fn flush(self: &Arc<Self>, provider_name: &str) -> Result<()> {
        let Some(provider) = self.provider(provider_name).cloned() else {
            return Ok(());
        };

        let _guard = self.gate.lock().await;
        let now = Utc::now();
        let state = self.db.ensure_queue_state(provider_name, now).await?;
        if state.pending.is_empty() {
            return Ok(());
        }

        let body = batch_body(&state.pending);
        match (self.sender)(provider.clone(), body).await {
            Ok(()) => {
                info!(
                    "批量通知已发送: provider={} 合并 {} 条",
                    provider_name,
                    state.pending.len()
                );
                self.db.flush_queue(provider_name, now).await
            }
            Err(e) => {
                warn!("批量通知发送失败，保留待发列表: provider={} ({})", provider_name, e);
                self.rearm_timer(
                    provider_name,
                    Duration::from_secs(provider.batch_interval_secs()),
                );
                Ok(())
            }
        }
    }
}

/// 把待发消息合并成一条批量通知正文，按类别分组
fn batch_body(pending: &[QueuedNotification]) -> String {
    let mut grouped: BTreeMap<&str, Vec<&QueuedNotification>> = BTreeMap::new();
    for message in pending {
        grouped.entry(message.kind.as_str()).or_default().push(message);
    }

    let mut body = String::new();
    for (kind, messages) in grouped {
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str(&format!("{}（{} 条）\n", kind_label(kind), messages.len()));
        for message in messages {
            body.push_str(&format!("- {}\n", message.body));
        }
    }
    body
}

fn kind_label(kind: &str) -> &str {
    match kind {
        "success" => "备份成功",
        "failure" => "备份失败",
        "maintenance_failure" => "维护失败",
        "delay" => "冲突等待",
        other => other,
    }
}

/// 默认的 HTTP 投递回调
fn http_sender(client: reqwest::Client) -> SenderFn {
    Arc::new(move |provider: ProviderConfig, body: String| {
        let client = client.clone();
        Box::pin(async move {
            match &provider.kind {
                ProviderKind::Webhook { url } => {
                    let response = client
                        .post(url)
                        .json(&serde_json::json!({ "text": body }))
                        .send()
                        .await?;
                    if !response.status().is_success() {
                        return Err(HeronError::notify(format!(
                            "Webhook 返回 {}",
                            response.status()
                        )));
                    }
                }
                ProviderKind::Gotify { url, token } => {
                    let endpoint = format!("{}/message", url.trim_end_matches('/'));
                    let response = client
                        .post(&endpoint)
                        .header("X-Gotify-Key", token)
                        .json(&serde_json::json!({
                            "title": "Heron 备份",
                            "message": body,
                            "priority": 5,
                        }))
                        .send()
                        .await?;
                    if !response.status().is_success() {
                        return Err(HeronError::notify(format!(
                            "Gotify 返回 {}",
                            response.status()
                        )));
                    }
                }
            }
            Ok(())
        })
    })
}
