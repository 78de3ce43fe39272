//! Webhook 通知模块
//!
//! 交易结束（成功或失败）时，通过 HTTP POST 发送 JSON 通知到配置的 webhook URL。
//! 支持自定义 JSON 模板，通过变量占位符渲染最终 payload。

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::flow::{OperationKind, SettledOperation};
use crate::http_client::build_client;
use crate::model::config::TlsBackend;

/// webhook 请求超时（秒）
const WEBHOOK_TIMEOUT_SECS: u64 = 10;

/// 内置默认 payload（JSON 序列化后 POST 到 webhook URL）
#[derive(Debug, Clone, Serialize)]
pub struct DefaultPayload<'a> {
    pub event: &'static str,
    pub operation_id: String,
    pub account: String,
    pub operation: &'static str,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'a str>,
    pub timestamp: String,
}

/// 发送上下文（传入 consume_loop）
struct SendContext {
    url: String,
    /// 用户自定义 JSON 模板（None 时使用内置默认格式）
    template: Option<String>,
    client: reqwest::Client,
}

/// 交易结束通知器
///
/// 通过 mpsc channel 异步发送，可从同步代码安全调用。
/// 进程退出前调用 [`SettlementNotifier::shutdown`]，否则队列中的通知会随运行时一起丢失。
pub struct SettlementNotifier {
    sender: Mutex<Option<mpsc::Sender<SettledOperation>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// 可用的模板变量
pub const TEMPLATE_VARIABLES: &[(&str, &str)] = &[
    ("{{operation_id}}", "操作 ID"),
    ("{{account}}", "钱包账户"),
    ("{{operation}}", "操作类型（create/update/delete）"),
    ("{{status}}", "结果（success/failure）"),
    ("{{tx_hash}}", "交易哈希（失败时为空）"),
    ("{{error}}", "错误信息（成功时为空）"),
    ("{{timestamp}}", "事件时间（RFC3339）"),
];

impl SettlementNotifier {
    /// 创建新的 SettlementNotifier，启动后台消费任务
    pub fn new(
        url: String,
        template: Option<String>,
        proxy_url: Option<&str>,
        tls_backend: TlsBackend,
    ) -> anyhow::Result<Self> {
        let client = build_client(proxy_url, WEBHOOK_TIMEOUT_SECS, tls_backend)?;
        let (tx, rx) = mpsc::channel(64);
        let ctx = SendContext {
            url,
            template,
            client,
        };
        let worker = tokio::spawn(Self::consume_loop(ctx, rx));
        Ok(Self {
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// 发送交易结束通知（非阻塞，可从同步代码调用）
    pub fn notify(&self, operation: SettledOperation) {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            tracing::warn!("Webhook 通知器已关闭，丢弃通知 (op={})", operation.id);
            return;
        };
        if let Err(e) = sender.try_send(operation) {
            tracing::warn!("Webhook 通知发送失败（channel 已满或已关闭）: {}", e);
        }
    }

    /// 停止接收新通知，等待队列中的通知全部发送完毕
    pub async fn shutdown(&self) {
        // 关闭发送端后消费循环在队列清空时退出
        drop(self.sender.lock().take());

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::warn!("Webhook 消费任务异常退出: {}", e);
            }
        }
    }

    /// 后台消费循环
    async fn consume_loop(ctx: SendContext, mut rx: mpsc::Receiver<SettledOperation>) {
        while let Some(operation) = rx.recv().await {
            let body = Self::render_body(&ctx.template, &operation);
            let request = ctx
                .client
                .post(&ctx.url)
                .header("Content-Type", "application/json")
                .body(body);

            match request.send().await {
                Ok(resp) => {
                    if !resp.status().is_success() {
                        tracing::warn!(
                            "Webhook 发送失败: HTTP {} (op={})",
                            resp.status(),
                            operation.id
                        );
                    } else {
                        tracing::info!(
                            "Webhook 通知已发送: {} 操作 {} (op={})",
                            operation.kind,
                            status_of(&operation),
                            operation.id
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!("Webhook 发送失败: {} (op={})", e, operation.id);
                }
            }
        }
        tracing::debug!("Webhook 通知消费循环已退出");
    }

    /// 发送测试 webhook（用于验证 URL 和模板配置）
    ///
    /// 构造一个模拟的成功操作，渲染模板后 POST 到指定 URL，同步等待响应。
    pub async fn send_test(
        url: &str,
        template: Option<String>,
        proxy_url: Option<&str>,
        tls_backend: TlsBackend,
    ) -> anyhow::Result<()> {
        let client = build_client(proxy_url, WEBHOOK_TIMEOUT_SECS, tls_backend)?;

        let operation = SettledOperation {
            id: Uuid::nil(),
            account: Default::default(),
            kind: OperationKind::Create,
            success: true,
            tx_hash: Some(Default::default()),
            error: None,
        };

        let body = Self::render_body(&template, &operation);

        let resp = client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("请求发送失败: {}", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let resp_body = resp.text().await.unwrap_or_default();
            anyhow::bail!("HTTP {}: {}", status, resp_body);
        }

        Ok(())
    }

    /// 渲染 webhook body
    ///
    /// 有自定义模板时做变量替换，否则使用内置默认 JSON
    fn render_body(template: &Option<String>, operation: &SettledOperation) -> String {
        let timestamp = chrono::Utc::now().to_rfc3339();
        let tx_hash = operation.tx_hash.map(|h| h.to_string());
        let status = status_of(operation);

        match template {
            Some(tpl) if !tpl.trim().is_empty() => tpl
                .replace("{{operation_id}}", &operation.id.to_string())
                .replace("{{account}}", &operation.account.to_string())
                .replace("{{operation}}", operation.kind.as_str())
                .replace("{{status}}", status)
                .replace("{{tx_hash}}", tx_hash.as_deref().unwrap_or(""))
                .replace("{{error}}", &json_escape(operation.error.as_deref().unwrap_or("")))
                .replace("{{timestamp}}", &timestamp),
            _ => {
                // 内置默认格式
                let payload = DefaultPayload {
                    event: "flow_operation_settled",
                    operation_id: operation.id.to_string(),
                    account: operation.account.to_string(),
                    operation: operation.kind.as_str(),
                    status,
                    tx_hash,
                    error: operation.error.as_deref(),
                    timestamp,
                };
                serde_json::to_string(&payload).unwrap_or_default()
            }
        }
    }
}

fn status_of(operation: &SettledOperation) -> &'static str {
    if operation.success { "success" } else { "failure" }
}

/// 转义为 JSON 字符串内容（不含外层引号）
fn json_escape(value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256};

    fn settled(success: bool) -> SettledOperation {
        SettledOperation {
            id: Uuid::nil(),
            account: Address::repeat_byte(0x11),
            kind: OperationKind::Update,
            success,
            tx_hash: success.then(|| B256::repeat_byte(0x22)),
            error: (!success).then(|| "execution \"reverted\"".to_string()),
        }
    }

    #[test]
    fn test_default_payload() {
        let body = SettlementNotifier::render_body(&None, &settled(true));
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(json["event"], "flow_operation_settled");
        assert_eq!(json["operation"], "update");
        assert_eq!(json["status"], "success");
        assert_eq!(json["tx_hash"], B256::repeat_byte(0x22).to_string());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_template_rendering() {
        let template = Some(
            r#"{"text":"{{operation}} {{status}} for {{account}}","err":"{{error}}","tx":"{{tx_hash}}"}"#
                .to_string(),
        );

        let body = SettlementNotifier::render_body(&template, &settled(false));
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(
            json["text"],
            format!("update failure for {}", Address::repeat_byte(0x11))
        );
        assert_eq!(json["err"], "execution \"reverted\"");
        assert_eq!(json["tx"], "");
    }

    #[test]
    fn test_blank_template_falls_back_to_default() {
        let body = SettlementNotifier::render_body(&Some("  ".to_string()), &settled(false));
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(json["status"], "failure");
        assert_eq!(json["error"], "execution \"reverted\"");
    }

    #[test]
    fn test_template_variables_documented() {
        for (name, _) in TEMPLATE_VARIABLES {
            assert!(name.starts_with("{{") && name.ends_with("}}"));
        }
        assert_eq!(TEMPLATE_VARIABLES.len(), 7);
    }

    /// 本地 HTTP 接收端：读取一个请求体后返回 200
    async fn serve_once() -> (String, tokio::sync::oneshot::Receiver<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let (tx, rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf);
                if n == 0 || text.contains("flow_operation_settled\"") && text.ends_with('}') {
                    break;
                }
            }
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
        });

        (url, rx)
    }

    #[tokio::test]
    async fn test_shutdown_delivers_queued_notification() {
        let (url, received) = serve_once().await;
        let notifier = SettlementNotifier::new(url, None, None, TlsBackend::Rustls).unwrap();

        notifier.notify(settled(true));
        notifier.shutdown().await;

        let request = received.await.unwrap();
        assert!(request.starts_with("POST /hook"));
        assert!(request.contains("\"status\":\"success\""));
    }

    #[tokio::test]
    async fn test_notify_after_shutdown_is_dropped() {
        let (url, _received) = serve_once().await;
        let notifier = SettlementNotifier::new(url, None, None, TlsBackend::Rustls).unwrap();

        notifier.shutdown().await;
        notifier.notify(settled(false));
        // 再次关闭是空操作
        notifier.shutdown().await;
    }
}
