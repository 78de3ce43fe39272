//! Flow 会话（对外门面）
//!
//! 持有最新的 flow 状态、NFT 元数据和交易操作状态，
//! 对外提供刷新、提交交易、切换钱包和只读访问。
//!
//! 所有读取结果按发起时分配的序号应用：序号不大于已应用序号的结果直接丢弃，
//! 因此慢的旧读取不会覆盖新的状态，切换账户前发起的读取也不会串到新账户上。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use alloy_primitives::{Address, B256};
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::controller::FlowTransactionController;
use super::error::FlowError;
use super::metadata::TokenMetadata;
use super::rate::{FlowRate, RateConverter, parse_display_rate};
use super::reader::FlowStateReader;
use super::summary::FlowSummary;
use super::types::{
    FlowInfo, FlowSnapshot, OperationKind, OperationState, Outcome, Settlement,
    TransactionRequest,
};
use crate::chain::{FlowContract, Wallet};
use crate::webhook::SettlementNotifier;

/// 事件通道容量
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// 已结束操作的通知内容
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettledOperation {
    pub id: Uuid,
    pub account: Address,
    pub kind: OperationKind,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Settlement> for SettledOperation {
    fn from(settlement: &Settlement) -> Self {
        let (tx_hash, error) = match &settlement.outcome {
            Outcome::Success { tx_hash } => (Some(*tx_hash), None),
            Outcome::Failure(e) => (None, Some(e.to_string())),
        };
        Self {
            id: settlement.id,
            account: settlement.account,
            kind: settlement.kind,
            success: settlement.outcome.is_success(),
            tx_hash,
            error,
        }
    }
}

/// 会话事件（供展示层订阅）
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// 钱包/账户已切换，旧状态已清空
    WalletChanged { account: Option<Address> },
    /// 新的读取结果已应用
    StateRefreshed {
        account: Address,
        sequence: u64,
        has_flow: bool,
    },
    /// 读取失败，保留之前的状态
    RefreshFailed { error: FlowError },
    /// 交易已结束
    OperationSettled(SettledOperation),
}

/// 会话内部状态（整体替换，不做字段级合并）
#[derive(Debug, Default)]
struct SessionState {
    wallet: Wallet,
    flow: Option<FlowInfo>,
    display_rate: Option<Decimal>,
    metadata: Option<TokenMetadata>,
    last_applied: u64,
}

/// Flow 会话
pub struct FlowSession {
    reader: Arc<FlowStateReader>,
    controller: FlowTransactionController,
    state: Mutex<SessionState>,
    refreshing: AtomicUsize,
    events: broadcast::Sender<SessionEvent>,
    notifier: Option<Arc<SettlementNotifier>>,
}

impl FlowSession {
    /// 创建绑定到钱包的会话（不会自动刷新）
    pub fn new(contract: Arc<dyn FlowContract>, converter: RateConverter, wallet: Wallet) -> Self {
        let reader = Arc::new(FlowStateReader::new(contract, converter));
        let controller = FlowTransactionController::new(reader.clone());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            reader,
            controller,
            state: Mutex::new(SessionState {
                wallet,
                ..Default::default()
            }),
            refreshing: AtomicUsize::new(0),
            events,
            notifier: None,
        }
    }

    /// 设置交易结束通知器
    pub fn with_notifier(mut self, notifier: Arc<SettlementNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// 订阅会话事件
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // ============ 只读访问 ============

    pub fn wallet(&self) -> Wallet {
        self.state.lock().wallet.clone()
    }

    pub fn account(&self) -> Option<Address> {
        self.state.lock().wallet.account()
    }

    pub fn flow(&self) -> Option<FlowInfo> {
        self.state.lock().flow.clone()
    }

    pub fn metadata(&self) -> Option<TokenMetadata> {
        self.state.lock().metadata.clone()
    }

    /// 当前流速展示值（token/月）
    pub fn display_rate(&self) -> Option<Decimal> {
        self.state.lock().display_rate
    }

    /// 是否存在进行中的 flow（决定 create 还是 update）
    pub fn has_active_flow(&self) -> bool {
        self.state.lock().flow.is_some()
    }

    pub fn operation_state(&self) -> OperationState {
        self.controller.state()
    }

    /// 是否有刷新正在进行
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst) > 0
    }

    pub fn converter(&self) -> &RateConverter {
        self.reader.converter()
    }

    /// 展示层使用的汇总视图（没有 flow 时为 None）
    pub fn summary(&self) -> Option<FlowSummary> {
        let state = self.state.lock();
        let account = state.wallet.account()?;
        let flow = state.flow.as_ref()?;
        Some(FlowSummary::build(
            account,
            self.reader.contract().address(),
            flow,
            state.display_rate,
            state.metadata.clone(),
            self.reader.converter(),
            Utc::now(),
        ))
    }

    /// 将用户输入的月流速转换为合约流速
    pub fn rate_from_input(&self, input: &str) -> Result<FlowRate, FlowError> {
        let display = parse_display_rate(input)?;
        self.reader.converter().to_contract_rate(display)
    }

    // ============ 读取 ============

    /// 重新读取当前账户的 flow
    ///
    /// 返回刷新后会话持有的 flow；结果过期被丢弃时返回当前状态
    pub async fn refresh(&self) -> Result<Option<FlowInfo>, FlowError> {
        let wallet = self.wallet();

        let result = {
            let _refreshing = RefreshingGuard::enter(&self.refreshing);
            self.reader.read_flow(&wallet).await
        };

        match result {
            Ok(snapshot) => {
                self.apply_snapshot(snapshot);
                Ok(self.flow())
            }
            Err(e) => {
                tracing::warn!("刷新 flow 信息失败: {}", e);
                self.emit(SessionEvent::RefreshFailed { error: e.clone() });
                Err(e)
            }
        }
    }

    /// 应用一次读取结果，返回是否被采用
    pub(crate) fn apply_snapshot(&self, snapshot: FlowSnapshot) -> bool {
        let mut state = self.state.lock();

        if snapshot.sequence <= state.last_applied {
            tracing::debug!(
                "丢弃过期的读取结果: seq={}, last_applied={}",
                snapshot.sequence,
                state.last_applied
            );
            return false;
        }
        if state.wallet.account() != Some(snapshot.account) {
            tracing::debug!("丢弃其他账户的读取结果: {}", snapshot.account);
            return false;
        }

        let (account, sequence) = (snapshot.account, snapshot.sequence);
        let has_flow = snapshot.flow.is_some();

        state.last_applied = sequence;
        state.flow = snapshot.flow;
        state.display_rate = snapshot.display_rate;
        state.metadata = snapshot.metadata;
        drop(state);

        tracing::info!("flow 状态已刷新 (seq={}, has_flow={})", sequence, has_flow);
        self.emit(SessionEvent::StateRefreshed {
            account,
            sequence,
            has_flow,
        });
        true
    }

    /// 切换钱包（账户变化）
    ///
    /// 清空全部会话状态，屏蔽之前发起的读取，然后重新读取
    pub async fn switch_wallet(&self, wallet: Wallet) -> Result<Option<FlowInfo>, FlowError> {
        let account = wallet.account();
        {
            let mut state = self.state.lock();
            let fence = self.reader.reserve_sequence();
            *state = SessionState {
                wallet,
                last_applied: fence,
                ..Default::default()
            };
        }
        // 已结束的操作属于旧账户；进行中的交易继续运行直到结束
        self.controller.acknowledge();

        tracing::info!("钱包已切换: {:?}", account);
        self.emit(SessionEvent::WalletChanged { account });

        if account.is_some() {
            self.refresh().await
        } else {
            Ok(None)
        }
    }

    // ============ 交易 ============

    /// 提交交易请求
    ///
    /// Create/Update 按当前是否存在 flow 路由到 create 或 update
    pub async fn submit(&self, request: TransactionRequest) -> Result<Settlement, FlowError> {
        match request {
            TransactionRequest::Create(rate) | TransactionRequest::Update(rate) => {
                if self.has_active_flow() {
                    self.update(rate).await
                } else {
                    self.create(rate).await
                }
            }
            TransactionRequest::Delete => self.remove().await,
        }
    }

    pub async fn create(&self, rate: FlowRate) -> Result<Settlement, FlowError> {
        let wallet = self.wallet();
        let result = self.controller.create(&wallet, rate).await;
        self.finish(result)
    }

    pub async fn update(&self, rate: FlowRate) -> Result<Settlement, FlowError> {
        let (wallet, current) = self.wallet_and_flow();
        let result = self
            .controller
            .update(&wallet, rate, current.as_ref())
            .await;
        self.finish(result)
    }

    pub async fn remove(&self) -> Result<Settlement, FlowError> {
        let (wallet, current) = self.wallet_and_flow();
        let result = self.controller.remove(&wallet, current.as_ref()).await;
        self.finish(result)
    }

    /// 确认已看到交易结果，操作状态回到 `Idle`
    pub fn acknowledge(&self) -> Option<OperationState> {
        self.controller.acknowledge()
    }

    fn finish(&self, result: Result<Settlement, FlowError>) -> Result<Settlement, FlowError> {
        let settlement = result?;

        match &settlement.refreshed {
            Some(Ok(snapshot)) => {
                self.apply_snapshot(snapshot.clone());
            }
            Some(Err(e)) => self.emit(SessionEvent::RefreshFailed { error: e.clone() }),
            None => {}
        }

        let settled = SettledOperation::from(&settlement);
        if let Some(notifier) = &self.notifier {
            notifier.notify(settled.clone());
        }
        self.emit(SessionEvent::OperationSettled(settled));

        Ok(settlement)
    }

    fn wallet_and_flow(&self) -> (Wallet, Option<FlowInfo>) {
        let state = self.state.lock();
        (state.wallet.clone(), state.flow.clone())
    }

    fn emit(&self, event: SessionEvent) {
        // 没有订阅者时发送失败，忽略
        let _ = self.events.send(event);
    }
}

/// 进行中的刷新计数，future 被丢弃时同样递减
struct RefreshingGuard<'a>(&'a AtomicUsize);

impl<'a> RefreshingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for RefreshingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
