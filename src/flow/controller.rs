//! Flow 交易控制器
//!
//! 负责 create / update / delete 的完整生命周期：
//! 校验 → 提交 → 等待确认 → 刷新读取状态。
//!
//! 同一时间只允许一笔交易处于提交或等待确认状态。

use std::sync::Arc;

use alloy_primitives::B256;
use parking_lot::Mutex;
use uuid::Uuid;

use super::error::FlowError;
use super::reader::FlowStateReader;
use super::types::{FlowInfo, OperationKind, OperationState, Outcome, Settlement};
use super::rate::FlowRate;
use crate::chain::{FlowMutation, FlowSigner, Wallet};

/// 交易控制器
pub struct FlowTransactionController {
    reader: Arc<FlowStateReader>,
    state: Arc<Mutex<OperationState>>,
}

impl FlowTransactionController {
    pub fn new(reader: Arc<FlowStateReader>) -> Self {
        Self {
            reader,
            state: Arc::new(Mutex::new(OperationState::Idle)),
        }
    }

    /// 当前操作状态
    pub fn state(&self) -> OperationState {
        self.state.lock().clone()
    }

    /// 调用方已看到结果，`Settled` 回到 `Idle`
    ///
    /// 返回被确认的状态；进行中的操作不受影响
    pub fn acknowledge(&self) -> Option<OperationState> {
        let mut state = self.state.lock();
        if matches!(*state, OperationState::Settled { .. }) {
            Some(std::mem::take(&mut *state))
        } else {
            None
        }
    }

    /// 创建 flow
    pub async fn create(&self, wallet: &Wallet, rate: FlowRate) -> Result<Settlement, FlowError> {
        let signer = Self::require_signer(wallet)?;
        Self::require_positive(&rate)?;
        self.run(signer, OperationKind::Create, FlowMutation::Create(rate))
            .await
    }

    /// 更新 flow 流速（必须已知存在）
    pub async fn update(
        &self,
        wallet: &Wallet,
        rate: FlowRate,
        current: Option<&FlowInfo>,
    ) -> Result<Settlement, FlowError> {
        let signer = Self::require_signer(wallet)?;
        Self::require_positive(&rate)?;
        Self::require_flow(current)?;
        self.run(signer, OperationKind::Update, FlowMutation::Update(rate))
            .await
    }

    /// 删除 flow（必须已知存在）
    pub async fn remove(
        &self,
        wallet: &Wallet,
        current: Option<&FlowInfo>,
    ) -> Result<Settlement, FlowError> {
        let signer = Self::require_signer(wallet)?;
        Self::require_flow(current)?;
        self.run(signer, OperationKind::Delete, FlowMutation::Delete)
            .await
    }

    fn require_signer(wallet: &Wallet) -> Result<Arc<dyn FlowSigner>, FlowError> {
        wallet.signer().cloned().ok_or(FlowError::WalletNotConnected)
    }

    fn require_positive(rate: &FlowRate) -> Result<(), FlowError> {
        if rate.is_zero() {
            return Err(FlowError::InvalidRate("Please enter flow rate".to_string()));
        }
        Ok(())
    }

    fn require_flow(current: Option<&FlowInfo>) -> Result<(), FlowError> {
        match current {
            Some(_) => Ok(()),
            None => Err(FlowError::NoActiveFlow),
        }
    }

    /// 占用操作槽位：`Idle` 或 `Settled` → `Submitting`
    fn begin(&self, kind: OperationKind) -> Result<Uuid, FlowError> {
        let mut state = self.state.lock();
        if state.is_in_flight() {
            let running = state.kind().unwrap_or(kind);
            tracing::debug!("拒绝 {} 操作：{} 操作仍在进行", kind, running);
            return Err(FlowError::OperationInProgress(running));
        }

        let id = Uuid::new_v4();
        *state = OperationState::Submitting { id, kind };
        Ok(id)
    }

    /// 在独立任务中执行交易直到 `Settled`
    ///
    /// 调用方放弃等待时任务继续运行，槽位最终仍会释放
    async fn run(
        &self,
        signer: Arc<dyn FlowSigner>,
        kind: OperationKind,
        mutation: FlowMutation,
    ) -> Result<Settlement, FlowError> {
        let id = self.begin(kind)?;
        let account = signer.address();
        let lifecycle = Lifecycle {
            reader: self.reader.clone(),
            state: self.state.clone(),
            id,
            kind,
        };

        match tokio::spawn(lifecycle.run(signer, mutation)).await {
            Ok(settlement) => Ok(settlement),
            Err(e) => {
                tracing::error!("{} 交易任务异常退出: {} (op={})", kind, e, id);
                let outcome = Outcome::Failure(FlowError::Rpc(format!(
                    "operation task aborted: {}",
                    e
                )));
                *self.state.lock() = OperationState::Settled {
                    id,
                    kind,
                    outcome: outcome.clone(),
                };
                Ok(Settlement {
                    id,
                    account,
                    kind,
                    outcome,
                    refreshed: None,
                })
            }
        }
    }
}

/// 单笔交易的生命周期（提交 → 确认 → 结束 → 刷新）
struct Lifecycle {
    reader: Arc<FlowStateReader>,
    state: Arc<Mutex<OperationState>>,
    id: Uuid,
    kind: OperationKind,
}

impl Lifecycle {
    fn transition(&self, next: OperationState) {
        tracing::debug!("操作状态变更: {:?}", next);
        *self.state.lock() = next;
    }

    async fn run(self, signer: Arc<dyn FlowSigner>, mutation: FlowMutation) -> Settlement {
        let (id, kind) = (self.id, self.kind);
        let account = signer.address();
        tracing::info!("提交 {} 交易: account={}, op={}", kind, account, id);

        let outcome = match self.submit_and_confirm(signer.as_ref(), mutation).await {
            Ok(tx_hash) => {
                tracing::info!("{} 交易已确认: {} (op={})", kind, tx_hash, id);
                Outcome::Success { tx_hash }
            }
            Err(e) => {
                tracing::warn!("{} 交易失败: {} (op={})", kind, e, id);
                Outcome::Failure(e)
            }
        };

        self.transition(OperationState::Settled {
            id,
            kind,
            outcome: outcome.clone(),
        });

        // 确认成功后刷新读取状态；刷新失败不影响交易结果
        let refreshed = if outcome.is_success() {
            let result = self.reader.read_account(account).await;
            if let Err(e) = &result {
                tracing::warn!("交易确认后刷新 flow 失败: {}", e);
            }
            Some(result)
        } else {
            None
        };

        Settlement {
            id,
            account,
            kind,
            outcome,
            refreshed,
        }
    }

    async fn submit_and_confirm(
        &self,
        signer: &dyn FlowSigner,
        mutation: FlowMutation,
    ) -> Result<B256, FlowError> {
        let contract = self.reader.contract();

        let tx_hash = contract
            .submit(signer, mutation)
            .await
            .map_err(FlowError::rpc)?;

        self.transition(OperationState::AwaitingConfirmation {
            id: self.id,
            kind: self.kind,
            tx_hash,
        });

        let receipt = contract
            .wait_for_confirmation(tx_hash)
            .await
            .map_err(FlowError::rpc)?;

        Ok(receipt.tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::{MockContract, MockSigner};
    use crate::chain::RawFlowInfo;
    use crate::flow::rate::RateConverter;
    use alloy_primitives::{Address, U256};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn account() -> Address {
        Address::repeat_byte(0x0a)
    }

    fn setup() -> (Arc<MockContract>, Arc<FlowTransactionController>) {
        let contract = MockContract::new();
        let reader = Arc::new(FlowStateReader::new(
            contract.clone(),
            RateConverter::new(18).unwrap(),
        ));
        (contract, Arc::new(FlowTransactionController::new(reader)))
    }

    fn wallet() -> Wallet {
        Wallet::connected(MockSigner::new(account()))
    }

    fn rate(units: u64) -> FlowRate {
        FlowRate::from_units_per_second(U256::from(units)).unwrap()
    }

    fn known_flow() -> FlowInfo {
        FlowInfo {
            current_flow_rate: rate(1),
            total_streamed: U256::ZERO,
            created_at: 1,
            last_updated: 1,
            token_id: Some(U256::from(1u64)),
        }
    }

    async fn wait_until_awaiting(controller: &FlowTransactionController) {
        for _ in 0..100 {
            if matches!(
                controller.state(),
                OperationState::AwaitingConfirmation { .. }
            ) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("交易未进入等待确认状态");
    }

    #[tokio::test]
    async fn test_create_success_refreshes() {
        let (contract, controller) = setup();

        let settlement = controller.create(&wallet(), rate(1_000)).await.unwrap();

        assert_eq!(settlement.kind, OperationKind::Create);
        assert!(settlement.outcome.is_success());
        let snapshot = settlement.refreshed.unwrap().unwrap();
        let flow = snapshot.flow.unwrap();
        assert_eq!(flow.current_flow_rate, rate(1_000));
        assert!(contract.flow_of(account()).is_some());
        assert!(matches!(
            controller.state(),
            OperationState::Settled { kind: OperationKind::Create, .. }
        ));
    }

    #[tokio::test]
    async fn test_zero_rate_fails_fast() {
        let (contract, controller) = setup();

        let result = controller.create(&wallet(), FlowRate::ZERO).await;

        assert!(matches!(result, Err(FlowError::InvalidRate(_))));
        assert_eq!(contract.submit_calls.load(Ordering::SeqCst), 0);
        assert_eq!(controller.state(), OperationState::Idle);

        let result = controller.update(&wallet(), FlowRate::ZERO, None).await;
        assert!(matches!(result, Err(FlowError::InvalidRate(_))));
    }

    #[tokio::test]
    async fn test_disconnected_wallet_fails_fast() {
        let (contract, controller) = setup();

        let result = controller
            .create(&Wallet::disconnected(), rate(1))
            .await;

        assert_eq!(result, Err(FlowError::WalletNotConnected));
        assert_eq!(contract.submit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_remove_without_flow() {
        let (contract, controller) = setup();

        let result = controller.remove(&wallet(), None).await;

        assert_eq!(result, Err(FlowError::NoActiveFlow));
        assert_eq!(contract.submit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_update_without_flow() {
        let (contract, controller) = setup();

        let result = controller.update(&wallet(), rate(9), None).await;

        assert_eq!(result, Err(FlowError::NoActiveFlow));
        assert_eq!(contract.submit_calls.load(Ordering::SeqCst), 0);
        assert_eq!(controller.state(), OperationState::Idle);
    }

    #[tokio::test]
    async fn test_remove_then_flow_absent() {
        let (contract, controller) = setup();
        contract.set_flow(
            account(),
            RawFlowInfo {
                current_flow_rate: 10,
                total_streamed: U256::ZERO,
                created_at: U256::from(1u64),
                last_updated: U256::from(1u64),
                token_id: U256::from(1u64),
            },
        );
        let current = controller
            .reader
            .read_account(account())
            .await
            .unwrap()
            .flow;

        let settlement = controller
            .remove(&wallet(), current.as_ref())
            .await
            .unwrap();

        assert!(settlement.outcome.is_success());
        assert!(settlement.refreshed.unwrap().unwrap().flow.is_none());
    }

    #[tokio::test]
    async fn test_submit_failure_settles_as_failure() {
        let (contract, controller) = setup();
        contract.set_fail_submit(true);

        let settlement = controller.create(&wallet(), rate(5)).await.unwrap();

        assert!(matches!(
            settlement.outcome,
            Outcome::Failure(FlowError::Rpc(ref msg)) if msg.contains("user rejected")
        ));
        assert!(settlement.refreshed.is_none());
        assert!(matches!(
            controller.state(),
            OperationState::Settled { outcome: Outcome::Failure(_), .. }
        ));
        // 不自动重试
        assert_eq!(contract.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reverted_confirmation_settles_as_failure() {
        let (contract, controller) = setup();
        contract.set_revert_confirmations(true);

        let settlement = controller.create(&wallet(), rate(5)).await.unwrap();

        assert!(!settlement.outcome.is_success());
        assert!(contract.flow_of(account()).is_none());
    }

    #[tokio::test]
    async fn test_operation_in_progress() {
        let (contract, controller) = setup();
        let gate = contract.gate_confirmations();

        let running = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.create(&wallet(), rate(7)).await })
        };
        wait_until_awaiting(&controller).await;
        let in_flight = controller.state();

        let second = controller
            .update(&wallet(), rate(8), Some(&known_flow()))
            .await;
        assert_eq!(
            second,
            Err(FlowError::OperationInProgress(OperationKind::Create))
        );
        let third = controller.remove(&wallet(), None).await;
        // 前置条件先于并发检查
        assert_eq!(third, Err(FlowError::NoActiveFlow));
        assert_eq!(controller.state(), in_flight);

        gate.add_permits(1);
        let settlement = running.await.unwrap().unwrap();
        assert!(settlement.outcome.is_success());
        assert_eq!(contract.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_acknowledge_returns_to_idle() {
        let (_contract, controller) = setup();

        assert!(controller.acknowledge().is_none());
        controller.create(&wallet(), rate(3)).await.unwrap();

        let settled = controller.acknowledge().unwrap();
        assert!(matches!(settled, OperationState::Settled { .. }));
        assert_eq!(controller.state(), OperationState::Idle);
    }

    #[tokio::test]
    async fn test_new_operation_after_settled() {
        let (_contract, controller) = setup();

        let created = controller.create(&wallet(), rate(3)).await.unwrap();
        let current = created.refreshed.unwrap().unwrap().flow;
        let settlement = controller
            .update(&wallet(), rate(4), current.as_ref())
            .await
            .unwrap();

        assert_eq!(settlement.kind, OperationKind::Update);
        assert!(settlement.outcome.is_success());
    }

    #[tokio::test]
    async fn test_abandoned_caller_still_settles() {
        let (contract, controller) = setup();
        let gate = contract.gate_confirmations();

        let caller = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.create(&wallet(), rate(6)).await })
        };
        wait_until_awaiting(&controller).await;

        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());
        assert!(controller.state().is_in_flight());

        gate.add_permits(1);
        for _ in 0..100 {
            if matches!(controller.state(), OperationState::Settled { .. }) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // 交易在后台完成，槽位可以再次使用
        assert!(matches!(
            controller.acknowledge(),
            Some(OperationState::Settled { outcome: Outcome::Success { .. }, .. })
        ));
        assert!(contract.flow_of(account()).is_some());
        let next = controller.create(&wallet(), rate(7)).await.unwrap();
        assert!(next.outcome.is_success());
    }
}
