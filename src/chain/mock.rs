//! 测试用的内存合约和签名者

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use alloy_primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use super::{FlowContract, FlowMutation, FlowSigner, RawFlowInfo, TxReceipt};

/// 模拟签名者
pub struct MockSigner {
    address: Address,
}

impl MockSigner {
    pub fn new(address: Address) -> Arc<Self> {
        Arc::new(Self { address })
    }
}

#[async_trait]
impl FlowSigner for MockSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn send_transaction(&self, _to: Address, _data: Bytes) -> anyhow::Result<B256> {
        Ok(B256::repeat_byte(0x42))
    }
}

#[derive(Default)]
struct MockState {
    flows: HashMap<Address, RawFlowInfo>,
    token_uris: HashMap<U256, String>,
    pending: HashMap<B256, (Address, FlowMutation)>,
    read_gates: HashMap<Address, Arc<Semaphore>>,
    confirmation_gate: Option<Arc<Semaphore>>,
    fail_reads: bool,
    fail_submit: bool,
    revert_confirmations: bool,
    next_token_id: u64,
    clock: u64,
    tx_counter: u64,
}

/// 内存中的 FlowCraft 合约
///
/// 交易在确认时才生效；可以挂起读取或确认来构造并发场景
#[derive(Default)]
pub struct MockContract {
    state: Mutex<MockState>,
    pub flow_info_calls: AtomicUsize,
    pub token_uri_calls: AtomicUsize,
    pub submit_calls: AtomicUsize,
}

impl MockContract {
    pub fn new() -> Arc<Self> {
        let contract = Self::default();
        {
            let mut state = contract.state.lock();
            state.clock = 1_700_000_000;
            state.next_token_id = 1;
        }
        Arc::new(contract)
    }

    /// 直接写入一条链上 flow
    pub fn set_flow(&self, account: Address, raw: RawFlowInfo) {
        self.state.lock().flows.insert(account, raw);
    }

    pub fn set_token_uri(&self, token_id: U256, uri: &str) {
        self.state.lock().token_uris.insert(token_id, uri.to_string());
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    pub fn set_fail_submit(&self, fail: bool) {
        self.state.lock().fail_submit = fail;
    }

    pub fn set_revert_confirmations(&self, revert: bool) {
        self.state.lock().revert_confirmations = revert;
    }

    /// 挂起该账户的读取，直到返回的信号量被释放
    pub fn gate_reads(&self, account: Address) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.state.lock().read_gates.insert(account, gate.clone());
        gate
    }

    /// 挂起所有交易确认，直到返回的信号量被释放
    pub fn gate_confirmations(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.state.lock().confirmation_gate = Some(gate.clone());
        gate
    }

    pub fn flow_of(&self, account: Address) -> Option<RawFlowInfo> {
        self.state.lock().flows.get(&account).cloned()
    }

    fn apply(&self, account: Address, mutation: FlowMutation) {
        let mut state = self.state.lock();
        state.clock += 60;
        let now = U256::from(state.clock);

        match mutation {
            FlowMutation::Create(rate) | FlowMutation::Update(rate) => {
                let token_id = match state.flows.get(&account) {
                    Some(existing) if !existing.created_at.is_zero() => existing.token_id,
                    _ => {
                        let id = U256::from(state.next_token_id);
                        state.next_token_id += 1;
                        id
                    }
                };
                let created_at = state
                    .flows
                    .get(&account)
                    .filter(|f| !f.created_at.is_zero())
                    .map(|f| f.created_at)
                    .unwrap_or(now);

                state.flows.insert(
                    account,
                    RawFlowInfo {
                        current_flow_rate: rate.to_contract_value(),
                        total_streamed: U256::ZERO,
                        created_at,
                        last_updated: now,
                        token_id,
                    },
                );
            }
            FlowMutation::Delete => {
                // 合约对不存在的 flow 返回全零元组
                state.flows.remove(&account);
            }
        }
    }
}

#[async_trait]
impl FlowContract for MockContract {
    fn address(&self) -> Address {
        Address::repeat_byte(0xcc)
    }

    async fn flow_info_by_address(&self, account: Address) -> anyhow::Result<RawFlowInfo> {
        self.flow_info_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.state.lock().read_gates.get(&account).cloned();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await?;
        }

        let state = self.state.lock();
        if state.fail_reads {
            anyhow::bail!("connection refused");
        }
        Ok(state.flows.get(&account).cloned().unwrap_or_default())
    }

    async fn token_uri(&self, token_id: U256) -> anyhow::Result<String> {
        self.token_uri_calls.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .token_uris
            .get(&token_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("ERC721: invalid token ID"))
    }

    async fn submit(
        &self,
        signer: &dyn FlowSigner,
        mutation: FlowMutation,
    ) -> anyhow::Result<B256> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.lock();
        if state.fail_submit {
            anyhow::bail!("user rejected transaction");
        }
        state.tx_counter += 1;
        let tx_hash = B256::from(U256::from(state.tx_counter));
        state.pending.insert(tx_hash, (signer.address(), mutation));
        Ok(tx_hash)
    }

    async fn wait_for_confirmation(&self, tx_hash: B256) -> anyhow::Result<TxReceipt> {
        let gate = self.state.lock().confirmation_gate.clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await?;
        }

        let (pending, revert) = {
            let mut state = self.state.lock();
            (state.pending.remove(&tx_hash), state.revert_confirmations)
        };
        let (account, mutation) =
            pending.ok_or_else(|| anyhow::anyhow!("unknown transaction {}", tx_hash))?;

        if revert {
            anyhow::bail!("交易 {} 已回滚", tx_hash);
        }

        self.apply(account, mutation);
        Ok(TxReceipt {
            tx_hash,
            block_number: Some(1),
        })
    }
}
