//! flowcraft 命令行
//!
//! 查看、创建、更新、删除和持续观察当前账户的 flow

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use flowcraft::chain::{JsonRpcClient, JsonRpcContract, RpcSigner, Wallet};
use flowcraft::common::short_hex;
use flowcraft::flow::{
    FlowError, FlowSession, OperationKind, Outcome, RateConverter, Settlement, TransactionRequest,
};
use flowcraft::http_client::build_client;
use flowcraft::model::config::Config;
use flowcraft::webhook::SettlementNotifier;

/// flowcraft - FlowCraft 流支付客户端
#[derive(Parser, Debug)]
#[command(name = "flowcraft")]
#[command(version, about, long_about = None)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = Config::default_config_path())]
    config: PathBuf,

    /// 钱包账户（覆盖配置中的 account）
    #[arg(short, long)]
    account: Option<Address>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 显示当前 flow
    Show {
        /// 以 JSON 输出
        #[arg(long)]
        json: bool,
    },

    /// 创建 flow（已有 flow 时改为更新）
    Create {
        /// 流速（token/月）
        #[arg(short, long)]
        rate: String,
    },

    /// 更新 flow 流速（没有 flow 时改为创建）
    Update {
        /// 流速（token/月）
        #[arg(short, long)]
        rate: String,
    },

    /// 删除 flow
    Delete,

    /// 周期性刷新并显示 flow
    Watch {
        /// 刷新间隔（秒）
        #[arg(short, long, default_value = "15")]
        interval: u64,
    },

    /// 发送测试 webhook
    WebhookTest,

    /// 设置默认钱包账户并写回配置文件
    Account {
        /// 钱包账户地址
        address: Address,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = Config::load(&cli.config)?;
    if let Some(account) = cli.account {
        config.account = Some(account);
    }

    if let Commands::WebhookTest = cli.command {
        let url = config
            .webhook_url
            .as_deref()
            .context("未配置 webhookUrl")?;
        SettlementNotifier::send_test(
            url,
            config.webhook_body.clone(),
            config.proxy_url.as_deref(),
            config.tls_backend,
        )
        .await?;
        println!("Webhook 测试发送成功");
        return Ok(());
    }

    if let Commands::Account { address } = cli.command {
        config.account = Some(address);
        config.save()?;
        let path = config
            .config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        println!("默认账户已设置为 {}，已写入 {}", address, path);
        return Ok(());
    }

    let (session, notifier) = build_session(&config).await?;
    let result = run_command(cli.command, &session, &config).await;

    // 等待交易结束通知发送完毕再退出
    if let Some(notifier) = notifier {
        notifier.shutdown().await;
    }
    result
}

async fn run_command(
    command: Commands,
    session: &FlowSession,
    config: &Config,
) -> anyhow::Result<()> {
    match command {
        Commands::Show { json } => {
            session.refresh().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&session.summary())?);
            } else {
                print_flow(session, config);
            }
        }
        Commands::Create { rate } => {
            submit(session, config, &rate, TransactionRequest::Create).await?;
        }
        Commands::Update { rate } => {
            submit(session, config, &rate, TransactionRequest::Update).await?;
        }
        Commands::Delete => {
            session.refresh().await?;
            let settlement = session.submit(TransactionRequest::Delete).await?;
            print_settlement(&settlement);
            session.acknowledge();
        }
        Commands::Watch { interval } => watch(session, config, interval).await?,
        Commands::WebhookTest | Commands::Account { .. } => {}
    }

    Ok(())
}

async fn build_session(
    config: &Config,
) -> anyhow::Result<(FlowSession, Option<Arc<SettlementNotifier>>)> {
    let contract_address = config.require_contract_address()?;
    let client = build_client(
        config.proxy_url.as_deref(),
        config.request_timeout_secs,
        config.tls_backend,
    )?;
    let rpc = Arc::new(JsonRpcClient::new(client, config.rpc_url.clone()));

    match rpc.chain_id().await {
        Ok(id) if id != config.chain_id => {
            tracing::warn!("节点 chain id {} 与配置的 {} 不一致", id, config.chain_id)
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("查询 chain id 失败: {:#}", e),
    }

    let contract = JsonRpcContract::new(rpc.clone(), contract_address, config.flow_info_method)
        .with_confirmation(
            config.confirmation_poll_interval(),
            config.confirmation_timeout(),
        );

    let wallet = match config.account {
        Some(account) => Wallet::connected(Arc::new(RpcSigner::new(rpc, account))),
        None => Wallet::disconnected(),
    };

    let converter = RateConverter::new(config.token_decimals)?;
    let mut session = FlowSession::new(Arc::new(contract), converter, wallet);

    let notifier = match &config.webhook_url {
        Some(url) => {
            let notifier = Arc::new(SettlementNotifier::new(
                url.clone(),
                config.webhook_body.clone(),
                config.proxy_url.as_deref(),
                config.tls_backend,
            )?);
            session = session.with_notifier(notifier.clone());
            Some(notifier)
        }
        None => None,
    };

    Ok((session, notifier))
}

async fn submit(
    session: &FlowSession,
    config: &Config,
    input: &str,
    request: fn(flowcraft::flow::FlowRate) -> TransactionRequest,
) -> anyhow::Result<()> {
    let rate = session.rate_from_input(input)?;
    session.refresh().await?;

    let settlement = session.submit(request(rate)).await?;
    print_settlement(&settlement);
    session.acknowledge();

    if settlement.outcome.is_success() {
        print_flow(session, config);
    }
    Ok(())
}

async fn watch(session: &FlowSession, config: &Config, interval: u64) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match session.refresh().await {
                    Ok(_) => print_flow(session, config),
                    Err(FlowError::WalletNotConnected) => {
                        return Err(FlowError::WalletNotConnected.into());
                    }
                    // 失败已记录日志，保留上一次状态继续观察
                    Err(_) => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("收到中断信号，停止观察");
                return Ok(());
            }
        }
    }
}

fn print_flow(session: &FlowSession, config: &Config) {
    let Some(summary) = session.summary() else {
        println!("{}", FlowError::NoActiveFlow);
        return;
    };

    let rate = summary
        .monthly_rate
        .map(|r| r.to_string())
        .unwrap_or_else(|| "-".to_string());
    let streamed = summary
        .total_streamed
        .map(|t| t.to_string())
        .unwrap_or_else(|| summary.total_streamed_raw.to_string());

    println!("账户:     {}", short_hex(&summary.account.to_string()));
    println!("流速:     {} {}/mo", rate, config.token_symbol);
    println!("已流出:   {} {}", streamed, config.token_symbol);
    if let Some(created) = summary.created_at {
        println!("创建时间: {} ({})", created.format("%Y-%m-%d %H:%M:%S"), summary.created_ago);
    }
    if let Some(updated) = summary.last_updated {
        println!("更新时间: {} ({})", updated.format("%Y-%m-%d %H:%M:%S"), summary.updated_ago);
    }
    if let Some(token_id) = summary.token_id {
        println!("NFT:      #{}", token_id);
    }
    if let Some(metadata) = &summary.metadata {
        println!("  {}", metadata.name);
        for attribute in &metadata.attributes {
            println!("  {}: {}", attribute.trait_type, attribute.value);
        }
    }
}

fn print_settlement(settlement: &Settlement) {
    let verb = match settlement.kind {
        OperationKind::Create => "Flow created",
        OperationKind::Update => "Flow updated",
        OperationKind::Delete => "Flow deleted",
    };
    match &settlement.outcome {
        Outcome::Success { tx_hash } => println!("{}: {}", verb, tx_hash),
        Outcome::Failure(e) => println!("Error: {}", e),
    }
}
