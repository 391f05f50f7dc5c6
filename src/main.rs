//! Bee Chain 命令行入口
//!
//! 用法：`bee-chain [--config <path>] [--mode <mode>] [--deadline-ms <ms>] [--json] <prompt...>`
//! 加载配置、构建引擎、执行一条生成链并打印结果与 trace；Ctrl+C 取消在途请求。

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use bee_chain::{config::load_config, observability, ChainBuilder, GenerationRequest};
use clap::Parser;
use tokio_util::sync::CancellationToken;

/// Bee Chain - 按成本顺序在多个 Provider 之间回退的生成链
#[derive(Parser, Debug)]
#[command(name = "bee-chain", version, about = "Run one prompt through the provider chain")]
struct Cli {
    /// 额外的配置文件（叠加在 config/default.toml 之上）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 调用方模式：discussion / planning / execution / 自定义 persona
    #[arg(long)]
    mode: Option<String>,

    /// 整条链的时间预算（毫秒），默认取 [chain].default_deadline_ms
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// 要求输出为合法 JSON
    #[arg(long)]
    json: bool,

    #[arg(required = true, trailing_var_arg = true, num_args = 1..)]
    prompt: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cli = Cli::parse();
    let config = load_config(cli.config).context("Failed to load config")?;
    let deadline = cli
        .deadline_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.chain.default_deadline());

    let (executor, _dispatcher) = ChainBuilder::new(config)
        .build()
        .context("Failed to build chain engine")?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Ctrl+C received, cancelling request");
            ctrl_c.cancel();
        }
    });

    let mut request =
        GenerationRequest::new(cli.prompt.join(" "), deadline).with_requester_context("cli");
    if let Some(mode) = cli.mode {
        request = request.with_mode(mode);
    }
    if cli.json {
        request = request.expecting_json();
    }

    let result = executor.execute_with_cancel(request, cancel).await;
    executor.emitter().flush().await;

    match result {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(failure) => {
            eprintln!("{}", serde_json::to_string_pretty(&failure.trace)?);
            Err(anyhow::Error::new(failure).context("Generation chain failed"))
        }
    }
}
