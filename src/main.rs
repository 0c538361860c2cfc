//! echo-memory —— 记忆引擎交互终端
//!
//! ```text
//! > {"name": "add_memory", "args": {"content": "Paris is in France"}}
//! Memory added successfully.
//! > /say user 我住在巴黎
//! > /core
//! > /save
//! > /quit
//! ```
//!
//! # 运行
//! ```bash
//! cargo run -- --offline --data-dir ./data
//! ```

use clap::Parser;
use echo_memory::config::EngineConfig;
use echo_memory::embedding::{self, EmbeddingProvider, HashEmbeddingProvider};
use echo_memory::engine::MemoryEngine;
use echo_memory::error::{EngineError, Result};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "echo-memory", version, about = "分层记忆引擎交互终端")]
struct Cli {
    /// YAML 配置文件；缺省时从环境变量读取
    #[arg(short, long, env = "MEMORY_CONFIG")]
    config: Option<String>,

    /// 覆盖配置中的数据目录
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// 使用本地哈希 embedding，不访问远程服务
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "echo_memory=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::from_env()?,
    };
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    let embedder: Arc<dyn EmbeddingProvider> = if cli.offline {
        Arc::new(HashEmbeddingProvider::default())
    } else {
        embedding::from_config(&config.embedding)?
    };

    let engine = MemoryEngine::open(config, embedder).await?;
    print_banner();
    run_repl(&engine).await?;
    engine.save_all().await
}

async fn run_repl(engine: &MemoryEngine) -> Result<()> {
    let mut editor = DefaultEditor::new().map_err(readline_error)?;

    loop {
        let line = match editor.readline("🧠 > ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(readline_error(e)),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        match line.split_once(' ').map_or((line, ""), |(cmd, rest)| (cmd, rest.trim())) {
            ("/quit" | "/exit", _) => break,
            ("/help", _) => print_help(),
            ("/core", _) => println!("{}", engine.core_prompt().await),
            ("/save", _) => match engine.save_all().await {
                Ok(()) => println!("💾 已保存"),
                Err(e) => println!("❌ 保存失败: {e}"),
            },
            ("/say", rest) => match rest.split_once(' ') {
                Some((role, content)) => match engine.record_message(role, content.trim()).await {
                    Ok(()) => println!("📝 已记录 {role} 的消息"),
                    Err(e) => println!("❌ 记录失败: {e}"),
                },
                None => println!("用法: /say <role> <text>"),
            },
            _ if line.starts_with('{') => println!("{}", engine.dispatch_json(line).await),
            _ => println!("未识别的输入，输入 /help 查看用法"),
        }
    }

    Ok(())
}

fn readline_error(e: ReadlineError) -> EngineError {
    EngineError::Other(format!("readline: {e}"))
}

fn print_banner() {
    println!("{}", "═".repeat(62));
    println!("  echo-memory 交互终端（/help 查看命令）");
    println!("{}", "═".repeat(62));
}

fn print_help() {
    println!("  {{\"name\": ..., \"args\": {{...}}}}  执行记忆函数调用");
    println!("  /say <role> <text>             记录一条对话消息");
    println!("  /core                          查看核心记忆");
    println!("  /save                          保存全部记忆");
    println!("  /quit                          保存并退出");
}
