//! memory_session.rs —— 记忆引擎完整流程演示
//!
//! ```text
//! Part 1: 函数调用（add_memory / search_memory / append_to_module）
//! Part 2: 对话日志与 retrieve_messages
//! Part 3: 类型化记忆（实体 / 长期 / 短期）
//! Part 4: 重新打开引擎，从快照恢复
//! ```
//!
//! 使用本地哈希 embedding，不访问网络。
//!
//! # 运行
//! ```bash
//! cargo run --example memory_session
//! ```

use echo_memory::config::{EngineConfig, ModuleSeed};
use echo_memory::embedding::{EmbeddingProvider, HashEmbeddingProvider};
use echo_memory::engine::MemoryEngine;
use echo_memory::memory::{EntityItem, LongTermItem, ShortTermItem};
use serde_json::json;
use std::sync::Arc;

#[tokio::main]
async fn main() -> echo_memory::error::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "echo_memory=info,memory_session=info".into()),
        )
        .init();

    let data_dir = std::env::temp_dir().join(format!("echo-memory-demo-{}", uuid::Uuid::new_v4().simple()));
    let config = EngineConfig {
        data_dir: data_dir.clone(),
        similarity_threshold: 0.2,
        persona: ModuleSeed::new(200, "I am a helpful assistant."),
        human: ModuleSeed::new(200, ""),
        ..EngineConfig::default()
    };
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::default());

    // ── Part 1 ────────────────────────────────────────────────────────────────
    separator("Part 1: 函数调用");
    let engine = MemoryEngine::open(config.clone(), embedder.clone()).await?;
    for call in [
        json!({"name": "add_memory", "args": {"content": "Paris is the capital of France"}}),
        json!({"name": "add_memory", "args": {"content": "Bananas are yellow"}}),
        json!({"name": "search_memory", "args": {"query": "capital of France", "top_k": 1}}),
        json!({"name": "append_to_module", "args": {"module_name": "human", "content": "Name: Ada."}}),
        json!({"name": "replace_in_module", "args": {"module_name": "persona", "old_content": "helpful", "new_content": "patient"}}),
        json!({"name": "fly_to_moon"}),
    ] {
        println!("  ➡️  {call}");
        println!("  ⬅️  {}\n", engine.dispatch_value(call).await);
    }
    println!("{}", engine.core_prompt().await);

    // ── Part 2 ────────────────────────────────────────────────────────────────
    separator("Part 2: 对话日志");
    engine.record_message("user", "I just moved to Paris").await?;
    engine.record_message("assistant", "Welcome to Paris!").await?;
    let out = engine
        .dispatch_value(json!({"name": "retrieve_messages", "args": {"query": "paris"}}))
        .await;
    println!("  {out}");

    // ── Part 3 ────────────────────────────────────────────────────────────────
    separator("Part 3: 类型化记忆");
    engine
        .entity()
        .save(&EntityItem::new("Ada", "person", "mathematician", "works with Charles"))
        .await?;
    engine
        .long_term()
        .save(&LongTermItem::new("writer", "write weekly report", "a markdown file", "2024-05-01").with_quality(8.0))
        .await?;
    engine
        .short_term()
        .save(&ShortTermItem::new("report outline drafted").with_agent("writer"))
        .await?;
    for hit in engine.long_term().search("weekly report", 3).await? {
        println!("  📌 {} (score {:?})", hit.entry.value, hit.score);
    }
    engine.save_all().await?;
    drop(engine);

    // ── Part 4 ────────────────────────────────────────────────────────────────
    separator("Part 4: 从快照恢复");
    let reopened = MemoryEngine::open(config, embedder).await?;
    let state = reopened.main().snapshot().await;
    println!(
        "  核心模块 {} 个，归档 {} 条，消息 {} 条",
        state.core.len(),
        state.archival.len(),
        state.recall.len()
    );
    println!("  数据目录: {}", data_dir.display());

    Ok(())
}

fn separator(title: &str) {
    println!("\n{}", "─".repeat(62));
    println!("  {title}");
    println!("{}\n", "─".repeat(62));
}
