//! 测试基础设施
//!
//! 提供在不依赖真实 embedding 服务的情况下测试记忆引擎各组件的工具。
//!
//! | 类型 | 用途 |
//! |------|------|
//! | [`MockEmbeddingProvider`] | 替代真实 embedding 服务：脚本化向量、失败与延迟，记录调用 |
//!
//! # 设计原则
//!
//! - **零网络请求**：完全在内存中运行
//! - **可脚本化**：`with_vector()` / `with_failure()` 精确控制返回值
//! - **可观测**：`call_count()` / `calls()` 检查调用情况

mod mock_embedding;

pub use mock_embedding::MockEmbeddingProvider;
