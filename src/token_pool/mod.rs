//! Token 池（Token Pool）模块。
//!
//! 每个 provider 一组按配置顺序排列的上游 Token。配额耗尽的 Token 记录在
//! 共享 KV 中，仅在当前“配额日”内有效；跨日后逻辑上自动复位。

mod pool;
mod types;

pub use pool::{TOKEN_STATUS_KEY_PREFIX, TOKEN_STATUS_TTL, TokenPool, quota_day_at};
pub use types::{PoolPolicy, TokenStats, TokenStatusRecord};
