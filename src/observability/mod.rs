//! 可观测性：tracing 订阅器初始化

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装全局订阅器；RUST_LOG 优先，否则使用 `default_directive`（如 "info"、"sully=debug"）
///
/// 重复调用时返回 false。
pub fn init(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .is_ok()
}
