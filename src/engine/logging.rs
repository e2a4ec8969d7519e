//! ### English
//! Process-wide logger installation.
//!
//! ### 中文
//! 进程级 logger 安装。

/// ### English
/// Installs `env_logger` with an `info` default filter (overridable through `RUST_LOG`).
///
/// Safe to call more than once; only the first call installs a logger. Returns whether this
/// call installed it.
///
/// ### 中文
/// 安装 `env_logger`，默认过滤级别为 `info`（可通过 `RUST_LOG` 覆盖）。
///
/// 可重复调用；仅第一次调用会安装 logger。返回本次调用是否完成了安装。
pub fn init() -> bool {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init()
        .is_ok()
}
