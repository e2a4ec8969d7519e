#[unsafe(no_mangle)]
/// ### English
/// Returns the C ABI version.
///
/// ### 中文
/// 返回 C ABI 版本号。
pub extern "C" fn xian_overlay_abi_version() -> u32 {
    super::XIAN_OVERLAY_ABI_VERSION
}

#[unsafe(no_mangle)]
/// ### English
/// Installs the process logger (`RUST_LOG` filter, `info` by default).
///
/// Returns `true` if this call installed it; later calls are no-ops and return `false`.
///
/// ### 中文
/// 安装进程级 logger（`RUST_LOG` 过滤，默认 `info`）。
///
/// 本次调用完成安装时返回 `true`；之后的调用不做任何事并返回 `false`。
pub extern "C" fn xian_overlay_init_logging() -> bool {
    crate::engine::logging::init()
}
