/// ### English
/// `xian_overlay` crate root: a multi-threaded GPU overlay for a GLFW game window.
/// Exposes the C ABI via `ffi`; core implementation lives under `engine`.
///
/// ### 中文
/// `xian_overlay` 的 crate 根：面向 GLFW 游戏窗口的多线程 GPU overlay。
/// 通过 `ffi` 导出 C ABI；核心实现位于 `engine` 模块。
pub mod engine;
mod ffi;
