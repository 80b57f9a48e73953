//! 客户端与服务器之间的事件协议
//!
//! 每个 WebSocket 文本帧是一个 `{"event": "<名称>", "data": <载荷>}` 对象，
//! 事件名为 kebab-case，载荷字段为 camelCase。

pub mod client;
pub mod server;

pub use client::*;
pub use server::*;
