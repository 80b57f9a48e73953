//! 实时聊天协调器的核心领域模型
//!
//! 包含会话、消息、在线状态等实体，纯状态转换函数，
//! 以及客户端与服务器之间的事件协议定义。这里不做任何 I/O。

pub mod entities;
pub mod errors;
pub mod events;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use events::*;
pub use value_objects::*;
