// 核心数据结构和类型定义

pub mod clock;
pub mod error;
pub mod types;

pub use clock::*;
pub use error::*;
pub use types::*;
