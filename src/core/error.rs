use crate::core::types::MediaKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("参数错误: {0}")]
    BadParameter(String),

    #[error("未找到{0}流")]
    StreamNotFound(MediaKind),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("解封装错误: {0}")]
    DemuxError(String),

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("播放已取消")]
    Cancelled,

    #[error("{0}线程异常退出")]
    ThreadPanicked(&'static str),
}

pub type Result<T> = std::result::Result<T, PlayerError>;

/// 单条流的解码失败记录（聚合上报，不中断其他流）
#[derive(Debug)]
pub struct StreamFailure {
    pub stream_index: usize,
    pub kind: MediaKind,
    pub error: PlayerError,
}
