//! playflow - 播放核心：解码编排与音视频同步调度
//!
//! 不绑定具体的解封装/解码引擎，调用方通过 [`engine`] 里的 trait
//! 接入真实媒体源与解码器，本 crate 负责选流、解码驱动、
//! 帧缓冲背压与按播放时钟的配速投递。
//!
//! 典型用法：
//! 实现 `MediaSource` / `DecoderFactory` / `FrameSink`，
//! 然后 `PlaybackManager::start(...)` 并 `wait()` 到播放结束。

pub mod core;
pub mod engine;
pub mod player;

pub use crate::core::{
    BufferCapacity, BufferStats, Frame, FramePayload, MasterStreamPolicy, MediaKind, Packet,
    PixelFormat, PlaybackClock, PlayerConfig, PlayerError, Result, SampleFormat, StreamDescriptor,
    StreamFailure, StreamParams, Timebase,
};
pub use crate::engine::{
    ChannelSink, DecodeEvent, DecoderFactory, EnqueueResult, FrameSink, MediaSource, StreamDecoder,
};
pub use crate::player::{PlaybackManager, PlaybackReport, StreamSelection};
