// ========== 播放核心模块 ==========
// 选流 → demux 循环驱动各解码上下文 → 帧缓冲 → 时钟配速调度
// 线程间只靠帧缓冲的背压与共享取消标志协作

pub mod decode_context;
pub mod demux_loop;
pub mod frame_buffer;
pub mod manager;
pub mod scheduler;
pub mod selector;

pub use decode_context::DecodeContext;
pub use demux_loop::{DemuxOutcome, DemuxReport};
pub use frame_buffer::{FrameBuffer, PushResult};
pub use manager::{PlaybackManager, PlaybackReport};
pub use scheduler::{SchedulerOutcome, SchedulerReport};
pub use selector::StreamSelection;
