//! 外部解封装/解码引擎接口
//!
//! 本 crate 不做容器解析和编解码运算，只负责编排：
//! 不同的引擎（FFmpeg 绑定、纯 Rust 解码器、测试桩等）实现这些接口即可接入。

use crate::core::{Frame, Packet, Result, StreamDescriptor};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;

/// 媒体源抽象接口：一个已打开的容器
///
/// 返回约定：
/// - Ok(Some(packet)): 成功读取一个包
/// - Ok(None): 到达末尾
/// - Err(e): 读取错误
pub trait MediaSource: Send {
    /// 源内全部流的描述信息（打开后固定不变）
    fn streams(&self) -> &[StreamDescriptor];

    /// 读取下一个数据包
    fn read_packet(&mut self) -> Result<Option<Packet>>;

    /// 获取描述信息（用于日志）
    fn description(&self) -> String;
}

/// 解码产出：用标签结果显式分支，而不是错误码
pub enum DecodeEvent {
    /// 产出一帧；PTS 仍为流时间基，由解码上下文统一换算成毫秒
    Frame(Frame),
    /// 需要更多输入，非错误
    WouldBlock,
    /// 本流不再产出任何帧（flush 之后）
    EndOfStream,
}

/// 单条流的解码器
///
/// 驱动方式：send_packet / send_flush 之后反复 receive，
/// 直到 WouldBlock（等下一个包）或 EndOfStream（流结束）。
/// 硬解码错误以 Err 返回。
pub trait StreamDecoder: Send {
    fn send_packet(&mut self, packet: &Packet) -> Result<()>;

    /// 送入冲刷标记：之后 receive 会榨干尾部帧并以 EndOfStream 收尾
    fn send_flush(&mut self) -> Result<()>;

    fn receive(&mut self) -> Result<DecodeEvent>;
}

/// 解码器工厂：按流描述创建解码器
pub trait DecoderFactory {
    fn create(&self, stream: &StreamDescriptor) -> Result<Box<dyn StreamDecoder>>;
}

/// 帧入队结果：队满/已停止时归还帧，所有权不会悄悄丢失
pub enum EnqueueResult {
    Ok,
    QueueFull(Frame),
    Stopped(Frame),
}

/// 渲染端接口：调度器按时把帧投递到这里
pub trait FrameSink: Send {
    fn enqueue(&self, frame: Frame) -> EnqueueResult;

    /// 通知渲染端不再有新帧
    fn close_input(&self);
}

/// 基于有界通道的渲染队列适配器
///
/// 渲染线程持有 Receiver 端消费；通道满即 QueueFull，对端断开即 Stopped。
pub struct ChannelSink {
    tx: Mutex<Option<Sender<Frame>>>,
}

impl ChannelSink {
    /// 创建容量为 capacity 的渲染队列，返回（写端, 读端）
    pub fn bounded(capacity: usize) -> (Self, Receiver<Frame>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }
}

impl FrameSink for ChannelSink {
    fn enqueue(&self, frame: Frame) -> EnqueueResult {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return EnqueueResult::Stopped(frame);
        };
        match tx.try_send(frame) {
            Ok(()) => EnqueueResult::Ok,
            Err(TrySendError::Full(frame)) => EnqueueResult::QueueFull(frame),
            Err(TrySendError::Disconnected(frame)) => EnqueueResult::Stopped(frame),
        }
    }

    fn close_input(&self) {
        // 丢掉发送端，接收端随即看到断开
        self.tx.lock().take();
    }
}
