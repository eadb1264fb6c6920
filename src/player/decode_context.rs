use crate::core::{Frame, Packet, PlayerError, Result, StreamDescriptor};
use crate::engine::{DecodeEvent, StreamDecoder};
use crate::player::frame_buffer::{FrameBuffer, PushResult};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// 缓冲满时的重试间隔
const PUSH_RETRY_INTERVAL: Duration = Duration::from_millis(5);

const LOG_FIRST_N: u64 = 5;

/// 解码上下文 - 驱动单条流的解码器，把 Packet 变成 Frame
///
/// 每条入选流一个实例，由 demux 线程独占驱动，因此不需要内部加锁。
pub struct DecodeContext {
    descriptor: StreamDescriptor,
    decoder: Box<dyn StreamDecoder>,
    closed: bool,
    last_pts: Option<i64>,
    pts_warned: bool,
    frames_produced: u64,
}

impl std::fmt::Debug for DecodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeContext")
            .field("descriptor", &self.descriptor)
            .field("closed", &self.closed)
            .field("last_pts", &self.last_pts)
            .field("pts_warned", &self.pts_warned)
            .field("frames_produced", &self.frames_produced)
            .finish_non_exhaustive()
    }
}

impl DecodeContext {
    pub fn new(descriptor: StreamDescriptor, decoder: Box<dyn StreamDecoder>) -> Self {
        Self {
            descriptor,
            decoder,
            closed: false,
            last_pts: None,
            pts_warned: false,
            frames_produced: 0,
        }
    }

    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn frames_produced(&self) -> u64 {
        self.frames_produced
    }

    /// 送入一个数据包，并把解码出的帧全部排入缓冲
    ///
    /// 解码器报 WouldBlock 即停止榨取，等待下一个包；
    /// 硬解码错误以 Err 上抛，由 demux 循环关闭本上下文。
    pub fn send_packet(
        &mut self,
        packet: &Packet,
        buffer: &FrameBuffer,
        running: &AtomicBool,
    ) -> Result<()> {
        if self.closed {
            // 已关闭的流：丢弃数据包
            return Ok(());
        }
        self.decoder.send_packet(packet)?;
        if self.drain(buffer, running)? {
            // 解码器提前报告流结束
            self.close(buffer);
        }
        Ok(())
    }

    /// 冲刷：榨干尾部帧并关闭本上下文
    pub fn flush(&mut self, buffer: &FrameBuffer, running: &AtomicBool) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        debug!("流 #{} 冲刷解码器", self.descriptor.index);
        let result = self
            .decoder
            .send_flush()
            .and_then(|_| self.drain(buffer, running));
        // 无论冲刷是否顺利（含取消中止），本上下文都到此为止
        self.close(buffer);
        result.map(|_| ())
    }

    /// 标记关闭并同步到帧缓冲
    pub fn close(&mut self, buffer: &FrameBuffer) {
        if !self.closed {
            self.closed = true;
            buffer.mark_stream_closed(self.descriptor.index);
            info!(
                "🔚 流 #{} 解码上下文关闭（共产出 {} 帧）",
                self.descriptor.index, self.frames_produced
            );
        }
    }

    /// 榨取解码器当前可产出的全部帧；返回是否见到 EndOfStream
    fn drain(&mut self, buffer: &FrameBuffer, running: &AtomicBool) -> Result<bool> {
        loop {
            match self.decoder.receive()? {
                DecodeEvent::Frame(frame) => {
                    let frame = self.rescale(frame);
                    self.push_with_retry(frame, buffer, running)?;
                }
                DecodeEvent::WouldBlock => return Ok(false),
                DecodeEvent::EndOfStream => return Ok(true),
            }
        }
    }

    /// 把帧时间戳换算到缓冲区统一的毫秒时间基
    fn rescale(&mut self, mut frame: Frame) -> Frame {
        frame.stream_index = self.descriptor.index;
        frame.pts = self.descriptor.time_base.to_millis(frame.pts);
        frame.duration = self.descriptor.time_base.to_millis(frame.duration);

        // 同一条流内 PTS 应当单调不减；违例只告警一次，不中断播放
        if let Some(last) = self.last_pts {
            if frame.pts < last && !self.pts_warned {
                warn!(
                    "⚠️ 流 #{} PTS 回退: {}ms < {}ms",
                    self.descriptor.index, frame.pts, last
                );
                self.pts_warned = true;
            }
        }
        self.last_pts = Some(frame.pts);

        self.frames_produced += 1;
        if self.frames_produced <= LOG_FIRST_N || self.frames_produced % 100 == 0 {
            debug!(
                "流 #{} 解码帧 #{}: PTS={}ms",
                self.descriptor.index, self.frames_produced, frame.pts
            );
        }
        frame
    }

    /// 入缓冲；队满则小睡重试，期间随时响应取消。帧在这里绝不丢弃
    fn push_with_retry(
        &self,
        mut frame: Frame,
        buffer: &FrameBuffer,
        running: &AtomicBool,
    ) -> Result<()> {
        loop {
            match buffer.push(frame) {
                PushResult::Ok => return Ok(()),
                PushResult::Full(returned) => {
                    if !running.load(Ordering::SeqCst) {
                        return Err(PlayerError::Cancelled);
                    }
                    frame = returned;
                    thread::sleep(PUSH_RETRY_INTERVAL);
                }
            }
        }
    }
}
