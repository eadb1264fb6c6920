use crate::core::{BufferCapacity, BufferStats, Frame};
use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};

/// push 结果：队满时把帧原样归还，绝不静默丢弃
#[derive(Debug)]
pub enum PushResult {
    Ok,
    Full(Frame),
}

struct BufferedFrame {
    seq: u64,
    frame: Frame,
}

struct BufferInner {
    /// 按入队序号升序；seq 即"最早未消费"的依据
    frames: VecDeque<BufferedFrame>,
    next_seq: u64,
    /// 已入选的流索引（all_closed 判定的分母）
    registered: BTreeSet<usize>,
    /// 已报告流结束的流索引
    closed: BTreeSet<usize>,
    /// 一旦置位不再回退
    all_closed: bool,
}

/// 帧缓冲 - 有界、线程安全的多流解码帧队列
///
/// 这是 demux 线程与调度线程之间唯一的共享可变结构：
/// push 由解码上下文（demux 线程）调用，next/stats 由调度线程调用，
/// 全部非阻塞，背压通过拒绝 push 实现。
pub struct FrameBuffer {
    capacity: BufferCapacity,
    inner: Mutex<BufferInner>,
}

impl FrameBuffer {
    pub fn new(capacity: BufferCapacity) -> Self {
        Self {
            capacity,
            inner: Mutex::new(BufferInner {
                frames: VecDeque::new(),
                next_seq: 0,
                registered: BTreeSet::new(),
                closed: BTreeSet::new(),
                all_closed: false,
            }),
        }
    }

    /// 登记一条入选流（选流阶段调用，之后才允许对它计 all_closed）
    pub fn register_stream(&self, stream_index: usize) {
        let mut inner = self.inner.lock();
        inner.registered.insert(stream_index);
    }

    /// 非阻塞入队；超出容量上限时拒绝并归还帧
    pub fn push(&self, frame: Frame) -> PushResult {
        let mut inner = self.inner.lock();
        let would_exceed = match self.capacity {
            BufferCapacity::Frames(max) => inner.frames.len() >= max,
            BufferCapacity::Millis(span) => {
                // 跨度 = 最新入队 PTS − 最早未消费 PTS（跨所有流）
                // 空缓冲必须接受首帧，否则流水线会卡死
                let latest = inner
                    .frames
                    .iter()
                    .map(|b| b.frame.pts)
                    .max()
                    .map(|m| m.max(frame.pts))
                    .unwrap_or(frame.pts);
                let earliest = inner
                    .frames
                    .iter()
                    .map(|b| b.frame.pts)
                    .min()
                    .map(|m| m.min(frame.pts))
                    .unwrap_or(frame.pts);
                !inner.frames.is_empty() && latest.saturating_sub(earliest) > span
            }
        };
        if would_exceed {
            return PushResult::Full(frame);
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.frames.push_back(BufferedFrame { seq, frame });
        PushResult::Ok
    }

    /// 非阻塞出队：返回最早未消费的帧（可选限定单条流）；空时返回 None
    pub fn next(&self, stream_filter: Option<usize>) -> Option<Frame> {
        let mut inner = self.inner.lock();
        let pos = match stream_filter {
            None => {
                if inner.frames.is_empty() {
                    None
                } else {
                    Some(0)
                }
            }
            Some(index) => inner
                .frames
                .iter()
                .position(|b| b.frame.stream_index == index),
        }?;
        let buffered = inner.frames.remove(pos)?;
        Self::refresh_all_closed(&mut inner);
        Some(buffered.frame)
    }

    /// 标记一条流不再产出帧
    pub fn mark_stream_closed(&self, stream_index: usize) {
        let mut inner = self.inner.lock();
        inner.closed.insert(stream_index);
        Self::refresh_all_closed(&mut inner);
    }

    /// 读取统计快照
    pub fn stats(&self) -> BufferStats {
        let mut inner = self.inner.lock();
        Self::refresh_all_closed(&mut inner);
        let mut stats = BufferStats {
            total_frames: inner.frames.len(),
            all_streams_closed: !inner.registered.is_empty()
                && inner.registered.iter().all(|i| inner.closed.contains(i)),
            all_closed: inner.all_closed,
            per_stream: Default::default(),
        };
        for buffered in &inner.frames {
            *stats
                .per_stream
                .entry(buffered.frame.stream_index)
                .or_insert(0) += 1;
        }
        stats
    }

    /// 丢弃全部缓冲帧（停止/取消路径）
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.frames.clear();
        Self::refresh_all_closed(&mut inner);
    }

    fn refresh_all_closed(inner: &mut BufferInner) {
        if inner.all_closed {
            return;
        }
        if !inner.registered.is_empty()
            && inner.frames.is_empty()
            && inner.registered.iter().all(|i| inner.closed.contains(i))
        {
            inner.all_closed = true;
        }
    }
}
