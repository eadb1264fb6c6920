use crate::core::{
    BufferCapacity, BufferStats, MasterStreamPolicy, MediaKind, PlaybackClock, PlayerConfig,
    PlayerError, Result, StreamFailure,
};
use crate::engine::{DecoderFactory, FrameSink, MediaSource};
use crate::player::decode_context::DecodeContext;
use crate::player::demux_loop::{run_demux_loop, DemuxOutcome, DemuxReport};
use crate::player::frame_buffer::FrameBuffer;
use crate::player::scheduler::{run_scheduler, SchedulerOutcome, SchedulerReport};
use crate::player::selector::{select_streams, StreamSelection};
use log::{info, warn};
use std::collections::BTreeMap;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

fn log_ctx() -> String {
    format!("[pid:{}-tid:{:?}]", process::id(), thread::current().id())
}

/// 一轮播放的汇总结果
///
/// failures 非空表示部分流解码失败但播放照常走完；
/// 调用方按需检查聚合错误。
#[derive(Debug)]
pub struct PlaybackReport {
    pub packets_read: u64,
    pub frames_produced: u64,
    pub delivered: u64,
    pub dropped_late: u64,
    pub dropped_backoff: u64,
    /// 渲染端在播放途中停止接收，本轮因此提前结束
    pub sink_stopped: bool,
    pub failures: Vec<StreamFailure>,
}

/// 播放管理器 - 整体控制播放流程
///
/// 拉起 demux 与调度两条线程；二者只通过帧缓冲与共享的取消信号协作。
pub struct PlaybackManager {
    running: Arc<AtomicBool>,
    buffer: Arc<FrameBuffer>,
    clock: PlaybackClock,
    demux_thread: Option<thread::JoinHandle<DemuxReport>>,
    scheduler_thread: Option<thread::JoinHandle<SchedulerReport>>,
}

impl PlaybackManager {
    /// 开始一轮播放：校验配置、选流、拉起线程
    pub fn start(
        config: PlayerConfig,
        source: Box<dyn MediaSource>,
        factory: &dyn DecoderFactory,
        selection: &StreamSelection,
        sink: Box<dyn FrameSink>,
    ) -> Result<Self> {
        validate_config(&config)?;
        info!("{} 🎮 启动播放: {}", log_ctx(), source.description());

        let contexts = select_streams(&*source, selection, factory)?;
        let buffer = Arc::new(FrameBuffer::new(config.buffer_capacity));
        for &index in contexts.keys() {
            buffer.register_stream(index);
        }
        let master = resolve_master(config.master_stream, &contexts)?;

        let running = Arc::new(AtomicBool::new(true));
        let clock = PlaybackClock::new();

        let demux_thread = {
            let buffer = buffer.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("playflow-demux".to_string())
                .spawn(move || run_demux_loop(source, contexts, buffer, running))?
        };

        let scheduler_thread = {
            let sched_buffer = buffer.clone();
            let sched_running = running.clone();
            let sched_clock = clock.clone();
            match thread::Builder::new()
                .name("playflow-sched".to_string())
                .spawn(move || {
                    run_scheduler(sched_buffer, sink, sched_clock, config, master, sched_running)
                }) {
                Ok(handle) => handle,
                Err(e) => {
                    // 调度线程没起来，demux 线程不能悬着
                    running.store(false, Ordering::SeqCst);
                    let _ = demux_thread.join();
                    buffer.clear();
                    return Err(e.into());
                }
            }
        };

        Ok(Self {
            running,
            buffer,
            clock,
            demux_thread: Some(demux_thread),
            scheduler_thread: Some(scheduler_thread),
        })
    }

    /// 帧缓冲统计快照
    pub fn stats(&self) -> BufferStats {
        self.buffer.stats()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 暂停：冻结播放时钟，调度器停在配速点上
    pub fn pause(&self) {
        self.clock.pause();
    }

    pub fn resume(&self) {
        self.clock.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.clock.is_paused()
    }

    /// 发出取消信号（不等待线程退出）
    pub fn cancel(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// 取消并等待两条线程退出；可重复调用
    pub fn stop(&mut self) {
        self.cancel();
        if let Some(handle) = self.demux_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.scheduler_thread.take() {
            let _ = handle.join();
        }
        self.buffer.clear();
    }

    /// 等待播放自然结束并汇总结果
    ///
    /// 返回：
    /// - Ok(report): 干净完成（report.failures 列出各流的解码失败；
    ///   渲染端中途退出也算正常结束，report.sink_stopped 置位）
    /// - Err(Cancelled): 调用方在运行中取消
    /// - Err(e): demux 循环被读取错误终止
    pub fn wait(&mut self) -> Result<PlaybackReport> {
        let demux_report = match self.demux_thread.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| PlayerError::ThreadPanicked("demux"))?,
            None => return Err(PlayerError::BadParameter("播放已经结束".to_string())),
        };
        let scheduler_report = match self.scheduler_thread.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| PlayerError::ThreadPanicked("调度"))?,
            None => return Err(PlayerError::BadParameter("播放已经结束".to_string())),
        };
        self.running.store(false, Ordering::SeqCst);
        // 取消路径上 demux 的冲刷可能在调度器清空之后又补入了帧
        self.buffer.clear();

        let demux_cancelled = matches!(demux_report.outcome, DemuxOutcome::Cancelled);
        if let DemuxOutcome::Failed(e) = demux_report.outcome {
            return Err(e);
        }
        // 渲染端退出时调度器会放下取消信号让 demux 收工，
        // 这种内部停机不能伪装成调用方的取消
        let sink_stopped = scheduler_report.outcome == SchedulerOutcome::SinkStopped;
        if !sink_stopped
            && (demux_cancelled || scheduler_report.outcome == SchedulerOutcome::Cancelled)
        {
            return Err(PlayerError::Cancelled);
        }

        let report = PlaybackReport {
            packets_read: demux_report.packets_read,
            frames_produced: demux_report.frames_produced,
            delivered: scheduler_report.delivered,
            dropped_late: scheduler_report.dropped_late,
            dropped_backoff: scheduler_report.dropped_backoff,
            sink_stopped,
            failures: demux_report.failures,
        };
        info!(
            "{} ✅ 播放结束（产帧 {}，投递 {}，失败流 {}）",
            log_ctx(),
            report.frames_produced,
            report.delivered,
            report.failures.len()
        );
        Ok(report)
    }
}

impl Drop for PlaybackManager {
    fn drop(&mut self) {
        if self.demux_thread.is_some() || self.scheduler_thread.is_some() {
            warn!(
                "{} ⚠ PlaybackManager 被 drop 但未调用 stop()/wait()，正在尝试优雅停止",
                log_ctx()
            );
            self.stop();
        }
    }
}

fn validate_config(config: &PlayerConfig) -> Result<()> {
    match config.buffer_capacity {
        BufferCapacity::Frames(0) => {
            return Err(PlayerError::BadParameter("帧缓冲容量不能为 0".to_string()))
        }
        BufferCapacity::Millis(span) if span < 0 => {
            return Err(PlayerError::BadParameter(format!(
                "缓冲时长跨度不能为负: {}",
                span
            )))
        }
        _ => {}
    }
    if config.late_drop_threshold_ms < 0 {
        return Err(PlayerError::BadParameter(format!(
            "迟帧阈值不能为负: {}",
            config.late_drop_threshold_ms
        )));
    }
    Ok(())
}

/// 解析主时钟流：显式指定必须在选集内；PreferAudio 取索引最小的音频流，
/// 选集中没有音频时返回 None（按首帧锚定）
fn resolve_master(
    policy: MasterStreamPolicy,
    contexts: &BTreeMap<usize, DecodeContext>,
) -> Result<Option<usize>> {
    match policy {
        MasterStreamPolicy::Explicit(index) => {
            if contexts.contains_key(&index) {
                Ok(Some(index))
            } else {
                Err(PlayerError::BadParameter(format!(
                    "主时钟流 #{} 不在选集内",
                    index
                )))
            }
        }
        MasterStreamPolicy::PreferAudio => Ok(contexts
            .values()
            .find(|ctx| ctx.descriptor().kind == MediaKind::Audio)
            .map(|ctx| ctx.descriptor().index)),
    }
}
