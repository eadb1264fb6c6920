use crate::core::{Frame, MediaKind, PlaybackClock, PlayerConfig};
use crate::engine::{EnqueueResult, FrameSink};
use crate::player::frame_buffer::FrameBuffer;
use log::{debug, info, warn};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

/// 缓冲为空/未达水位时的轮询间隔
const POLL_INTERVAL: Duration = Duration::from_millis(2);
/// 配速睡眠的最大切片，保证取消/暂停的响应延迟有界
const SLEEP_SLICE_MS: u64 = 10;
/// 渲染队列拥堵时的退避参数
const ENQUEUE_BACKOFF_START_MS: u64 = 6;
const ENQUEUE_BACKOFF_STEP_MS: u64 = 2;
const ENQUEUE_BACKOFF_MAX_MS: u64 = 20;
const ENQUEUE_MAX_ATTEMPTS: u32 = 50;

/// 调度器结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerOutcome {
    /// 所有流关闭且缓冲耗尽
    Completed,
    Cancelled,
    /// 渲染端不再接收
    SinkStopped,
}

/// 调度器运行报告
#[derive(Debug)]
pub struct SchedulerReport {
    pub delivered: u64,
    /// 迟到超阈值而被丢弃的视频帧
    pub dropped_late: u64,
    /// 渲染队列持续拥堵、退避耗尽后放弃的帧
    pub dropped_backoff: u64,
    pub outcome: SchedulerOutcome,
}

enum DeliverResult {
    Delivered,
    Dropped,
    SinkStopped,
    Cancelled,
}

/// 播放调度器（在独立线程中运行）
///
/// 状态机：WaitingForData → Anchoring → Streaming → Stopped。
/// 等缓冲达到低水位后，以主时钟流的首帧锚定墙钟，
/// 此后逐帧配速投递：早到睡眠、视频迟到丢弃、音频永不丢。
///
/// master 为 None 表示没有指定主时钟流，按出队的第一帧锚定。
pub fn run_scheduler(
    buffer: Arc<FrameBuffer>,
    sink: Box<dyn FrameSink>,
    clock: PlaybackClock,
    config: PlayerConfig,
    master: Option<usize>,
    running: Arc<AtomicBool>,
) -> SchedulerReport {
    info!(
        "{} 🚀 调度线程启动（低水位 {} 帧，迟帧阈值 {}ms，主时钟流 {:?}）",
        log_ctx(),
        config.low_watermark,
        config.late_drop_threshold_ms,
        master
    );

    let mut report = SchedulerReport {
        delivered: 0,
        dropped_late: 0,
        dropped_backoff: 0,
        outcome: SchedulerOutcome::Completed,
    };
    let outcome = streaming_loop(&buffer, &*sink, &clock, &config, master, &running, &mut report);
    report.outcome = outcome;

    // ========== Stopped：收尾 ==========
    sink.close_input();
    if report.outcome == SchedulerOutcome::Cancelled {
        // 取消时丢掉全部缓冲帧，保证不泄漏
        buffer.clear();
    }
    // 调度器退出后 demux 端已无人消费，顺手放下取消信号让它收工
    running.store(false, Ordering::SeqCst);

    info!(
        "{} 🛑 调度线程退出（投递 {}，迟帧丢弃 {}，队满丢弃 {}，结局 {:?}）",
        log_ctx(),
        report.delivered,
        report.dropped_late,
        report.dropped_backoff,
        report.outcome
    );
    report
}

fn streaming_loop(
    buffer: &FrameBuffer,
    sink: &dyn FrameSink,
    clock: &PlaybackClock,
    config: &PlayerConfig,
    master: Option<usize>,
    running: &AtomicBool,
    report: &mut SchedulerReport,
) -> SchedulerOutcome {
    // ========== WaitingForData：等待低水位 ==========
    // 产出已经停止（所有流关闭）时不再等水位，否则短输入会永远凑不够帧数
    loop {
        if !running.load(Ordering::SeqCst) {
            return SchedulerOutcome::Cancelled;
        }
        let stats = buffer.stats();
        if stats.total_frames >= config.low_watermark || stats.all_streams_closed {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }
    info!("{} ✅ 缓冲达到低水位，开始投递", log_ctx());

    loop {
        if !running.load(Ordering::SeqCst) {
            return SchedulerOutcome::Cancelled;
        }

        let Some(frame) = buffer.next(None) else {
            if buffer.stats().all_closed {
                info!("{} 📄 缓冲耗尽且所有流已关闭，播放完成", log_ctx());
                return SchedulerOutcome::Completed;
            }
            thread::sleep(POLL_INTERVAL);
            continue;
        };

        // ========== Anchoring：主时钟流首帧锚定 ==========
        if !clock.is_anchored() {
            let is_master = master
                .map(|index| index == frame.stream_index)
                .unwrap_or(true);
            if is_master {
                clock.try_anchor(frame.pts);
                info!(
                    "{} 🕐 时钟已锚定（流 #{} 首帧 PTS: {}ms）",
                    log_ctx(),
                    frame.stream_index,
                    frame.pts
                );
            } else {
                // 锚定前出队的非主流帧：立即投递，不配速
                match deliver_with_backoff(sink, frame, running) {
                    DeliverResult::Delivered => report.delivered += 1,
                    DeliverResult::Dropped => report.dropped_backoff += 1,
                    DeliverResult::SinkStopped => return SchedulerOutcome::SinkStopped,
                    DeliverResult::Cancelled => return SchedulerOutcome::Cancelled,
                }
                continue;
            }
        }

        // ========== Streaming：按墙钟配速 ==========
        // target = 锚定墙钟 + (PTS − 锚定 PTS)，即 delta = PTS − clock.now()
        loop {
            if !running.load(Ordering::SeqCst) {
                // 已出队的帧随取消一并释放
                return SchedulerOutcome::Cancelled;
            }
            if clock.is_paused() {
                thread::sleep(Duration::from_millis(SLEEP_SLICE_MS));
                continue;
            }
            let delta = frame.pts - clock.now();
            if delta <= 0 {
                break;
            }
            thread::sleep(Duration::from_millis((delta as u64).min(SLEEP_SLICE_MS)));
        }

        let lateness = clock.now() - frame.pts;
        if lateness > config.late_drop_threshold_ms && frame.kind() == MediaKind::Video {
            // 只有视频做迟帧丢弃；音频/字幕迟到也照常投递
            report.dropped_late += 1;
            debug!(
                "{} 🗑️ 丢弃迟到视频帧: PTS={}ms，迟 {}ms",
                log_ctx(),
                frame.pts,
                lateness
            );
            continue;
        }

        match deliver_with_backoff(sink, frame, running) {
            DeliverResult::Delivered => report.delivered += 1,
            DeliverResult::Dropped => report.dropped_backoff += 1,
            DeliverResult::SinkStopped => {
                info!("{} 🔌 渲染端已停止接收", log_ctx());
                return SchedulerOutcome::SinkStopped;
            }
            DeliverResult::Cancelled => return SchedulerOutcome::Cancelled,
        }
    }
}

/// 投递一帧；QueueFull 按 6→20ms 退避重试，次数有界，绝不无限阻塞配速
fn deliver_with_backoff(
    sink: &dyn FrameSink,
    frame: Frame,
    running: &AtomicBool,
) -> DeliverResult {
    let mut frame = frame;
    let mut backoff = ENQUEUE_BACKOFF_START_MS;
    for _ in 0..ENQUEUE_MAX_ATTEMPTS {
        match sink.enqueue(frame) {
            EnqueueResult::Ok => return DeliverResult::Delivered,
            EnqueueResult::QueueFull(returned) => {
                if !running.load(Ordering::SeqCst) {
                    return DeliverResult::Cancelled;
                }
                frame = returned;
                thread::sleep(Duration::from_millis(backoff));
                backoff = (backoff + ENQUEUE_BACKOFF_STEP_MS).min(ENQUEUE_BACKOFF_MAX_MS);
            }
            EnqueueResult::Stopped(_frame) => return DeliverResult::SinkStopped,
        }
    }
    warn!("{} ⚠️ 渲染队列持续拥堵，放弃一帧", log_ctx());
    DeliverResult::Dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BufferCapacity, FramePayload, MasterStreamPolicy, PixelFormat};
    use crate::engine::ChannelSink;
    use std::time::Instant;

    fn audio_frame(stream_index: usize, pts: i64) -> Frame {
        Frame {
            stream_index,
            pts,
            duration: 20,
            payload: FramePayload::Audio {
                samples: vec![0.0; 8],
                sample_rate: 48_000,
                channels: 2,
            },
        }
    }

    fn video_frame(stream_index: usize, pts: i64) -> Frame {
        Frame {
            stream_index,
            pts,
            duration: 33,
            payload: FramePayload::Video {
                width: 64,
                height: 48,
                format: PixelFormat::RGBA,
                data: vec![0u8; 64 * 48 * 4],
            },
        }
    }

    fn config(low_watermark: usize, late_drop_threshold_ms: i64) -> PlayerConfig {
        PlayerConfig {
            buffer_capacity: BufferCapacity::Frames(64),
            low_watermark,
            late_drop_threshold_ms,
            master_stream: MasterStreamPolicy::PreferAudio,
        }
    }

    fn push_all(buffer: &FrameBuffer, frames: Vec<Frame>) {
        for frame in frames {
            match buffer.push(frame) {
                crate::player::frame_buffer::PushResult::Ok => {}
                crate::player::frame_buffer::PushResult::Full(f) => {
                    panic!("测试缓冲不应满: pts={}", f.pts)
                }
            }
        }
    }

    /// 缓冲准备好后直接跑调度器（同一线程，流已全部关闭，跑完即返回）
    fn run_closed(
        buffer: Arc<FrameBuffer>,
        config: PlayerConfig,
        master: Option<usize>,
        sink_capacity: usize,
    ) -> (SchedulerReport, Vec<Frame>) {
        let (sink, rx) = ChannelSink::bounded(sink_capacity);
        let clock = PlaybackClock::new();
        let running = Arc::new(AtomicBool::new(true));
        let report = run_scheduler(
            buffer,
            Box::new(sink),
            clock,
            config,
            master,
            running,
        );
        let received: Vec<Frame> = rx.try_iter().collect();
        (report, received)
    }

    #[test]
    fn anchors_on_master_and_delivers_in_pts_order() {
        let buffer = Arc::new(FrameBuffer::new(BufferCapacity::Frames(64)));
        buffer.register_stream(0);
        push_all(
            &buffer,
            vec![audio_frame(0, 0), audio_frame(0, 20), audio_frame(0, 40)],
        );
        buffer.mark_stream_closed(0);

        let (report, received) = run_closed(buffer, config(1, 200), Some(0), 16);
        assert_eq!(report.outcome, SchedulerOutcome::Completed);
        assert_eq!(report.delivered, 3);
        assert_eq!(report.dropped_late, 0);
        let pts: Vec<i64> = received.iter().map(|f| f.pts).collect();
        assert_eq!(pts, vec![0, 20, 40]);
    }

    #[test]
    fn paces_delivery_against_anchor() {
        let buffer = Arc::new(FrameBuffer::new(BufferCapacity::Frames(64)));
        buffer.register_stream(0);
        push_all(&buffer, vec![audio_frame(0, 0), audio_frame(0, 120)]);
        buffer.mark_stream_closed(0);

        let started = Instant::now();
        let (report, received) = run_closed(buffer, config(1, 200), Some(0), 16);
        let elapsed = started.elapsed();

        assert_eq!(report.delivered, 2);
        assert_eq!(received[1].pts, 120);
        // 第二帧不得早于锚定后 120ms 投递（留出睡眠粒度余量）
        assert!(
            elapsed >= Duration::from_millis(100),
            "投递过早: {:?}",
            elapsed
        );
    }

    #[test]
    fn drops_late_video_but_never_audio() {
        let buffer = Arc::new(FrameBuffer::new(BufferCapacity::Frames(64)));
        buffer.register_stream(0);
        buffer.register_stream(1);
        // 音频首帧 PTS=1000 锚定时钟，其后的 PTS=700 帧相当于迟到 300ms
        push_all(
            &buffer,
            vec![
                audio_frame(0, 1000),
                video_frame(1, 700),
                audio_frame(0, 700),
                video_frame(1, 1000),
            ],
        );
        buffer.mark_stream_closed(0);
        buffer.mark_stream_closed(1);

        let (report, received) = run_closed(buffer, config(1, 200), Some(0), 16);
        assert_eq!(report.dropped_late, 1);
        assert_eq!(report.delivered, 3);
        // 迟到的视频帧未投递，迟到的音频帧照常投递
        assert!(!received
            .iter()
            .any(|f| f.kind() == MediaKind::Video && f.pts == 700));
        assert!(received
            .iter()
            .any(|f| f.kind() == MediaKind::Audio && f.pts == 700));
    }

    #[test]
    fn non_master_frames_before_anchor_go_out_unpaced() {
        let buffer = Arc::new(FrameBuffer::new(BufferCapacity::Frames(64)));
        buffer.register_stream(0);
        buffer.register_stream(1);
        // 视频帧先出队，但主时钟流是音频 #0
        push_all(
            &buffer,
            vec![
                video_frame(1, 5_000),
                audio_frame(0, 0),
                audio_frame(0, 20),
            ],
        );
        buffer.mark_stream_closed(0);
        buffer.mark_stream_closed(1);

        let started = Instant::now();
        let (report, received) = run_closed(buffer, config(1, 200), Some(0), 16);
        // PTS=5000 的视频帧在锚定前立即投递，整体耗时远小于 5 秒
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(report.delivered, 3);
        assert_eq!(received[0].pts, 5_000);
    }

    #[test]
    fn short_input_below_watermark_still_plays_out() {
        let buffer = Arc::new(FrameBuffer::new(BufferCapacity::Frames(64)));
        buffer.register_stream(0);
        // 只有 3 帧，永远到不了低水位 4；流已结束就该直接开播
        push_all(
            &buffer,
            vec![audio_frame(0, 0), audio_frame(0, 20), audio_frame(0, 40)],
        );
        buffer.mark_stream_closed(0);

        let (report, received) = run_closed(buffer, config(4, 200), Some(0), 16);
        assert_eq!(report.outcome, SchedulerOutcome::Completed);
        assert_eq!(report.delivered, 3);
        assert_eq!(received.len(), 3);
    }

    #[test]
    fn waits_for_low_watermark_before_streaming() {
        let buffer = Arc::new(FrameBuffer::new(BufferCapacity::Frames(64)));
        buffer.register_stream(0);
        let (sink, rx) = ChannelSink::bounded(16);
        let clock = PlaybackClock::new();
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let buffer = buffer.clone();
            let running = running.clone();
            thread::spawn(move || {
                run_scheduler(buffer, Box::new(sink), clock, config(4, 200), Some(0), running)
            })
        };

        // 低于水位时不投递
        push_all(&buffer, vec![audio_frame(0, 0), audio_frame(0, 20)]);
        thread::sleep(Duration::from_millis(50));
        assert!(rx.try_recv().is_err(), "未达低水位不应投递");

        push_all(&buffer, vec![audio_frame(0, 40), audio_frame(0, 60)]);
        buffer.mark_stream_closed(0);
        let report = handle.join().unwrap();
        assert_eq!(report.delivered, 4);
    }

    #[test]
    fn cancellation_stops_quickly_and_clears_buffer() {
        let buffer = Arc::new(FrameBuffer::new(BufferCapacity::Frames(64)));
        buffer.register_stream(0);
        // 远未来的帧让调度器睡在配速点上
        push_all(
            &buffer,
            vec![audio_frame(0, 0), audio_frame(0, 60_000)],
        );

        let (sink, _rx) = ChannelSink::bounded(16);
        let clock = PlaybackClock::new();
        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let buffer = buffer.clone();
            let running = running.clone();
            thread::spawn(move || {
                run_scheduler(buffer, Box::new(sink), clock, config(1, 200), Some(0), running)
            })
        };

        thread::sleep(Duration::from_millis(40));
        running.store(false, Ordering::SeqCst);
        let started = Instant::now();
        let report = handle.join().unwrap();
        // 一个调度切片内退出，且缓冲无残留
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(report.outcome, SchedulerOutcome::Cancelled);
        assert_eq!(buffer.stats().total_frames, 0);
    }

    #[test]
    fn sink_stopped_ends_the_run() {
        let buffer = Arc::new(FrameBuffer::new(BufferCapacity::Frames(64)));
        buffer.register_stream(0);
        push_all(&buffer, vec![audio_frame(0, 0), audio_frame(0, 20)]);
        buffer.mark_stream_closed(0);

        let (sink, rx) = ChannelSink::bounded(16);
        drop(rx); // 渲染端直接退出
        let clock = PlaybackClock::new();
        let running = Arc::new(AtomicBool::new(true));
        let report = run_scheduler(
            buffer,
            Box::new(sink),
            clock,
            config(1, 200),
            Some(0),
            running,
        );
        assert_eq!(report.outcome, SchedulerOutcome::SinkStopped);
    }

    #[test]
    fn drain_yields_exactly_n_outcomes() {
        let buffer = Arc::new(FrameBuffer::new(BufferCapacity::Frames(64)));
        buffer.register_stream(0);
        buffer.register_stream(1);
        let mut frames = Vec::new();
        // 音频锚定在 2000，让一半视频帧显得迟到
        frames.push(audio_frame(0, 2000));
        for i in 0..5 {
            frames.push(video_frame(1, i * 100)); // 0..400 全部迟到
        }
        for i in 0..6 {
            frames.push(audio_frame(0, 2000 + i * 20));
        }
        let n = frames.len() as u64;
        push_all(&buffer, frames);
        buffer.mark_stream_closed(0);
        buffer.mark_stream_closed(1);

        let (report, received) = run_closed(buffer, config(1, 200), Some(0), 64);
        assert_eq!(report.delivered + report.dropped_late, n);
        assert_eq!(report.delivered, received.len() as u64);
        assert_eq!(report.dropped_late, 5);
    }
}
