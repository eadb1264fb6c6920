use crate::core::{PlayerError, StreamFailure};
use crate::engine::MediaSource;
use crate::player::decode_context::DecodeContext;
use crate::player::frame_buffer::FrameBuffer;
use log::{debug, error, info};
use std::collections::BTreeMap;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

/// demux 循环的结束方式
#[derive(Debug)]
pub enum DemuxOutcome {
    /// 源读到 EOF 并完成冲刷
    Completed,
    /// 取消信号终止
    Cancelled,
    /// 非 EOF 的读取错误终止；已入缓冲的帧仍然有效
    Failed(PlayerError),
}

/// demux 循环运行报告
#[derive(Debug)]
pub struct DemuxReport {
    pub packets_read: u64,
    /// 未入选流或已关闭流的包，读到即弃
    pub packets_discarded: u64,
    pub frames_produced: u64,
    /// 各流的硬解码失败聚合；不中断其余流
    pub failures: Vec<StreamFailure>,
    pub outcome: DemuxOutcome,
}

/// Demux 循环（在独立线程中运行）
///
/// 状态机：Reading → Routing → Reading …，出口为 EOF / IOError / Cancelled。
/// 每次 Reading 前检查取消信号；取消与 EOF 同样走冲刷路径，
/// 只是冲刷内部的入缓冲重试会立即观察到取消而提前收手。
pub fn run_demux_loop(
    mut source: Box<dyn MediaSource>,
    mut contexts: BTreeMap<usize, DecodeContext>,
    buffer: Arc<FrameBuffer>,
    running: Arc<AtomicBool>,
) -> DemuxReport {
    info!("{} 🎬 Demux 线程启动: {}", log_ctx(), source.description());

    let mut packets_read: u64 = 0;
    let mut packets_discarded: u64 = 0;
    let mut failures: Vec<StreamFailure> = Vec::new();

    const LOG_FIRST_N: u64 = 5;

    let outcome = loop {
        // ========== 取消检查（每次读取前） ==========
        if !running.load(Ordering::SeqCst) {
            info!("{} ⏹ Demux 循环收到取消信号", log_ctx());
            flush_all(&mut contexts, &buffer, &running, &mut failures);
            break DemuxOutcome::Cancelled;
        }

        // ========== Reading ==========
        match source.read_packet() {
            Ok(Some(packet)) => {
                packets_read += 1;
                if packets_read <= LOG_FIRST_N || packets_read % 100 == 0 {
                    debug!(
                        "{} 📦 读取数据包 #{}（流 #{}）",
                        log_ctx(),
                        packets_read,
                        packet.stream_index
                    );
                }

                // ========== Routing ==========
                let Some(ctx) = contexts.get_mut(&packet.stream_index) else {
                    // 未入选的流：直接丢弃
                    packets_discarded += 1;
                    continue;
                };
                if ctx.is_closed() {
                    packets_discarded += 1;
                    continue;
                }

                match ctx.send_packet(&packet, &buffer, &running) {
                    Ok(()) => {}
                    Err(PlayerError::Cancelled) => {
                        info!("{} ⏹ 入缓冲重试期间收到取消信号", log_ctx());
                        flush_all(&mut contexts, &buffer, &running, &mut failures);
                        break DemuxOutcome::Cancelled;
                    }
                    Err(e) => {
                        // 硬解码错误：只关闭这条流，其余流继续
                        error!(
                            "{} ❌ 流 #{} 解码失败: {}",
                            log_ctx(),
                            packet.stream_index,
                            e
                        );
                        let kind = ctx.descriptor().kind;
                        ctx.close(&buffer);
                        failures.push(StreamFailure {
                            stream_index: packet.stream_index,
                            kind,
                            error: e,
                        });
                    }
                }
            }
            Ok(None) => {
                // ========== EOF：冲刷全部解码上下文 ==========
                info!("{} 📄 源到达末尾，冲刷全部解码上下文", log_ctx());
                flush_all(&mut contexts, &buffer, &running, &mut failures);
                break DemuxOutcome::Completed;
            }
            Err(e) => {
                error!("{} ❌ 读取数据包失败: {}", log_ctx(), e);
                // 不冲刷，但要关闭全部上下文，调度器才能在消费完后收尾
                for ctx in contexts.values_mut() {
                    ctx.close(&buffer);
                }
                break DemuxOutcome::Failed(e);
            }
        }
    };

    let frames_produced: u64 = contexts.values().map(|c| c.frames_produced()).sum();
    info!(
        "{} 🛑 Demux 线程退出（读包 {}，弃包 {}，产帧 {}，失败流 {}）",
        log_ctx(),
        packets_read,
        packets_discarded,
        frames_produced,
        failures.len()
    );

    DemuxReport {
        packets_read,
        packets_discarded,
        frames_produced,
        failures,
        outcome,
    }
}

/// 对所有未关闭的上下文送冲刷标记并榨干尾部帧
fn flush_all(
    contexts: &mut BTreeMap<usize, DecodeContext>,
    buffer: &FrameBuffer,
    running: &AtomicBool,
    failures: &mut Vec<StreamFailure>,
) {
    for (&index, ctx) in contexts.iter_mut() {
        if ctx.is_closed() {
            continue;
        }
        match ctx.flush(buffer, running) {
            Ok(()) => {}
            Err(PlayerError::Cancelled) => {
                debug!("{} 流 #{} 冲刷被取消中止", log_ctx(), index);
            }
            Err(e) => {
                let kind = ctx.descriptor().kind;
                failures.push(StreamFailure {
                    stream_index: index,
                    kind,
                    error: e,
                });
            }
        }
    }
}
