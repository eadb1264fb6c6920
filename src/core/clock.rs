use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// 播放时钟 - 用于音视频同步
///
/// 一轮播放内只锚定一次：主时钟流的首帧 PTS 与当时的墙钟时刻
/// 构成基准，此后 `now()` 按墙钟（乘以播放速率）推进。
#[derive(Clone)]
pub struct PlaybackClock {
    inner: Arc<Mutex<ClockInner>>,
}

struct ClockInner {
    anchored: bool,
    base_pts: i64,              // 基准 PTS（毫秒）
    base_instant: Instant,      // 基准时刻
    playback_rate: f64,         // 播放速率（1.0 = 正常）
    paused: bool,
    paused_at: i64,             // 暂停时的位置
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                anchored: false,
                base_pts: 0,
                base_instant: Instant::now(),
                playback_rate: 1.0,
                paused: false,
                paused_at: 0,
            })),
        }
    }

    /// 以首帧 PTS 锚定时钟；仅第一次调用生效，返回是否完成了锚定
    pub fn try_anchor(&self, pts: i64) -> bool {
        let mut inner = self.inner.lock();
        if inner.anchored {
            return false;
        }
        inner.anchored = true;
        inner.base_pts = pts;
        inner.base_instant = Instant::now();
        inner.paused_at = pts;
        true
    }

    pub fn is_anchored(&self) -> bool {
        self.inner.lock().anchored
    }

    /// 获取当前播放时间（毫秒）
    pub fn now(&self) -> i64 {
        let inner = self.inner.lock();
        Self::now_locked(&inner)
    }

    /// 暂停：冻结 `now()`
    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if !inner.paused {
            inner.paused_at = Self::now_locked(&inner);
            inner.paused = true;
        }
    }

    /// 恢复播放：从暂停位置重新基准化
    pub fn resume(&self) {
        let mut inner = self.inner.lock();
        if inner.paused {
            inner.base_pts = inner.paused_at;
            inner.base_instant = Instant::now();
            inner.paused = false;
        }
    }

    /// 设置播放速率
    pub fn set_rate(&self, rate: f64) {
        let mut inner = self.inner.lock();
        if !inner.paused {
            let current_time = Self::now_locked(&inner);
            inner.base_pts = current_time;
            inner.base_instant = Instant::now();
        }
        inner.playback_rate = rate;
    }

    /// 是否暂停
    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    fn now_locked(inner: &ClockInner) -> i64 {
        if inner.paused {
            inner.paused_at
        } else {
            let elapsed = inner.base_instant.elapsed().as_millis() as i64;
            inner.base_pts + (elapsed as f64 * inner.playback_rate) as i64
        }
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}
