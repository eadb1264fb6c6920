use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 媒体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
    Subtitle,
    Data,
    Unknown,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "音频",
            MediaKind::Video => "视频",
            MediaKind::Subtitle => "字幕",
            MediaKind::Data => "数据",
            MediaKind::Unknown => "未知",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 流时间基（有理数：pts × num / den = 秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timebase {
    pub num: u32,
    pub den: u32,
}

impl Timebase {
    /// 缓冲区统一使用的毫秒时间基
    pub const MILLIS: Timebase = Timebase { num: 1, den: 1000 };

    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// 把本时间基下的时间戳换算为毫秒
    pub fn to_millis(&self, ts: i64) -> i64 {
        if self.den == 0 {
            return 0;
        }
        (ts as f64 * self.num as f64 / self.den as f64 * 1000.0) as i64
    }
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
    RGB,
    YUV420P,
    NV12,
}

/// 音频采样格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    F32,
    I16,
}

/// 按媒体类型区分的流参数
#[derive(Debug, Clone)]
pub enum StreamParams {
    Audio {
        sample_rate: u32,
        channels: u16,
    },
    Video {
        width: u32,
        height: u32,
        format: PixelFormat,
    },
    /// 字幕/数据等没有额外参数的流
    None,
}

/// 流描述信息：源打开后固定不变
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    pub index: usize,
    pub kind: MediaKind,
    pub time_base: Timebase,
    /// 源上报的优选权重（越大越优先；等值时取最小索引）
    pub preference: u32,
    pub params: StreamParams,
}

/// 压缩数据包：由 demux 循环产出，被对应流的解码上下文一次性消费
#[derive(Debug, Clone)]
pub struct Packet {
    pub stream_index: usize,
    pub data: Vec<u8>,
    /// 显示时间戳（流时间基）
    pub pts: i64,
    /// 解码时间戳（流时间基）
    pub dts: i64,
    pub keyframe: bool,
}

/// 帧负载
#[derive(Debug, Clone)]
pub enum FramePayload {
    Audio {
        samples: Vec<f32>,
        sample_rate: u32,
        channels: u16,
    },
    Video {
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
    },
    Subtitle {
        text: String,
        /// 结束显示时间戳（毫秒）
        end_pts: i64,
    },
}

/// 解码后的帧
///
/// 入缓冲后 PTS 统一为毫秒；所有权沿
/// 解码上下文 → 帧缓冲 → 调度器 严格转移，没有隐式共享。
#[derive(Debug, Clone)]
pub struct Frame {
    pub stream_index: usize,
    /// 显示时间戳（毫秒）
    pub pts: i64,
    /// 帧持续时间（毫秒）
    pub duration: i64,
    pub payload: FramePayload,
}

impl Frame {
    pub fn kind(&self) -> MediaKind {
        match self.payload {
            FramePayload::Audio { .. } => MediaKind::Audio,
            FramePayload::Video { .. } => MediaKind::Video,
            FramePayload::Subtitle { .. } => MediaKind::Subtitle,
        }
    }
}

/// 帧缓冲容量上限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferCapacity {
    /// 按帧数封顶
    Frames(usize),
    /// 按已缓冲的显示时间跨度封顶（最新入队 PTS − 最早未消费 PTS，毫秒）
    Millis(i64),
}

/// 主时钟流选择策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MasterStreamPolicy {
    /// 优先音频流；选集中没有音频时按首帧锚定
    PreferAudio,
    /// 显式指定流索引
    Explicit(usize),
}

/// 播放配置
///
/// 低水位、迟帧阈值等都是可调参数，默认值只是产品缺省而非硬性要求。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    pub buffer_capacity: BufferCapacity,
    /// 调度器开始投递前要求的最低缓冲帧数
    pub low_watermark: usize,
    /// 视频迟帧丢弃阈值（毫秒）
    pub late_drop_threshold_ms: i64,
    pub master_stream: MasterStreamPolicy,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: BufferCapacity::Frames(64),
            low_watermark: 4,
            late_drop_threshold_ms: 200,
            master_stream: MasterStreamPolicy::PreferAudio,
        }
    }
}

/// 帧缓冲统计快照（用于监控和调度判断）
#[derive(Debug, Clone, Default, Serialize)]
pub struct BufferStats {
    /// 当前缓冲的帧总数
    pub total_frames: usize,
    /// 所有流均已报告结束（不要求缓冲为空，即产出已停止）
    pub all_streams_closed: bool,
    /// 所有流均已关闭且缓冲为空；一旦为 true 不再回退
    pub all_closed: bool,
    /// 各流当前缓冲的帧数
    pub per_stream: BTreeMap<usize, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timebase_rescales_to_millis() {
        // 90kHz 视频时间基
        let tb = Timebase::new(1, 90_000);
        assert_eq!(tb.to_millis(90_000), 1000);
        assert_eq!(tb.to_millis(3_000), 33);
        assert_eq!(Timebase::MILLIS.to_millis(250), 250);
        // 非法时间基不应除零
        assert_eq!(Timebase::new(1, 0).to_millis(42), 0);
    }

    #[test]
    fn config_roundtrips_through_json() {
        let config = PlayerConfig {
            buffer_capacity: BufferCapacity::Millis(1500),
            low_watermark: 8,
            late_drop_threshold_ms: 120,
            master_stream: MasterStreamPolicy::Explicit(3),
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: PlayerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.buffer_capacity, BufferCapacity::Millis(1500));
        assert_eq!(back.low_watermark, 8);
        assert_eq!(back.late_drop_threshold_ms, 120);
        assert_eq!(back.master_stream, MasterStreamPolicy::Explicit(3));
    }

    #[test]
    fn default_config_matches_product_defaults() {
        let config = PlayerConfig::default();
        assert_eq!(config.buffer_capacity, BufferCapacity::Frames(64));
        assert_eq!(config.low_watermark, 4);
        assert_eq!(config.master_stream, MasterStreamPolicy::PreferAudio);
    }
}
