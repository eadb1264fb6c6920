use crate::core::{MediaKind, PlayerError, Result, StreamDescriptor};
use crate::engine::{DecoderFactory, MediaSource};
use crate::player::decode_context::DecodeContext;
use log::{info, warn};
use std::collections::BTreeMap;

/// 选流方式
#[derive(Debug, Clone)]
pub enum StreamSelection {
    /// 每种媒体类型选一条最优流；缺失的类型只是跳过，不算错误
    BestPerKind(Vec<MediaKind>),
    /// 显式流索引列表；索引越界是致命错误
    Explicit(Vec<usize>),
}

impl StreamSelection {
    /// 默认选法：音频 + 视频 + 字幕各取最优一条
    pub fn default_av() -> Self {
        StreamSelection::BestPerKind(vec![
            MediaKind::Audio,
            MediaKind::Video,
            MediaKind::Subtitle,
        ])
    }
}

/// 按选流方式为每条入选流创建解码上下文
///
/// 返回 流索引 → DecodeContext 的映射（BTreeMap 保证遍历有序）。
pub fn select_streams(
    source: &dyn MediaSource,
    selection: &StreamSelection,
    factory: &dyn DecoderFactory,
) -> Result<BTreeMap<usize, DecodeContext>> {
    let streams = source.streams();
    let mut picked: Vec<usize> = Vec::new();

    match selection {
        StreamSelection::BestPerKind(kinds) => {
            for kind in kinds {
                match best_stream(streams, *kind) {
                    Some(index) => picked.push(index),
                    None => info!("未找到{}流，跳过", kind),
                }
            }
            if picked.is_empty() {
                let wanted = kinds.first().copied().unwrap_or(MediaKind::Unknown);
                return Err(PlayerError::StreamNotFound(wanted));
            }
        }
        StreamSelection::Explicit(indices) => {
            for &index in indices {
                if index >= streams.len() {
                    return Err(PlayerError::BadParameter(format!(
                        "流索引越界: {}（源共 {} 条流）",
                        index,
                        streams.len()
                    )));
                }
                picked.push(index);
            }
            if picked.is_empty() {
                return Err(PlayerError::BadParameter("显式选流列表为空".to_string()));
            }
        }
    }

    picked.sort_unstable();
    picked.dedup();

    let mut contexts = BTreeMap::new();
    for index in picked {
        let descriptor = &streams[index];
        if descriptor.kind == MediaKind::Unknown {
            warn!("流 #{} 类型未知，仍尝试创建解码器", index);
        }
        let decoder = factory.create(descriptor)?;
        info!(
            "✅ 已选择流 #{}（{}，优选权重 {}）",
            index, descriptor.kind, descriptor.preference
        );
        contexts.insert(index, DecodeContext::new(descriptor.clone(), decoder));
    }
    Ok(contexts)
}

/// 某一类型的最优流：优选权重最大者，等值时取最小索引
fn best_stream(streams: &[StreamDescriptor], kind: MediaKind) -> Option<usize> {
    streams
        .iter()
        .filter(|s| s.kind == kind)
        .max_by(|a, b| {
            a.preference
                .cmp(&b.preference)
                .then(b.index.cmp(&a.index))
        })
        .map(|s| s.index)
}
