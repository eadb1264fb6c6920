//! 集成测试共用的引擎桩：脚本化媒体源 + 一包一帧的直通解码器

use playflow::{
    DecodeEvent, DecoderFactory, Frame, FramePayload, MediaKind, MediaSource, Packet, PixelFormat,
    PlayerError, Result, StreamDecoder, StreamDescriptor, StreamParams, Timebase,
};
use std::collections::VecDeque;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn audio_stream(index: usize) -> StreamDescriptor {
    StreamDescriptor {
        index,
        kind: MediaKind::Audio,
        time_base: Timebase::MILLIS,
        preference: 0,
        params: StreamParams::Audio {
            sample_rate: 48_000,
            channels: 2,
        },
    }
}

pub fn video_stream(index: usize) -> StreamDescriptor {
    StreamDescriptor {
        index,
        kind: MediaKind::Video,
        time_base: Timebase::MILLIS,
        preference: 0,
        params: StreamParams::Video {
            width: 320,
            height: 240,
            format: PixelFormat::YUV420P,
        },
    }
}

pub fn packet(stream_index: usize, pts: i64) -> Packet {
    Packet {
        stream_index,
        data: vec![0u8; 16],
        pts,
        dts: pts,
        keyframe: true,
    }
}

/// 照脚本吐包的媒体源；fail_after 指定第几次读取后报错
pub struct ScriptedSource {
    streams: Vec<StreamDescriptor>,
    packets: VecDeque<Packet>,
    fail_after: Option<u64>,
    reads: u64,
}

impl ScriptedSource {
    pub fn new(streams: Vec<StreamDescriptor>, packets: Vec<Packet>) -> Self {
        Self {
            streams,
            packets: packets.into(),
            fail_after: None,
            reads: 0,
        }
    }

    pub fn failing_after(mut self, reads: u64) -> Self {
        self.fail_after = Some(reads);
        self
    }
}

impl MediaSource for ScriptedSource {
    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        if self.fail_after == Some(self.reads) {
            return Err(PlayerError::DemuxError("读取到损坏数据".to_string()));
        }
        self.reads += 1;
        Ok(self.packets.pop_front())
    }

    fn description(&self) -> String {
        format!("scripted://{}包", self.packets.len())
    }
}

/// 一包一帧的直通解码器；fail_on_packet 指定第几个包触发硬解码错误
pub struct PassthroughDecoder {
    kind: MediaKind,
    pending: VecDeque<Frame>,
    flushed: bool,
    received: u64,
    fail_on_packet: Option<u64>,
}

impl PassthroughDecoder {
    fn frame_for(&self, packet: &Packet) -> Frame {
        let payload = match self.kind {
            MediaKind::Video => FramePayload::Video {
                width: 320,
                height: 240,
                format: PixelFormat::YUV420P,
                data: vec![0u8; 64],
            },
            _ => FramePayload::Audio {
                samples: vec![0.0; 32],
                sample_rate: 48_000,
                channels: 2,
            },
        };
        Frame {
            stream_index: packet.stream_index,
            pts: packet.pts,
            duration: 20,
            payload,
        }
    }
}

impl StreamDecoder for PassthroughDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        self.received += 1;
        if self.fail_on_packet == Some(self.received) {
            return Err(PlayerError::DecodeError("比特流损坏".to_string()));
        }
        let frame = self.frame_for(packet);
        self.pending.push_back(frame);
        Ok(())
    }

    fn send_flush(&mut self) -> Result<()> {
        self.flushed = true;
        Ok(())
    }

    fn receive(&mut self) -> Result<DecodeEvent> {
        match self.pending.pop_front() {
            Some(frame) => Ok(DecodeEvent::Frame(frame)),
            None if self.flushed => Ok(DecodeEvent::EndOfStream),
            None => Ok(DecodeEvent::WouldBlock),
        }
    }
}

/// fail_video_on 可让视频流解码器在第 N 个包上失败，音频不受影响
pub struct PassthroughFactory {
    pub fail_video_on: Option<u64>,
}

impl PassthroughFactory {
    pub fn new() -> Self {
        Self {
            fail_video_on: None,
        }
    }
}

impl DecoderFactory for PassthroughFactory {
    fn create(&self, stream: &StreamDescriptor) -> Result<Box<dyn StreamDecoder>> {
        let fail_on_packet = if stream.kind == MediaKind::Video {
            self.fail_video_on
        } else {
            None
        };
        Ok(Box::new(PassthroughDecoder {
            kind: stream.kind,
            pending: VecDeque::new(),
            flushed: false,
            received: 0,
            fail_on_packet,
        }))
    }
}
