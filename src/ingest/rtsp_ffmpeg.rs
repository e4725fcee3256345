//! RTSP capture using FFmpeg.
//!
//! Used when the GStreamer backend is not compiled in. Low-latency demuxer flags
//! stand in for the appsink buffer cap: with a small buffer depth the demuxer is
//! told not to buffer at all.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use super::{CaptureOptions, StreamProperties};
use crate::frame::Frame;

pub struct FfmpegRtspStream {
    input: Option<ffmpeg::format::context::Input>,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    properties: StreamProperties,
}

impl FfmpegRtspStream {
    pub(crate) fn connect(uri: &str, options: &CaptureOptions) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;

        let mut dict = ffmpeg::Dictionary::new();
        dict.set("rtsp_transport", "tcp");
        dict.set(
            "timeout",
            &(options.read_timeout.as_micros() as u64).to_string(),
        );
        if options.buffer_frames <= 2 {
            dict.set("fflags", "nobuffer");
            dict.set("flags", "low_delay");
        }

        let input = ffmpeg::format::input_with_dictionary(&uri, dict)
            .with_context(|| "failed to open RTSP input with ffmpeg".to_string())?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("stream has no video track"))?;
        let stream_index = input_stream.index();
        let rate = input_stream.avg_frame_rate();
        let codec_id = input_stream.parameters().id();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        if !codec_matches_hint(codec_id, &options.codec_hint) {
            log::warn!(
                "RtspSource: stream codec {:?} does not match hint {}",
                codec_id,
                options.codec_hint
            );
        }

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        let fps = if rate.numerator() > 0 && rate.denominator() > 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            options.fallback_fps
        };

        Ok(Self {
            properties: StreamProperties {
                width: decoder.width(),
                height: decoder.height(),
                fps,
            },
            input: Some(input),
            stream_index,
            decoder,
            scaler,
        })
    }

    pub(crate) fn read(&mut self) -> Result<Option<Frame>> {
        let Some(input) = self.input.as_mut() else {
            return Err(anyhow!("RTSP stream is closed"));
        };

        let mut decoded = ffmpeg::frame::Video::empty();
        let mut rgb_frame = ffmpeg::frame::Video::empty();

        for (stream, packet) in input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }

            self.decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;

            if self.decoder.receive_frame(&mut decoded).is_ok() {
                self.scaler
                    .run(&decoded, &mut rgb_frame)
                    .context("scale frame to RGB")?;
                let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
                return Frame::from_rgb(pixels, width, height).map(Some);
            }
        }

        Ok(None)
    }

    pub(crate) fn properties(&self) -> StreamProperties {
        self.properties
    }

    pub(crate) fn close(&mut self) {
        // Dropping the input context closes the network connection.
        self.input = None;
    }
}

fn codec_matches_hint(id: ffmpeg::codec::Id, hint: &str) -> bool {
    match hint.to_ascii_uppercase().as_str() {
        "H264" | "AVC" => id == ffmpeg::codec::Id::H264,
        "H265" | "HEVC" => id == ffmpeg::codec::Id::HEVC,
        _ => true,
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data
            .get(..len)
            .context("ffmpeg frame is shorter than its dimensions")?
            .to_vec();
        return Ok((pixels, width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
