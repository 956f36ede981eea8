//! Frame extraction: video payload in, ordered base64 JPEG frames out.

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use ffmpeg::util::frame::video::Video;
use ffmpeg_next::{self as ffmpeg, codec, decoder, format, media, software};
use image::codecs::jpeg;
use image::RgbImage;
use tracing::debug;

use crate::error::NarratorError;

pub(crate) const JPEG_QUALITY: u8 = 95;

static INIT: OnceLock<Result<(), ffmpeg::Error>> = OnceLock::new();

pub(crate) fn init() -> Result<(), NarratorError> {
    (*INIT.get_or_init(ffmpeg::init)).map_err(NarratorError::from)
}

/// A single video frame, JPEG-encoded and held as base64 text.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct EncodedFrame(String);

impl EncodedFrame {
    pub(crate) fn from_jpeg(jpeg_data: &[u8]) -> Self {
        Self(BASE64_STANDARD.encode(jpeg_data))
    }

    pub(crate) fn as_base64(&self) -> &str {
        &self.0
    }

    /// Recovers the JPEG bytes this frame was built from.
    pub(crate) fn decode(&self) -> Result<Vec<u8>, NarratorError> {
        Ok(BASE64_STANDARD.decode(&self.0)?)
    }

    pub(crate) fn data_url(&self) -> String {
        "data:image/jpeg;base64,".to_owned() + self.as_base64()
    }
}

impl fmt::Debug for EncodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EncodedFrame")
            .field(&format_args!("{} base64 chars", self.0.len()))
            .finish()
    }
}

/// Result of decoding one upload.
#[derive(Debug)]
pub(crate) struct Extraction {
    pub(crate) frames: Vec<EncodedFrame>,
    /// Set when decoding stopped early; holds the decoder's complaint.
    pub(crate) truncated: Option<String>,
}

/// Writes `payload` to a scoped temporary `.mp4` file and decodes it.
///
/// The temporary file is removed when this returns, whether decoding
/// succeeded or not.
pub(crate) fn extract_frames(payload: &[u8]) -> Result<Extraction, NarratorError> {
    let mut temp_file = tempfile::Builder::new()
        .prefix("voiceover-")
        .suffix(".mp4")
        .tempfile()?;
    temp_file.write_all(payload)?;
    temp_file.flush()?;
    debug!(path = %temp_file.path().display(), bytes = payload.len(), "wrote upload to temp file");

    capture_base64(temp_file.path())
}

pub(crate) fn capture_base64(input_path: &Path) -> Result<Extraction, NarratorError> {
    init()?;

    let mut input = format::input(&input_path).map_err(|err| NarratorError::Open {
        path: input_path.to_path_buf(),
        reason: err.to_string(),
    })?;

    let video_stream = input
        .streams()
        .best(media::Type::Video)
        .ok_or(NarratorError::NoVideoStream)?;
    let video_stream_index = video_stream.index();
    let decoder = codec::context::Context::from_parameters(video_stream.parameters())?
        .decoder()
        .video()?;

    let scaler = software::scaling::context::Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        format::Pixel::RGB24,
        decoder.width(),
        decoder.height(),
        software::scaling::Flags::BILINEAR,
    )?;

    let mut jpeg_decoder = JpegFrameDecoder { decoder, scaler };
    let packets = input
        .packets()
        .filter(|(stream, _)| stream.index() == video_stream_index)
        .map(|(_, packet)| packet);
    let extraction = decode_packets(&mut jpeg_decoder, packets)?;

    debug!(
        decoded = extraction.frames.len(),
        truncated = extraction.truncated.is_some(),
        "decoding finished"
    );
    Ok(extraction)
}

/// One step of the decode loop: packets in, encoded frames out.
trait PacketDecoder {
    type Packet;

    fn send_packet(&mut self, packet: &Self::Packet) -> Result<(), ffmpeg::Error>;
    fn send_eof(&mut self) -> Result<(), ffmpeg::Error>;
    fn receive_frames(&mut self, frames: &mut Vec<EncodedFrame>) -> Result<(), NarratorError>;
}

/// Runs `packets` through `decoder` until they run out or the decoder
/// refuses one. A refusal keeps the frames decoded so far and records why.
fn decode_packets<D: PacketDecoder>(
    decoder: &mut D,
    packets: impl IntoIterator<Item = D::Packet>,
) -> Result<Extraction, NarratorError> {
    let mut frames = Vec::new();

    for packet in packets {
        if let Err(err) = decoder.send_packet(&packet) {
            return Ok(Extraction {
                frames,
                truncated: Some(err.to_string()),
            });
        }
        decoder.receive_frames(&mut frames)?;
    }

    let truncated = match decoder.send_eof() {
        Ok(()) => {
            decoder.receive_frames(&mut frames)?;
            None
        }
        Err(err) => Some(err.to_string()),
    };
    Ok(Extraction { frames, truncated })
}

struct JpegFrameDecoder {
    decoder: decoder::Video,
    scaler: software::scaling::context::Context,
}

impl PacketDecoder for JpegFrameDecoder {
    type Packet = ffmpeg::Packet;

    fn send_packet(&mut self, packet: &ffmpeg::Packet) -> Result<(), ffmpeg::Error> {
        self.decoder.send_packet(packet)
    }

    fn send_eof(&mut self) -> Result<(), ffmpeg::Error> {
        self.decoder.send_eof()
    }

    fn receive_frames(&mut self, frames: &mut Vec<EncodedFrame>) -> Result<(), NarratorError> {
        let mut decoded = Video::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let mut rgb_frame = Video::empty();
            self.scaler.run(&decoded, &mut rgb_frame)?;

            let pixels = packed_rgb(
                rgb_frame.data(0),
                rgb_frame.stride(0),
                rgb_frame.width(),
                rgb_frame.height(),
            );
            let image_buffer = RgbImage::from_raw(rgb_frame.width(), rgb_frame.height(), pixels)
                .ok_or_else(|| NarratorError::Ffmpeg(ffmpeg::Error::InvalidData))?;

            frames.push(EncodedFrame::from_jpeg(&encode_jpeg(&image_buffer)?));
        }
        Ok(())
    }
}

/// Drops the per-row padding FFmpeg leaves after each line of RGB24 data.
fn packed_rgb(data: &[u8], stride: usize, width: u32, height: u32) -> Vec<u8> {
    let row_len = width as usize * 3;
    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for row in data.chunks(stride).take(height as usize) {
        pixels.extend_from_slice(&row[..row_len.min(row.len())]);
    }
    pixels
}

pub(crate) fn encode_jpeg(image_buffer: &RgbImage) -> Result<Vec<u8>, NarratorError> {
    let mut jpeg_data = Vec::new();
    let mut encoder = jpeg::JpegEncoder::new_with_quality(&mut jpeg_data, JPEG_QUALITY);
    encoder.encode(
        image_buffer,
        image_buffer.width(),
        image_buffer.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(jpeg_data)
}
