//! Fixtures shared by the unit tests: a synthetic video clip and an
//! in-process stand-in for the OpenAI endpoints.

use std::convert::Infallible;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use ffmpeg::util::frame::video::Video;
use ffmpeg_next::{self as ffmpeg, codec, encoder, format, Packet, Rational};
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::capture;

pub(crate) const CLIP_WIDTH: u32 = 64;
pub(crate) const CLIP_HEIGHT: u32 = 48;

/// Encodes `frame_count` flat grey MPEG-4 frames at `fps` into `path`.
///
/// Returns `Ok(false)` when this FFmpeg build has no MPEG-4 encoder, so
/// callers can skip.
pub(crate) fn write_test_clip(path: &Path, frame_count: i64, fps: i32) -> anyhow::Result<bool> {
    capture::init()?;
    let Some(codec) = encoder::find(codec::Id::MPEG4) else {
        return Ok(false);
    };

    let mut output = format::output(&path)?;
    let global_header = output
        .format()
        .flags()
        .contains(format::Flags::GLOBAL_HEADER);

    let time_base = Rational(1, fps);
    let mut encoder = codec::context::Context::new_with_codec(codec)
        .encoder()
        .video()?;
    encoder.set_width(CLIP_WIDTH);
    encoder.set_height(CLIP_HEIGHT);
    encoder.set_format(format::Pixel::YUV420P);
    encoder.set_time_base(time_base);
    encoder.set_frame_rate(Some(Rational(fps, 1)));
    if global_header {
        encoder.set_flags(codec::Flags::GLOBAL_HEADER);
    }
    let mut encoder = encoder.open_as(codec)?;

    {
        let mut output_stream = output.add_stream(codec)?;
        output_stream.set_parameters(&encoder);
        output_stream.set_time_base(time_base);
    }
    output.write_header()?;
    let stream_time_base = output
        .stream(0)
        .ok_or(anyhow::anyhow!(ffmpeg::Error::StreamNotFound))?
        .time_base();

    for index in 0..frame_count {
        let mut frame = Video::new(format::Pixel::YUV420P, CLIP_WIDTH, CLIP_HEIGHT);
        frame.data_mut(0).fill((index * 2 % 256) as u8);
        frame.data_mut(1).fill(128);
        frame.data_mut(2).fill(128);
        frame.set_pts(Some(index));
        encoder.send_frame(&frame)?;
        write_packets(&mut encoder, &mut output, time_base, stream_time_base)?;
    }
    encoder.send_eof()?;
    write_packets(&mut encoder, &mut output, time_base, stream_time_base)?;
    output.write_trailer()?;

    Ok(true)
}

fn write_packets(
    encoder: &mut encoder::Video,
    output: &mut format::context::Output,
    encoder_time_base: Rational,
    stream_time_base: Rational,
) -> anyhow::Result<()> {
    let mut packet = Packet::empty();
    while encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(0);
        packet.rescale_ts(encoder_time_base, stream_time_base);
        packet.write_interleaved(output)?;
    }
    Ok(())
}

pub(crate) struct MockServer {
    /// API base to hand to the client, including the `/v1` prefix.
    pub(crate) base: String,
    handle: JoinHandle<()>,
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub(crate) async fn serve(router: Router) -> MockServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("mock server address");
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("mock server");
    });
    MockServer {
        base: format!("http://{addr}/v1"),
        handle,
    }
}

pub(crate) type SeenRequests = Arc<Mutex<Vec<(Option<String>, Value)>>>;

/// `/audio/speech` answering 200 with `payload`, recording the
/// `Authorization` header and JSON body of each request.
pub(crate) fn speech_ok(payload: Vec<u8>, seen: SeenRequests) -> Router {
    Router::new().route(
        "/v1/audio/speech",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let payload = payload.clone();
            let seen = seen.clone();
            async move {
                let authorization = headers
                    .get(header::AUTHORIZATION)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned);
                seen.lock().unwrap().push((authorization, body));
                ([(header::CONTENT_TYPE, "audio/mpeg")], payload)
            }
        }),
    )
}

/// Every path answers `status` with an OpenAI-style error body.
pub(crate) fn reject_all(status: StatusCode) -> Router {
    Router::new().fallback(move || async move {
        let body = json!({
            "error": {
                "message": "Incorrect API key provided: sk-test.",
                "type": "invalid_request_error",
                "param": null,
                "code": "invalid_api_key"
            }
        });
        (status, Json(body))
    })
}

/// Every path answers 429, counting how often it was asked.
pub(crate) fn rate_limited(hits: Arc<AtomicUsize>) -> Router {
    Router::new().fallback(move || {
        let hits = hits.clone();
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            let body = json!({
                "error": {
                    "message": "Rate limit reached for requests.",
                    "type": "requests",
                    "param": null,
                    "code": "rate_limit_exceeded"
                }
            });
            (StatusCode::TOO_MANY_REQUESTS, Json(body))
        }
    })
}

fn chunk_event(fragment: &str) -> String {
    let chunk = json!({
        "id": "chatcmpl-test",
        "object": "chat.completion.chunk",
        "created": 1_700_000_000,
        "model": "gpt-4o",
        "choices": [{
            "index": 0,
            "delta": { "content": fragment },
            "finish_reason": null
        }]
    });
    format!("data: {chunk}\n\n")
}

/// `/chat/completions` streaming `fragments` as server-sent events.
pub(crate) fn chat_stream(fragments: Vec<&'static str>) -> Router {
    let mut events: String = fragments.into_iter().map(chunk_event).collect();
    events.push_str("data: [DONE]\n\n");

    Router::new().route(
        "/v1/chat/completions",
        post(move || {
            let events = events.clone();
            async move { ([(header::CONTENT_TYPE, "text/event-stream")], events) }
        }),
    )
}

/// `/chat/completions` sending one fragment, then holding the connection
/// open without sending anything more.
pub(crate) fn chat_stream_stalling_after(fragment: &'static str) -> Router {
    Router::new().route(
        "/v1/chat/completions",
        post(move || async move {
            let events = stream::once(async move { Ok::<_, Infallible>(chunk_event(fragment)) })
                .chain(stream::pending());
            (
                [(header::CONTENT_TYPE, "text/event-stream")],
                Body::from_stream(events),
            )
        }),
    )
}
