use log::{debug, trace};
use parking_lot::RwLock;
use std::sync::Arc;

use super::events::{Event, EventQueue};
use crate::av::{AudioCodec, AudioParams, MediaClock, MediaFrame, VideoCodec, VideoParams};
use crate::format::rtsp::{RtspClient, RtspServer};

#[derive(Clone)]
pub(crate) enum Route {
    Client(Arc<RtspClient>),
    Server(Arc<RtspServer>),
}

/// Where encoder output goes right now. Frames take this path directly so
/// the producer never waits on the controller.
#[derive(Default)]
pub(crate) struct FrameRouter {
    route: RwLock<Option<(u64, Route)>>,
}

impl FrameRouter {
    pub(crate) fn set(&self, stream: u64, route: Route) {
        *self.route.write() = Some((stream, route));
    }

    pub(crate) fn clear(&self) {
        self.route.write().take();
    }

    fn on_frame(&self, stream: u64, frame: MediaFrame) {
        match &*self.route.read() {
            Some((current, Route::Client(client))) if *current == stream => {
                client.enqueue_frame(frame);
            }
            Some((current, Route::Server(server))) if *current == stream => server.on_frame(frame),
            _ => {
                trace!("FrameRouter: no route for stream {}, releasing", stream);
                frame.release();
            }
        }
    }

    fn on_video_params(&self, stream: u64, params: &VideoParams) {
        match &*self.route.read() {
            Some((current, Route::Client(client))) if *current == stream => client.set_video_params(params.clone()),
            Some((current, Route::Server(server))) if *current == stream => server.set_video_params(params.clone()),
            _ => {}
        }
    }

    fn on_audio_params(&self, stream: u64, params: &AudioParams) {
        match &*self.route.read() {
            Some((current, Route::Client(client))) if *current == stream => {
                if let Err(e) = client.set_audio_params(*params) {
                    debug!("FrameRouter: audio params not applied: {}", e);
                }
            }
            Some((current, Route::Server(server))) if *current == stream => server.set_audio_params(Some(*params)),
            _ => {}
        }
    }
}

/// Handed to encoders at creation; everything they report goes through it.
///
/// Output of an encoder from a stopped stream is dropped here and its
/// frames are released.
#[derive(Clone)]
pub struct MediaSink {
    router: Arc<FrameRouter>,
    queue: Arc<EventQueue>,
    stream: u64,
    clock: MediaClock,
    video_codec: VideoCodec,
    audio_codec: Option<AudioCodec>,
}

impl MediaSink {
    pub(crate) fn new(
        router: Arc<FrameRouter>,
        queue: Arc<EventQueue>,
        stream: u64,
        clock: MediaClock,
        video_codec: VideoCodec,
        audio_codec: Option<AudioCodec>,
    ) -> Self {
        Self {
            router,
            queue,
            stream,
            clock,
            video_codec,
            audio_codec,
        }
    }

    /// Clock frame timestamps are taken from; reset at every stream start.
    pub fn clock(&self) -> &MediaClock {
        &self.clock
    }

    pub fn on_video_params(&self, sps: &[u8], pps: Option<&[u8]>, vps: Option<&[u8]>) {
        let params = VideoParams::new(self.video_codec, sps, pps, vps);
        self.router.on_video_params(self.stream, &params);
        self.queue.push(Event::VideoParams {
            stream: self.stream,
            params,
        });
    }

    pub fn on_audio_params(&self, sample_rate: u32, is_stereo: bool) {
        let codec = match self.audio_codec {
            Some(codec) => codec,
            None => return,
        };
        let params = AudioParams {
            codec,
            sample_rate,
            is_stereo,
        };
        self.router.on_audio_params(self.stream, &params);
        self.queue.push(Event::AudioParams {
            stream: self.stream,
            params,
        });
    }

    pub fn on_frame(&self, frame: MediaFrame) {
        self.router.on_frame(self.stream, frame);
    }

    pub fn on_error(&self, message: &str) {
        self.queue.push(Event::EncoderError {
            stream: self.stream,
            message: message.to_string(),
        });
    }

    /// Audio capture failed; video keeps going.
    pub fn on_audio_capture_error(&self, cause: &str) {
        self.queue.push(Event::AudioCaptureError {
            stream: self.stream,
            cause: cause.to_string(),
        });
    }
}
