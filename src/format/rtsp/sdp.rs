use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::fmt::Write as _;

use crate::av::{AudioCodec, AudioParams, MediaKind, VideoCodec, VideoParams, VIDEO_CLOCK_RATE};
use crate::codec::{aac, h264};
use crate::format::rtp::VIDEO_PAYLOAD_TYPE;

/// Writes the session description announced to servers and served to players.
#[derive(Debug, Clone)]
pub struct SdpBuilder {
    app_name: String,
    session_id: u32,
}

impl SdpBuilder {
    pub fn new(app_name: &str, session_id: u32) -> Self {
        Self {
            app_name: app_name.to_string(),
            session_id,
        }
    }

    pub fn build(&self, video: &VideoParams, audio: Option<&AudioParams>) -> String {
        let mut sdp = String::new();
        let id = self.session_id;
        let _ = write!(sdp, "v=0\r\n");
        let _ = write!(sdp, "o=- {} {} IN IP4 127.0.0.1\r\n", id, id);
        let _ = write!(sdp, "s={}\r\n", self.app_name);
        let _ = write!(sdp, "i={}\r\n", self.app_name);
        sdp.push_str("c=IN IP4 0.0.0.0\r\n");
        sdp.push_str("t=0 0\r\n");
        sdp.push_str("a=type:broadcast\r\n");
        sdp.push_str("a=control:*\r\n");
        video_media(&mut sdp, video);
        if let Some(audio) = audio {
            audio_media(&mut sdp, audio);
        }
        sdp
    }
}

fn video_media(sdp: &mut String, video: &VideoParams) {
    let pt = VIDEO_PAYLOAD_TYPE;
    let track = MediaKind::Video.track_id();
    let _ = write!(sdp, "m=video 0 RTP/AVP {}\r\n", pt);
    let _ = write!(sdp, "a=rtpmap:{} {}/{}\r\n", pt, video.codec.encoding_name(), VIDEO_CLOCK_RATE);

    let sps = STANDARD.encode(&video.sps);
    let pps = video.pps.as_ref().map(|p| STANDARD.encode(p)).unwrap_or_default();
    match video.codec {
        VideoCodec::H264 => {
            let _ = write!(
                sdp,
                "a=fmtp:{} packetization-mode=1; level-asymmetry-allowed=1; profile-level-id={}; sprop-parameter-sets={},{}\r\n",
                pt,
                h264::profile_level_id(&video.sps),
                sps,
                pps
            );
        }
        VideoCodec::H265 => {
            let vps = video.vps.as_ref().map(|v| STANDARD.encode(v)).unwrap_or_default();
            let parts: Vec<String> = [("sprop-vps", vps), ("sprop-sps", sps), ("sprop-pps", pps)]
                .into_iter()
                .filter(|(_, v)| !v.is_empty())
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            if !parts.is_empty() {
                let _ = write!(sdp, "a=fmtp:{} {}\r\n", pt, parts.join("; "));
            }
        }
        VideoCodec::Av1 => {}
    }
    let _ = write!(sdp, "a=control:trackID={}\r\n", track);
}

fn audio_media(sdp: &mut String, audio: &AudioParams) {
    let pt = audio.codec.payload_type();
    let track = MediaKind::Audio.track_id();
    let _ = write!(sdp, "m=audio 0 RTP/AVP {}\r\n", pt);
    match audio.codec {
        AudioCodec::G711 => {
            let _ = write!(sdp, "a=rtpmap:{} PCMA/8000/1\r\n", pt);
        }
        AudioCodec::Aac => {
            let channels = audio.channels();
            let config = aac::audio_specific_config(audio.sample_rate, channels);
            let _ = write!(sdp, "a=rtpmap:{} mpeg4-generic/{}/{}\r\n", pt, audio.sample_rate, channels);
            let _ = write!(
                sdp,
                "a=fmtp:{} streamtype=5; profile-level-id=16; mode=AAC-hbr; config={:04x}; sizeLength=13; indexLength=3; indexDeltaLength=3; constantDuration=1024\r\n",
                pt, config
            );
        }
        AudioCodec::Opus => {
            let _ = write!(sdp, "a=rtpmap:{} OPUS/48000/2\r\n", pt);
            let _ = write!(
                sdp,
                "a=fmtp:{} sprop-stereo=1; maxplaybackrate=48000; sprop-maxcapturerate=48000\r\n",
                pt
            );
            sdp.push_str("a=ptime:20\r\n");
        }
    }
    let _ = write!(sdp, "a=control:trackID={}\r\n", track);
}
