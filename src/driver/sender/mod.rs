//! RTP packetization for outgoing media.

mod audio;
mod video;

pub(crate) use audio::OpusRtpSender;
pub(crate) use video::VideoRtpSender;
