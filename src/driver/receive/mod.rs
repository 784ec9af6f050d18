//! Reassembly of incoming media substreams.

mod video;

pub(crate) use video::VideoRtpReceiver;
