//! Codec Negotiation
//!
//! Matches the payload formats of a remote RTP offer against the local codec list

use crate::infrastructure::protocols::sip::sdp::RtpCodec;

/// Codec Negotiator
#[derive(Debug, Clone)]
pub struct CodecNegotiator {
    supported_codecs: Vec<RtpCodec>,
}

impl CodecNegotiator {
    pub fn new(supported_codecs: Vec<RtpCodec>) -> Self {
        Self { supported_codecs }
    }

    /// Default video codecs, in preference order
    pub fn video() -> Self {
        Self::new(vec![
            RtpCodec::new(96, "H264", 90000).with_fmtp("profile-level-id=42e00a"),
            RtpCodec::new(97, "H263-2000", 90000).with_fmtp("profile=0;level=10"),
        ])
    }

    pub fn supported_codecs(&self) -> &[RtpCodec] {
        &self.supported_codecs
    }

    /// Negotiate codecs based on offer
    ///
    /// Returns the offered codecs we support, in offer order, keeping the
    /// remote payload type numbers. Dynamic payload types are matched by
    /// encoding name and clock rate, static ones by number.
    pub fn negotiate(&self, offered: &[RtpCodec]) -> Vec<RtpCodec> {
        offered
            .iter()
            .filter(|codec| self.find_codec(codec).is_some())
            .cloned()
            .collect()
    }

    /// Local codec matching an offered one
    pub fn find_codec(&self, offered: &RtpCodec) -> Option<&RtpCodec> {
        self.supported_codecs.iter().find(|local| {
            if offered.encoding.is_empty() {
                offered.payload_type < 96 && local.payload_type == offered.payload_type
            } else {
                local.encoding.eq_ignore_ascii_case(&offered.encoding)
                    && local.clock_rate == offered.clock_rate
            }
        })
    }

    /// Select best codec from negotiated list
    pub fn select_best<'a>(&self, negotiated: &'a [RtpCodec]) -> Option<&'a RtpCodec> {
        negotiated.first()
    }
}

impl Default for CodecNegotiator {
    fn default() -> Self {
        Self::video()
    }
}
