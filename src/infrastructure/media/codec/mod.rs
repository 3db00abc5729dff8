//! Codec negotiation for RTP streaming

pub mod negotiator;

pub use negotiator::CodecNegotiator;
