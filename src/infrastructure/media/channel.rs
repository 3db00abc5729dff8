//! Media channel boundary (MSRP and RTP)
//!
//! The media stacks themselves live outside this crate. Sessions drive them
//! through these traits and receive their events on an unbounded channel.

use crate::infrastructure::protocols::sip::sdp::RtpCodec;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Failed to open media channel: {0}")]
    Open(String),

    #[error("Failed to send media: {0}")]
    Send(String),

    #[error("Content unavailable: {0}")]
    Content(String),

    #[error("No free port in {0}")]
    NoPortAvailable(String),

    #[error("Media channel closed")]
    Closed,
}

impl From<std::io::Error> for MediaError {
    fn from(err: std::io::Error) -> Self {
        MediaError::Content(err.to_string())
    }
}

/// Where the remote media endpoint is
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteMedia {
    Msrp {
        host: String,
        port: u16,
        path: String,
        /// We open the TCP connection (`a=setup:active`)
        active: bool,
    },
    Rtp {
        host: String,
        port: u16,
        codec: RtpCodec,
    },
}

impl fmt::Display for RemoteMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteMedia::Msrp { path, .. } => write!(f, "{}", path),
            RemoteMedia::Rtp { host, port, codec } => {
                write!(f, "rtp://{}:{} ({}/{})", host, port, codec.encoding, codec.clock_rate)
            }
        }
    }
}

/// Event reported by a media channel
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// A complete payload arrived
    DataReceived { data: Bytes, content_type: String },
    /// Everything we sent was acknowledged
    DataTransferred,
    Progress { current: u64, total: u64 },
    /// The peer aborted the transfer
    TransferAborted,
    TransferError(String),
}

pub type MediaEventSink = mpsc::UnboundedSender<MediaEvent>;

/// Byte stream of the content being sent
pub type ContentReader = Box<dyn AsyncRead + Send + Unpin>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaChannel: Send + Sync {
    /// Connect to (or wait for) the remote endpoint; events go to `sink` from now on
    async fn open(&self, remote: RemoteMedia, sink: MediaEventSink) -> Result<(), MediaError>;

    /// Stream content in chunks; completion is reported with `DataTransferred`.
    ///
    /// `total_size` is 0 when the content size is unknown (`MmContent` size
    /// -1 on the SDP side); the channel then reads the stream to its end and
    /// sends the MSRP byte-range total as `*`.
    async fn send_chunks(
        &self,
        reader: ContentReader,
        encoding: String,
        total_size: u64,
    ) -> Result<(), MediaError>;

    /// Send one payload (chat message)
    async fn send_data(&self, data: Bytes, content_type: String) -> Result<(), MediaError>;

    /// Release the channel; calling it again has no effect
    async fn close(&self);
}

/// Creates media channels bound to a local port
#[cfg_attr(test, mockall::automock)]
pub trait MediaFactory: Send + Sync {
    fn create_msrp_channel(&self, local_port: u16, chunk_size: usize) -> Arc<dyn MediaChannel>;

    fn create_rtp_channel(&self, local_port: u16) -> Arc<dyn MediaChannel>;
}
