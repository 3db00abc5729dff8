//! Media boundary: channels, content access, ports and codec negotiation

pub mod channel;
pub mod codec;
pub mod content;
pub mod ports;

pub use channel::{
    ContentReader, MediaChannel, MediaError, MediaEvent, MediaEventSink, MediaFactory, RemoteMedia,
};
pub use codec::CodecNegotiator;
pub use content::{open_content, ContentResolver, FileContentResolver};
pub use ports::{PortAllocator, PortReservation};
