//! Process-wide collaborators shared by every session

use crate::config::Config;
use crate::domain::UserProfile;
use crate::infrastructure::media::{
    CodecNegotiator, ContentResolver, MediaFactory, PortAllocator,
};
use crate::infrastructure::protocols::sip::{SipMessageFactory, SipTransport};
use std::sync::Arc;

/// Everything a session needs besides its own dialog
pub struct ImsContext {
    config: Config,
    factory: Arc<SipMessageFactory>,
    transport: Arc<dyn SipTransport>,
    media: Arc<dyn MediaFactory>,
    content: Arc<dyn ContentResolver>,
    msrp_ports: PortAllocator,
    rtp_ports: PortAllocator,
    codecs: CodecNegotiator,
}

impl ImsContext {
    pub fn new(
        config: Config,
        transport: Arc<dyn SipTransport>,
        media: Arc<dyn MediaFactory>,
        content: Arc<dyn ContentResolver>,
    ) -> Self {
        let profile = UserProfile::from_config(&config.user);
        let factory = Arc::new(SipMessageFactory::new(&config.sip, profile));
        let msrp_ports = PortAllocator::msrp(config.media.msrp_port_base, config.media.msrp_port_count);
        let rtp_ports = PortAllocator::rtp(config.media.rtp_port_base, config.media.rtp_port_count);

        Self {
            config,
            factory,
            transport,
            media,
            content,
            msrp_ports,
            rtp_ports,
            codecs: CodecNegotiator::video(),
        }
    }

    /// Replace the local codec list used for streaming sessions
    pub fn with_codecs(mut self, codecs: CodecNegotiator) -> Self {
        self.codecs = codecs;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn profile(&self) -> &UserProfile {
        self.factory.profile()
    }

    pub fn factory(&self) -> &Arc<SipMessageFactory> {
        &self.factory
    }

    pub fn transport(&self) -> &Arc<dyn SipTransport> {
        &self.transport
    }

    pub fn media(&self) -> &Arc<dyn MediaFactory> {
        &self.media
    }

    pub fn content(&self) -> &Arc<dyn ContentResolver> {
        &self.content
    }

    pub fn msrp_ports(&self) -> &PortAllocator {
        &self.msrp_ports
    }

    pub fn rtp_ports(&self) -> &PortAllocator {
        &self.rtp_ports
    }

    pub fn codecs(&self) -> &CodecNegotiator {
        &self.codecs
    }
}
