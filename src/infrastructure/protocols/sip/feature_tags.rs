//! Feature tags advertised in Contact and Accept-Contact (RFC 3840 / 3841)

/// Circuit-switched voice
pub const FEATURE_3GPP_VOICE: &str = "+g.3gpp.cs-voice";

/// GSMA image share
pub const FEATURE_IMAGE_SHARE: &str =
    "+g.3gpp.app_ref=\"urn%3Aurn-7%3A3gpp-application.ims.iari.gsma-is\"";

/// OMA SIMPLE instant messaging
pub const FEATURE_OMA_IM: &str = "+g.oma.sip-im";

/// Tags of a content sharing (image/file) session
pub fn content_sharing_tags() -> Vec<String> {
    vec![FEATURE_3GPP_VOICE.to_string(), FEATURE_IMAGE_SHARE.to_string()]
}

/// Tags of a chat session
pub fn chat_tags() -> Vec<String> {
    vec![FEATURE_OMA_IM.to_string()]
}

/// Tags of a video streaming session
pub fn streaming_tags() -> Vec<String> {
    vec![FEATURE_3GPP_VOICE.to_string()]
}

/// Everything this client supports, returned in OPTIONS answers
pub fn supported_tags() -> Vec<String> {
    vec![
        FEATURE_3GPP_VOICE.to_string(),
        FEATURE_IMAGE_SHARE.to_string(),
        FEATURE_OMA_IM.to_string(),
    ]
}

/// Whether a tag list announces the given feature
pub fn contains(tags: &[String], feature: &str) -> bool {
    tags.iter().any(|t| t.eq_ignore_ascii_case(feature))
}
