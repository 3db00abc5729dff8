//! Shared fakes for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use rcs_ims::application::{ImsModule, ImsServiceSession, ServiceListener, SessionRegistry};
use rcs_ims::config::Config;
use rcs_ims::domain::instant_messaging::InstantMessage;
use rcs_ims::domain::session::{SessionError, SessionErrorKind, SessionListener};
use rcs_ims::domain::MmContent;
use rcs_ims::infrastructure::media::{
    ContentReader, ContentResolver, MediaChannel, MediaError, MediaEvent, MediaEventSink,
    MediaFactory, RemoteMedia,
};
use rcs_ims::infrastructure::protocols::sip::builder::{RequestBuilder, ResponseBuilder};
use rcs_ims::infrastructure::protocols::sip::{
    SipError, SipHeaders, SipMessage, SipMethod, SipRequest, SipResponse, SipTransport,
};
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

pub const REMOTE_TAG: &str = "abc123";
pub const BOB: &str = "sip:bob@ims.test";

/// 200 OK answer of the remote MSRP endpoint
pub const REMOTE_MSRP_SDP: &str = "v=0\r\n\
o=- 3800000000 3800000000 IN IP4 10.0.0.5\r\n\
s=-\r\n\
c=IN IP4 10.0.0.5\r\n\
t=0 0\r\n\
m=message 5000 TCP/MSRP *\r\n\
a=accept-types:image/jpeg message/cpim\r\n\
a=path:msrp://10.0.0.5:5000/relay;tcp\r\n\
a=setup:passive\r\n\
a=recvonly\r\n";

/// 200 OK answer of a remote video receiver
pub const REMOTE_VIDEO_SDP: &str = "v=0\r\n\
o=- 3800000000 3800000000 IN IP4 10.0.0.5\r\n\
s=-\r\n\
c=IN IP4 10.0.0.5\r\n\
t=0 0\r\n\
m=video 40000 RTP/AVP 96\r\n\
a=rtpmap:96 H264/90000\r\n\
a=recvonly\r\n";

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.sip.local_address = "10.0.0.1".to_string();
    config.sip.session_expire = 0;
    config.user.username = "alice".to_string();
    config.user.display_name = "Alice".to_string();
    config.user.private_id = "alice@ims.test".to_string();
    config.user.password = "secret".to_string();
    config.user.home_domain = "ims.test".to_string();
    config
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("rcs_ims=debug")
        .with_test_writer()
        .try_init();
}

/// Ordered record shared by every fake, each entry with the registry size
/// observed when it was pushed
#[derive(Clone, Default)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<(String, Option<usize>)>>>,
    registry: Arc<OnceLock<Arc<SessionRegistry>>>,
}

impl EventLog {
    pub fn watch_registry(&self, registry: Arc<SessionRegistry>) {
        let _ = self.registry.set(registry);
    }

    pub fn push(&self, entry: impl Into<String>) {
        let registered = self.registry.get().and_then(|registry| registry.try_len());
        self.entries.lock().unwrap().push((entry.into(), registered));
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(entry, _)| entry.clone())
            .collect()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    /// Registry size when `entry` was first pushed
    pub fn registry_len_at(&self, entry: &str) -> Option<usize> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|(e, _)| e == entry)
            .and_then(|(_, registered)| *registered)
    }
}

/// Single session teardown: media closed while still registered, listener
/// notified once the registry no longer holds the session
pub fn assert_teardown_order(log: &EventLog, notification: &str) {
    let notified = log
        .position(notification)
        .unwrap_or_else(|| panic!("no {:?} in {:?}", notification, log.entries()));
    assert_eq!(
        log.registry_len_at(notification),
        Some(0),
        "session still registered at {:?}",
        notification
    );
    if let Some(close) = log.position("media close") {
        assert!(close < notified, "media closed after {:?}", notification);
        assert_eq!(log.registry_len_at("media close"), Some(1));
    }
}

/// What the fake network answers to a request
pub enum Script {
    Respond(Box<dyn Fn(&SipRequest) -> SipResponse + Send + Sync>),
    NoAnswer,
    /// Never answers, the caller stays blocked until aborted
    Hang,
}

impl Script {
    pub fn respond(f: impl Fn(&SipRequest) -> SipResponse + Send + Sync + 'static) -> Self {
        Script::Respond(Box::new(f))
    }

    pub fn status(code: u16) -> Self {
        Script::respond(move |request| response(request, code))
    }
}

pub struct FakeTransport {
    log: EventLog,
    scripts: Mutex<HashMap<SipMethod, VecDeque<Script>>>,
    requests: Mutex<Vec<SipRequest>>,
    responses: Mutex<Vec<SipResponse>>,
}

impl FakeTransport {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            scripts: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, method: SipMethod, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .entry(method)
            .or_default()
            .push_back(script);
    }

    pub fn requests(&self) -> Vec<SipRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_of(&self, method: SipMethod) -> Vec<SipRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method() == Some(method))
            .collect()
    }

    pub fn responses(&self) -> Vec<SipResponse> {
        self.responses.lock().unwrap().clone()
    }

    pub fn response_codes(&self) -> Vec<u16> {
        self.responses().iter().map(|r| r.status_code()).collect()
    }

    fn record(&self, request: &SipRequest) {
        let name = request.method().map(|m| m.as_str()).unwrap_or("?");
        self.log.push(format!("send {}", name));
        self.requests.lock().unwrap().push(request.clone());
    }
}

#[async_trait]
impl SipTransport for FakeTransport {
    async fn send_request_and_wait(
        &self,
        request: SipRequest,
        _timeout: Duration,
    ) -> Result<Option<SipResponse>, SipError> {
        self.record(&request);
        let method = request.method();
        let script = method.and_then(|m| {
            self.scripts
                .lock()
                .unwrap()
                .get_mut(&m)
                .and_then(|queue| queue.pop_front())
        });
        match script {
            Some(Script::Respond(f)) => Ok(Some(f(&request))),
            Some(Script::NoAnswer) => Ok(None),
            Some(Script::Hang) => std::future::pending().await,
            None if method == Some(SipMethod::Invite) => Ok(None),
            None => Ok(Some(response(&request, 200))),
        }
    }

    async fn send_message(&self, message: SipMessage) -> Result<(), SipError> {
        match message {
            SipMessage::Request(request) => self.record(&request),
            SipMessage::Response(response) => {
                self.log.push(format!("respond {}", response.status_code()));
                self.responses.lock().unwrap().push(response);
            }
        }
        Ok(())
    }
}

pub fn response(request: &SipRequest, code: u16) -> SipResponse {
    ResponseBuilder::new(code)
        .to_tag(REMOTE_TAG)
        .build_for_request(request)
}

pub fn ok_with_sdp(request: &SipRequest, sdp: &str) -> SipResponse {
    ResponseBuilder::ok()
        .to_tag(REMOTE_TAG)
        .header("Contact", "<sip:bob@10.0.0.5:5060>")
        .body("application/sdp", sdp.as_bytes().to_vec())
        .build_for_request(request)
}

pub fn proxy_challenge(request: &SipRequest) -> SipResponse {
    ResponseBuilder::new(407)
        .to_tag(REMOTE_TAG)
        .header(
            "Proxy-Authenticate",
            r#"Digest realm="ims.test", nonce="n1", qop="auth", algorithm=MD5"#,
        )
        .build_for_request(request)
}

/// INVITE as the remote party would send it
pub fn incoming_invite(call_id: &str, feature_tag: &str, content_type: &str, body: &str) -> SipRequest {
    RequestBuilder::new(SipMethod::Invite, "sip:alice@10.0.0.1:5060")
        .unwrap()
        .header("Via", "SIP/2.0/UDP 10.0.0.5:5060;branch=z9hG4bKremote1")
        .header("Max-Forwards", "70")
        .header("From", format!("<{}>;tag=bobtag", BOB))
        .header("To", "<sip:alice@ims.test>")
        .header("Call-ID", call_id)
        .header("CSeq", "1 INVITE")
        .header("Contact", format!("<sip:bob@10.0.0.5:5060>;{}", feature_tag))
        .header("Accept-Contact", format!("*;{}", feature_tag))
        .body(content_type, body.as_bytes().to_vec())
        .build()
}

/// In-dialog request from the remote party
pub fn incoming_request(method: SipMethod, call_id: &str, cseq: u32) -> SipRequest {
    RequestBuilder::new(method, "sip:alice@10.0.0.1:5060")
        .unwrap()
        .header("Via", format!("SIP/2.0/UDP 10.0.0.5:5060;branch=z9hG4bKremote{}", cseq))
        .header("Max-Forwards", "70")
        .header("From", format!("<{}>;tag=bobtag", BOB))
        .header("To", "<sip:alice@ims.test>;tag=localtag")
        .header("Call-ID", call_id)
        .header("CSeq", format!("{} {}", cseq, method))
        .build()
}

/// Request sent by us, originating side
pub fn remote_request_for(session: &ImsServiceSession, method: SipMethod, cseq: u32) -> SipRequest {
    incoming_request(method, session.call_id(), cseq)
}

pub struct FakeChannel {
    log: EventLog,
    auto_complete: bool,
    remote: Mutex<Option<RemoteMedia>>,
    sink: Mutex<Option<MediaEventSink>>,
    chunks: Mutex<Option<(String, u64, usize)>>,
    data: Mutex<Vec<(Bytes, String)>>,
}

impl FakeChannel {
    pub fn remote(&self) -> Option<RemoteMedia> {
        self.remote.lock().unwrap().clone()
    }

    /// Encoding, announced size and bytes actually read by `send_chunks`
    pub fn chunks(&self) -> Option<(String, u64, usize)> {
        self.chunks.lock().unwrap().clone()
    }

    pub fn sent_data(&self) -> Vec<(Bytes, String)> {
        self.data.lock().unwrap().clone()
    }

    /// Deliver an event as if it came from the network
    pub fn emit(&self, event: MediaEvent) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            let _ = sink.send(event);
        }
    }
}

#[async_trait]
impl MediaChannel for FakeChannel {
    async fn open(&self, remote: RemoteMedia, sink: MediaEventSink) -> Result<(), MediaError> {
        self.log.push("media open");
        *self.remote.lock().unwrap() = Some(remote);
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    async fn send_chunks(
        &self,
        mut reader: ContentReader,
        encoding: String,
        total_size: u64,
    ) -> Result<(), MediaError> {
        let mut buffer = Vec::new();
        reader
            .read_to_end(&mut buffer)
            .await
            .map_err(|e| MediaError::Content(e.to_string()))?;
        *self.chunks.lock().unwrap() = Some((encoding, total_size, buffer.len()));
        if self.auto_complete {
            self.emit(MediaEvent::Progress {
                current: buffer.len() as u64,
                total: total_size,
            });
            self.emit(MediaEvent::DataTransferred);
        }
        Ok(())
    }

    async fn send_data(&self, data: Bytes, content_type: String) -> Result<(), MediaError> {
        self.data.lock().unwrap().push((data, content_type));
        Ok(())
    }

    async fn close(&self) {
        self.log.push("media close");
        self.sink.lock().unwrap().take();
    }
}

pub struct FakeMediaFactory {
    log: EventLog,
    auto_complete: bool,
    channels: Mutex<Vec<(u16, Arc<FakeChannel>)>>,
}

impl FakeMediaFactory {
    pub fn new(log: EventLog, auto_complete: bool) -> Self {
        Self {
            log,
            auto_complete,
            channels: Mutex::new(Vec::new()),
        }
    }

    pub fn channel(&self) -> Option<Arc<FakeChannel>> {
        self.channels.lock().unwrap().last().map(|(_, c)| c.clone())
    }

    pub fn ports(&self) -> Vec<u16> {
        self.channels.lock().unwrap().iter().map(|(p, _)| *p).collect()
    }

    fn create(&self, port: u16) -> Arc<dyn MediaChannel> {
        let channel = Arc::new(FakeChannel {
            log: self.log.clone(),
            auto_complete: self.auto_complete,
            remote: Mutex::new(None),
            sink: Mutex::new(None),
            chunks: Mutex::new(None),
            data: Mutex::new(Vec::new()),
        });
        self.channels.lock().unwrap().push((port, channel.clone()));
        channel
    }
}

impl MediaFactory for FakeMediaFactory {
    fn create_msrp_channel(&self, local_port: u16, _chunk_size: usize) -> Arc<dyn MediaChannel> {
        self.create(local_port)
    }

    fn create_rtp_channel(&self, local_port: u16) -> Arc<dyn MediaChannel> {
        self.create(local_port)
    }
}

#[derive(Default)]
pub struct MemoryContent {
    files: Mutex<HashMap<String, Bytes>>,
}

impl MemoryContent {
    pub fn insert(&self, url: &str, data: Bytes) {
        self.files.lock().unwrap().insert(url.to_string(), data);
    }

    pub fn get(&self, url: &str) -> Option<Bytes> {
        self.files.lock().unwrap().get(url).cloned()
    }
}

#[async_trait]
impl ContentResolver for MemoryContent {
    async fn open(&self, url: &str) -> Result<ContentReader, MediaError> {
        let data = self
            .get(url)
            .ok_or_else(|| MediaError::Content(format!("{} not found", url)))?;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn store(&self, url: &str, data: Bytes) -> Result<(), MediaError> {
        self.insert(url, data);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notified {
    Started,
    Aborted,
    TerminatedByRemote,
    Progress(u64, u64),
    Transferred(MmContent),
    Error(SessionErrorKind),
    Message(String),
    Refer(String),
}

impl Notified {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Notified::Aborted | Notified::TerminatedByRemote | Notified::Transferred(_) | Notified::Error(_)
        )
    }
}

pub struct RecordingListener {
    log: EventLog,
    tx: mpsc::UnboundedSender<Notified>,
}

impl RecordingListener {
    pub fn new(log: EventLog) -> (Arc<Self>, mpsc::UnboundedReceiver<Notified>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { log, tx }), rx)
    }

    fn notify(&self, event: Notified) {
        self.log.push(format!("listener {:?}", event).split('(').next().unwrap_or("").to_string());
        let _ = self.tx.send(event);
    }
}

impl SessionListener for RecordingListener {
    fn handle_session_started(&self) {
        self.notify(Notified::Started);
    }

    fn handle_session_aborted(&self) {
        self.notify(Notified::Aborted);
    }

    fn handle_session_terminated_by_remote(&self) {
        self.notify(Notified::TerminatedByRemote);
    }

    fn handle_sharing_progress(&self, current: u64, total: u64) {
        self.notify(Notified::Progress(current, total));
    }

    fn handle_content_transferred(&self, content: &MmContent) {
        self.notify(Notified::Transferred(content.clone()));
    }

    fn handle_sharing_error(&self, error: &SessionError) {
        self.notify(Notified::Error(error.kind()));
    }

    fn handle_message_received(&self, message: &InstantMessage) {
        self.notify(Notified::Message(message.text.clone()));
    }

    fn handle_refer_received(&self, refer_to: &str) {
        self.notify(Notified::Refer(refer_to.to_string()));
    }
}

pub struct RecordingServiceListener {
    sessions: mpsc::UnboundedSender<Arc<ImsServiceSession>>,
    pub messages: Mutex<Vec<SipRequest>>,
    pub subscribes: Mutex<Vec<SipRequest>>,
}

impl RecordingServiceListener {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Arc<ImsServiceSession>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = Self {
            sessions: tx,
            messages: Mutex::new(Vec::new()),
            subscribes: Mutex::new(Vec::new()),
        };
        (Arc::new(listener), rx)
    }
}

impl ServiceListener for RecordingServiceListener {
    fn handle_incoming_session(&self, session: Arc<ImsServiceSession>) {
        let _ = self.sessions.send(session);
    }

    fn handle_message(&self, request: &SipRequest) {
        self.messages.lock().unwrap().push(request.clone());
    }

    fn handle_subscribe(&self, request: &SipRequest) {
        self.subscribes.lock().unwrap().push(request.clone());
    }
}

pub struct Harness {
    pub module: ImsModule,
    pub transport: Arc<FakeTransport>,
    pub media: Arc<FakeMediaFactory>,
    pub content: Arc<MemoryContent>,
    pub log: EventLog,
}

pub fn harness() -> Harness {
    harness_with(test_config(), false)
}

pub fn harness_with(config: Config, auto_complete: bool) -> Harness {
    init_tracing();
    let log = EventLog::default();
    let transport = Arc::new(FakeTransport::new(log.clone()));
    let media = Arc::new(FakeMediaFactory::new(log.clone(), auto_complete));
    let content = Arc::new(MemoryContent::default());
    let module = ImsModule::new(config, transport.clone(), media.clone(), content.clone());
    log.watch_registry(module.registry().clone());
    Harness {
        module,
        transport,
        media,
        content,
        log,
    }
}

/// Next listener event, failing the test when none arrives
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<Notified>) -> Notified {
    tokio::time::timeout(Duration::from_secs(120), rx.recv())
        .await
        .expect("no listener event")
        .expect("listener channel closed")
}

/// Skip progress and message events up to the next lifecycle event
pub async fn next_lifecycle_event(rx: &mut mpsc::UnboundedReceiver<Notified>) -> Notified {
    loop {
        match next_event(rx).await {
            Notified::Progress(..) | Notified::Message(_) | Notified::Refer(_) => continue,
            event => return event,
        }
    }
}

/// Let every runnable task make progress
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
