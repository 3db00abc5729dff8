//! Session refresh (RFC 4028) on established sessions

mod common;

use common::*;
use rcs_ims::domain::session::SessionState;
use rcs_ims::infrastructure::protocols::sip::builder::ResponseBuilder;
use rcs_ims::infrastructure::protocols::sip::{SipHeaders, SipMethod, SipRequest, SipResponse};
use std::time::Duration;

fn ok_with_timer(request: &SipRequest, refresher: &str) -> SipResponse {
    ResponseBuilder::ok()
        .to_tag(REMOTE_TAG)
        .header("Contact", "<sip:bob@10.0.0.5:5060>")
        .header("Session-Expires", format!("90;refresher={}", refresher))
        .body("application/sdp", REMOTE_MSRP_SDP.as_bytes().to_vec())
        .build_for_request(request)
}

fn timer_config() -> rcs_ims::config::Config {
    let mut config = test_config();
    config.sip.session_expire = 90;
    config.sip.min_session_expire = 90;
    config
}

#[tokio::test(start_paused = true)]
async fn test_local_refresher_sends_update_until_failure() {
    let h = harness_with(timer_config(), false);
    h.transport.script(
        SipMethod::Invite,
        Script::respond(|request| ok_with_timer(request, "uac")),
    );
    h.transport.script(SipMethod::Update, Script::status(200));
    h.transport.script(SipMethod::Update, Script::NoAnswer);
    let (listener, mut events) = RecordingListener::new(h.log.clone());

    let session = h.module.initiate_chat(BOB, None, Some(listener)).await;
    assert_eq!(next_event(&mut events).await, Notified::Started);
    assert!(session.dialog().is_local_refresher());

    assert_eq!(next_event(&mut events).await, Notified::TerminatedByRemote);

    let updates = h.transport.requests_of(SipMethod::Update);
    assert_eq!(updates.len(), 2);
    assert!(updates[1].cseq().unwrap() > updates[0].cseq().unwrap());
    let bye = h.transport.requests_of(SipMethod::Bye);
    assert_eq!(bye.len(), 1);
    assert!(bye[0].cseq().unwrap() > updates[1].cseq().unwrap());
    assert_eq!(session.state(), SessionState::Terminated);
    assert!(h.module.registry().is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_remote_refresher_keeps_session_alive() {
    let h = harness_with(timer_config(), false);
    h.transport.script(
        SipMethod::Invite,
        Script::respond(|request| ok_with_timer(request, "uas")),
    );
    let (listener, mut events) = RecordingListener::new(h.log.clone());

    let session = h.module.initiate_chat(BOB, None, Some(listener)).await;
    assert_eq!(next_event(&mut events).await, Notified::Started);
    assert!(!session.dialog().is_local_refresher());

    tokio::time::sleep(Duration::from_secs(60)).await;
    let update = remote_request_for(&session, SipMethod::Update, 20);
    h.module.receive_sip_request(update).await.unwrap();
    settle().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    // 120s elapsed, one refresh received at 60s
    assert_eq!(session.state(), SessionState::Established);
    assert!(h.transport.requests_of(SipMethod::Update).is_empty());
    assert!(events.try_recv().is_err());

    assert_eq!(next_event(&mut events).await, Notified::TerminatedByRemote);
    assert_eq!(h.transport.requests_of(SipMethod::Bye).len(), 1);
}
