//! Inbound request routing

mod common;

use common::*;
use rcs_ims::infrastructure::protocols::sip::builder::RequestBuilder;
use rcs_ims::infrastructure::protocols::sip::{SipHeaders, SipMessage, SipMethod};
use std::sync::Arc;
use std::time::Duration;

fn out_of_dialog(method: SipMethod) -> rcs_ims::infrastructure::protocols::sip::SipRequest {
    RequestBuilder::new(method, "sip:alice@ims.test")
        .unwrap()
        .header("Via", "SIP/2.0/UDP 10.0.0.5:5060;branch=z9hG4bKood")
        .header("From", format!("<{}>;tag=bobtag", BOB))
        .header("To", "<sip:alice@ims.test>")
        .header("Call-ID", "ood-1@10.0.0.5")
        .header("CSeq", format!("1 {}", method))
        .build()
}

#[tokio::test]
async fn test_bye_without_session_gets_481() {
    let h = harness();
    let bye = incoming_request(SipMethod::Bye, "unknown@10.0.0.5", 2);

    tokio_test::assert_ok!(h.module.receive_sip_request(bye).await);

    assert_eq!(h.transport.response_codes(), vec![481]);
}

#[tokio::test]
async fn test_ack_without_session_is_dropped() {
    let h = harness();
    let ack = incoming_request(SipMethod::Ack, "unknown@10.0.0.5", 1);

    tokio_test::assert_ok!(h.module.receive_sip_request(ack).await);

    assert!(h.transport.responses().is_empty());
}

#[tokio::test]
async fn test_options_answered_with_capabilities() {
    let h = harness();

    h.module
        .receive_sip_request(out_of_dialog(SipMethod::Options))
        .await
        .unwrap();

    let responses = h.transport.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status_code(), 200);
    let contact = responses[0].header("Contact").unwrap();
    assert!(contact.contains("+g.oma.sip-im"));
    assert!(contact.contains("+g.3gpp.cs-voice"));
    assert!(responses[0].header("Allow").is_some());
}

#[tokio::test]
async fn test_unsupported_method_gets_405() {
    let h = harness();

    h.module
        .receive_sip_request(out_of_dialog(SipMethod::Notify))
        .await
        .unwrap();

    assert_eq!(h.transport.response_codes(), vec![405]);
}

#[tokio::test]
async fn test_message_and_subscribe_forwarded() {
    let h = harness();
    let (service, _sessions) = RecordingServiceListener::new();
    h.module.set_service_listener(service.clone()).await;

    h.module
        .receive_sip_request(out_of_dialog(SipMethod::Message))
        .await
        .unwrap();
    h.module
        .receive_sip_request(out_of_dialog(SipMethod::Subscribe))
        .await
        .unwrap();

    assert_eq!(h.transport.response_codes(), vec![200, 202]);
    assert_eq!(service.messages.lock().unwrap().len(), 1);
    assert_eq!(service.subscribes.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_stray_response_ignored() {
    let h = harness();
    let request = out_of_dialog(SipMethod::Options);

    h.module
        .receive_sip_message(SipMessage::Response(response(&request, 200)))
        .await
        .unwrap();

    assert!(h.transport.responses().is_empty());
    assert!(h.transport.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reinvite_routed_to_session() {
    let h = harness();
    h.transport.script(
        SipMethod::Invite,
        Script::respond(|request| ok_with_sdp(request, REMOTE_MSRP_SDP)),
    );
    let (listener, mut events) = RecordingListener::new(h.log.clone());
    let session = h.module.initiate_chat(BOB, None, Some(listener)).await;
    assert_eq!(next_event(&mut events).await, Notified::Started);

    // In-dialog INVITE carries the To tag
    let reinvite = remote_request_for(&session, SipMethod::Invite, 5);
    h.module.receive_sip_request(reinvite).await.unwrap();
    settle().await;

    let ok = h.transport.responses().pop().unwrap();
    assert_eq!(ok.status_code(), 200);
    assert_eq!(ok.cseq(), Some(5));
    assert_eq!(h.module.registry().len().await, 1);

    session.abort().await;
}

const CHAT_OFFER: &str = "v=0\r\n\
o=- 3800000000 3800000000 IN IP4 10.0.0.5\r\n\
s=-\r\n\
c=IN IP4 10.0.0.5\r\n\
t=0 0\r\n\
m=message 7000 TCP/MSRP *\r\n\
a=accept-types:message/cpim\r\n\
a=path:msrp://10.0.0.5:7000/bobpath;tcp\r\n\
a=setup:active\r\n\
a=sendrecv\r\n";

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_invite_copies_create_one_session() {
    let Harness { module, transport, .. } = harness();
    let (service, mut sessions) = RecordingServiceListener::new();
    module.set_service_listener(service).await;
    let module = Arc::new(module);

    let copies: Vec<_> = (0..8)
        .map(|_| {
            let module = module.clone();
            tokio::spawn(async move {
                let invite = incoming_invite("dup-1@10.0.0.5", "+g.oma.sip-im", "application/sdp", CHAT_OFFER);
                module.receive_sip_request(invite).await
            })
        })
        .collect();
    for copy in futures::future::join_all(copies).await {
        tokio_test::assert_ok!(copy.unwrap());
    }

    let session = tokio::time::timeout(Duration::from_secs(5), sessions.recv())
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sessions.try_recv().is_err());
    assert_eq!(module.registry().len().await, 1);
    assert_eq!(transport.response_codes(), vec![180]);

    session.abort().await;
    assert!(module.registry().is_empty().await);
}
