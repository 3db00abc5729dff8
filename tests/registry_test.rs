//! Session registry bookkeeping

mod common;

use common::*;
use rcs_ims::application::SessionKind;
use rcs_ims::infrastructure::protocols::sip::SipMethod;

#[tokio::test(start_paused = true)]
async fn test_sessions_indexed_by_id_and_call_id() {
    let h = harness();
    h.transport.script(SipMethod::Invite, Script::Hang);
    h.transport.script(SipMethod::Invite, Script::Hang);

    let chat = h.module.initiate_chat(BOB, None, None).await;
    let video = h.module.initiate_streaming(BOB, None).await;
    let registry = h.module.registry();

    assert_eq!(registry.len().await, 2);
    assert_eq!(registry.get(chat.id()).await.unwrap().id(), chat.id());
    assert_eq!(
        registry.find_by_call_id(video.call_id()).await.unwrap().id(),
        video.id()
    );
    assert_ne!(chat.call_id(), video.call_id());

    let chats = registry.sessions_of_kind(SessionKind::Chat).await;
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].id(), chat.id());

    h.module.abort_all_sessions().await;
    assert!(registry.is_empty().await);
    assert!(registry.find_by_call_id(chat.call_id()).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_remove_session_is_idempotent() {
    let h = harness();
    h.transport.script(SipMethod::Invite, Script::Hang);
    let session = h.module.initiate_chat(BOB, None, None).await;
    let registry = h.module.registry();

    assert!(registry.remove_session(session.id()).await);
    assert!(!registry.remove_session(session.id()).await);

    // Teardown still runs, removal stays a no-op
    session.abort().await;
    assert!(registry.is_empty().await);
}
