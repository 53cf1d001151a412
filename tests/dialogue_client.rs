//! Wire contract of the dialogue backend client.
//!
//! Verifies the request shapes of `/chat/text` (JSON) and `/chat/voice`
//! (multipart), reply parsing, and how failures map onto `TransportError`.

use ai_therapist::client::Config;
use ai_therapist::types::{SessionId, TextTurnRequest};
use ai_therapist::{AudioPayload, DialogueBackend, DialogueClient, TransportError, VoiceTurn};
use serde_json::json;
use wiremock::matchers::{body_json, header_regex, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> DialogueClient {
    DialogueClient::new(Config::builder().with_base_url(&server.uri()).build()).unwrap()
}

#[tokio::test]
async fn opening_turn_omits_the_missing_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/text"))
        .and(body_json(json!({ "user_input": "", "is_first": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "reply_text": "Hi, how can I help you today?",
            "crisis": false,
            "session_id": "S1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let reply = client_for(&server)
        .submit_text(TextTurnRequest::new("").with_first_turn(true))
        .await
        .unwrap();

    assert_eq!(reply.reply_text(), "Hi, how can I help you today?");
    assert_eq!(reply.session_id(), Some(&SessionId::new("S1")));
    assert!(reply.reply_audio_base64().is_none());
}

#[tokio::test]
async fn text_turn_carries_the_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/text"))
        .and(body_json(json!({ "user_input": "hello", "is_first": false, "session_id": "S1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "reply_text": "I'm here.",
            "reply_audio_base64": "UklGRg==",
            "crisis": true,
            "session_id": "S1",
            "banner": { "message": "You are not alone.", "helpline": { "US": "988" } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let reply = client_for(&server)
        .submit_text(TextTurnRequest::new("hello").with_session_id(Some(SessionId::new("S1"))))
        .await
        .unwrap();

    assert!(reply.crisis());
    assert_eq!(reply.reply_audio_base64(), Some("UklGRg=="));
    let banner = reply.banner().unwrap();
    assert_eq!(banner.message(), "You are not alone.");
    assert_eq!(banner.helplines().collect::<Vec<_>>(), vec![("US", "988")]);
}

#[tokio::test]
async fn voice_turn_is_sent_as_multipart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/voice"))
        .and(header_regex("content-type", "^multipart/form-data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "reply_text": "That makes sense.",
            "session_id": "S2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let turn = VoiceTurn::new(AudioPayload::new(b"RIFF-fake-wav".to_vec()))
        .with_session_id(Some(SessionId::new("S1")));
    let reply = client_for(&server).submit_audio(turn).await.unwrap();
    assert_eq!(reply.session_id(), Some(&SessionId::new("S2")));

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("name=\"audio\""));
    assert!(body.contains("filename=\"clip.wav\""));
    assert!(body.contains("RIFF-fake-wav"));
    assert!(body.contains("name=\"is_first\"\r\n\r\nfalse"));
    assert!(body.contains("name=\"session_id\"\r\n\r\nS1"));
}

#[tokio::test]
async fn voice_turn_without_session_omits_the_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/voice"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "reply_text": "ok" })))
        .mount(&server)
        .await;

    client_for(&server)
        .submit_audio(VoiceTurn::new(AudioPayload::new(vec![1u8, 2, 3])))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(!body.contains("session_id"));
}

#[tokio::test]
async fn http_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/text"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server)
        .submit_text(TextTurnRequest::new("hello"))
        .await
        .unwrap_err();

    match err {
        TransportError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "internal error");
        }
        other => panic!("expected a status error, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_reply_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/text"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": "wrong shape" })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .submit_text(TextTurnRequest::new("hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Decode(_)));
}

#[tokio::test]
async fn empty_inputs_never_leave_the_client() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let client = client_for(&server);

    let text = client.submit_text(TextTurnRequest::new("")).await.unwrap_err();
    assert!(matches!(text, TransportError::Rejected(_)));

    let audio = client.submit_audio(VoiceTurn::new(AudioPayload::empty())).await.unwrap_err();
    assert!(matches!(audio, TransportError::Rejected(_)));
}

#[tokio::test]
async fn unreachable_backend_is_a_request_error() {
    let config = Config::builder().with_base_url("http://127.0.0.1:9").build();
    let err = DialogueClient::new(config)
        .unwrap()
        .submit_text(TextTurnRequest::new("hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Request(_)));
}
