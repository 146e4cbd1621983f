// ABOUTME: Tests for the reqwest desk client against a wiremock server
// ABOUTME: Validates status mapping (204/409/403), header attachment, and defensive body parsing

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tether_core::config::DeskConfig;
use tether_core::desk::{DeskBackend, EndCause, HttpDesk, PollOutcome, SessionTokens};
use tether_core::events::PollEvent;

fn desk_for(server: &MockServer) -> HttpDesk {
    let config = DeskConfig {
        base_url: server.uri(),
        org_id: "00Dtest".to_string(),
        deployment_id: "572test".to_string(),
        button_id: "573test".to_string(),
        api_version: "34".to_string(),
        sneak_peek_enabled: false,
    };
    HttpDesk::new(config).expect("client builds")
}

fn tokens() -> SessionTokens {
    SessionTokens {
        session_id: "sid".to_string(),
        affinity_token: "aff".to_string(),
        session_key: "key".to_string(),
    }
}

#[tokio::test]
async fn create_session_parses_tokens_and_sends_version_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/rest/System/SessionId"))
        .and(header("X-LIVEAGENT-API-VERSION", "34"))
        .and(header("X-LIVEAGENT-AFFINITY", "null"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "session-1",
            "affinityToken": "affinity-1",
            "key": "key-1",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let desk = desk_for(&server);
    let tokens = desk.create_session().await.unwrap();
    assert_eq!(tokens.session_id, "session-1");
    assert_eq!(tokens.affinity_token, "affinity-1");
    assert_eq!(tokens.session_key, "key-1");
}

#[tokio::test]
async fn create_session_rejects_payload_missing_required_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/rest/System/SessionId"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "session-1",
            // affinityToken and key absent
        })))
        .mount(&server)
        .await;

    let desk = desk_for(&server);
    let err = desk.create_session().await.unwrap_err();
    assert!(err.to_string().contains("affinityToken"));
}

#[tokio::test]
async fn poll_maps_204_and_409_to_empty_retry() {
    for status in [204u16, 409] {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chat/rest/System/Messages"))
            .and(header("X-LIVEAGENT-AFFINITY", "aff"))
            .and(header("X-LIVEAGENT-SESSION-KEY", "key"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;

        let desk = desk_for(&server);
        let outcome = desk.poll_events(&tokens()).await;
        assert!(
            matches!(outcome, PollOutcome::EmptyRetry),
            "HTTP {} must map to EmptyRetry, got {:?}",
            status,
            outcome
        );
    }
}

#[tokio::test]
async fn poll_maps_403_to_session_expired() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/rest/System/Messages"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let desk = desk_for(&server);
    assert!(matches!(
        desk.poll_events(&tokens()).await,
        PollOutcome::SessionExpired
    ));
}

#[tokio::test]
async fn poll_parses_events_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/rest/System/Messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [
                {"type": "ChatEstablished", "message": {}},
                {"type": "ChatMessage", "message": {"text": "hi there"}},
            ],
            "sequence": 1,
        })))
        .mount(&server)
        .await;

    let desk = desk_for(&server);
    match desk.poll_events(&tokens()).await {
        PollOutcome::Events(events) => {
            assert_eq!(
                events,
                vec![
                    PollEvent::ChatEstablished,
                    PollEvent::ChatMessage {
                        text: "hi there".to_string()
                    }
                ]
            );
        }
        other => panic!("expected Events, got {:?}", other),
    }
}

#[tokio::test]
async fn poll_with_unparseable_body_yields_no_events_not_a_crash() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/rest/System/Messages"))
        .respond_with(ResponseTemplate::new(200).set_body_string("this is not json"))
        .mount(&server)
        .await;

    let desk = desk_for(&server);
    match desk.poll_events(&tokens()).await {
        PollOutcome::Events(events) => assert!(events.is_empty()),
        other => panic!("expected empty Events, got {:?}", other),
    }
}

#[tokio::test]
async fn poll_maps_server_errors_to_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/rest/System/Messages"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let desk = desk_for(&server);
    assert!(matches!(
        desk.poll_events(&tokens()).await,
        PollOutcome::TransportError(_)
    ));
}

#[tokio::test]
async fn request_chat_posts_identity_and_prechat_fields() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/rest/Chasitor/ChasitorInit"))
        .and(header("X-LIVEAGENT-AFFINITY", "aff"))
        .and(body_partial_json(json!({
            "organizationId": "00Dtest",
            "deploymentId": "572test",
            "buttonId": "573test",
            "sessionId": "sid",
            "visitorName": "Ada",
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let desk = desk_for(&server);
    let visitor = tether_core::desk::Visitor {
        name: "Ada".to_string(),
        email: Some("ada@example.com".to_string()),
    };
    desk.request_chat(&tokens(), &visitor).await.unwrap();
}

#[tokio::test]
async fn end_session_forwards_the_cause_tag() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/rest/Chasitor/ChatEnd"))
        .and(body_partial_json(json!({"reason": "idle_timeout"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let desk = desk_for(&server);
    desk.end_session(&tokens(), EndCause::IdleTimeout)
        .await
        .unwrap();
}

#[tokio::test]
async fn rejected_one_shot_calls_surface_the_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/rest/Chasitor/ChatMessage"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let desk = desk_for(&server);
    let err = desk
        .send_visitor_message(&tokens(), "hello")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn typing_and_sneak_peek_hit_their_own_endpoints() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/rest/Chasitor/ChasitorTyping"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/rest/Chasitor/ChasitorNotTyping"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/rest/Chasitor/ChasitorSneakPeek"))
        .and(body_partial_json(json!({"text": "typing this ri"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let desk = desk_for(&server);
    desk.set_typing(&tokens(), true).await.unwrap();
    desk.set_typing(&tokens(), false).await.unwrap();
    desk.set_sneak_peek(&tokens(), "typing this ri").await.unwrap();
}
