//! End-to-end: session machine -> dispatcher -> HTTP collector

use std::sync::Arc;

use serde_json::Value;
use watchtrail_core::clock::ManualClock;
use watchtrail_core::collector::{CollectorClient, Dispatcher, FlushOutcome};
use watchtrail_core::config::{CollectorConfig, TrackerConfig};
use watchtrail_core::context::SharedContext;
use watchtrail_core::tracker::{MachineParts, PageView, SessionMachine, SharedPage};
use watchtrail_core::types::{ChannelIdentity, PlayerSnapshot, PlayerState};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WATCH: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

struct Pipeline {
    page: SharedPage,
    clock: Arc<ManualClock>,
    dispatcher: Arc<Dispatcher>,
    machine: SessionMachine,
}

fn pipeline(server: &MockServer) -> Pipeline {
    let config = CollectorConfig {
        endpoint: server.uri(),
        ..Default::default()
    };
    let client = CollectorClient::new(config.clone()).unwrap();
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(client), &config));

    let page = SharedPage::new(PageView {
        url: WATCH.to_string(),
        visible: true,
        player: Some(PlayerSnapshot {
            state: PlayerState::Playing,
            position_s: Some(0.0),
            playback_rate: Some(1.0),
        }),
    });
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let context = SharedContext::new(ChannelIdentity {
        name: Some("Rick Astley".to_string()),
        ..Default::default()
    });

    let machine = SessionMachine::new(
        "client-e2e",
        TrackerConfig::default(),
        MachineParts {
            page: Arc::new(page.clone()),
            context: Arc::new(context),
            sink: dispatcher.clone(),
            clock: clock.clone(),
        },
    );

    Pipeline {
        page,
        clock,
        dispatcher,
        machine,
    }
}

/// Every event the collector received, in arrival order
async fn received_events(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .flat_map(|req| {
            let body: Value = serde_json::from_slice(&req.body).unwrap();
            body["events"].as_array().cloned().unwrap_or_default()
        })
        .collect()
}

#[tokio::test]
async fn test_watch_session_reaches_collector() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ingest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "ok": true,
            "accepted": 5,
            "rejected": 0,
            "errors": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let p = pipeline(&server);
    p.machine.play().await;
    p.clock.advance(10_000);
    p.machine.poll().await;
    p.page.set_player_state(PlayerState::Paused);
    p.machine.on_pause();

    assert_eq!(p.dispatcher.pending_count(), 5);
    assert_eq!(p.dispatcher.drain().await, 5);
    assert!(!p.dispatcher.has_pending());

    let events = received_events(&server).await;
    let types: Vec<&str> = events
        .iter()
        .map(|e| e["event_type"].as_str().unwrap())
        .collect();
    assert_eq!(
        types,
        vec![
            "player_state_change",
            "video_start",
            "watch_tick",
            "player_state_change",
            "video_stop"
        ]
    );

    assert_eq!(events[1]["video_id"], "dQw4w9WgXcQ");
    assert_eq!(events[1]["channel_name"], "Rick Astley");
    assert_eq!(events[2]["watch_ms_delta"], 10_000);
    assert_eq!(events[2]["video_session_id"], events[1]["video_session_id"]);
    assert_eq!(events[4]["reason"], "pause");
    assert!(events.iter().all(|e| e["schema"] == 1));
    assert!(events.iter().all(|e| e["client_session_id"] == "client-e2e"));

    assert_eq!(p.dispatcher.stats().events_sent, 5);
}

#[tokio::test]
async fn test_outage_retries_same_events_after_recovery() {
    watchtrail_core::logging::init_test();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ingest"))
        .respond_with(ResponseTemplate::new(503).set_body_string("collector restarting"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ingest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "ok": true,
            "accepted": 2,
            "rejected": 0,
            "errors": []
        })))
        .mount(&server)
        .await;

    let p = pipeline(&server);
    p.machine.play().await;

    assert_eq!(p.dispatcher.flush().await, FlushOutcome::Failed { queued: 2 });
    assert_eq!(p.dispatcher.pending_count(), 2);
    assert_eq!(p.dispatcher.flush().await, FlushOutcome::Delivered(2));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let first: Value = serde_json::from_slice(&requests[0].body).unwrap();
    let second: Value = serde_json::from_slice(&requests[1].body).unwrap();
    let ids = |body: &Value| -> Vec<String> {
        body["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["event_id"].as_str().unwrap().to_string())
            .collect()
    };
    assert_eq!(ids(&first), ids(&second));

    let stats = p.dispatcher.stats();
    assert_eq!(stats.api_calls, 2);
    assert_eq!(stats.api_failures, 1);
}
