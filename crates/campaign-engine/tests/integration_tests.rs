//! Integration tests for the campaign engine
//!
//! These drive full campaign lifecycles against an in-memory store and a
//! scripted mock telephony adapter: dial loops, webhook processing, billing,
//! pause/resume, orphan recovery, and the scheduler all run for real; only
//! the provider HTTP call is faked.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serial_test::serial;
use tokio::sync::mpsc;
use uuid::Uuid;

use dialwave_campaign_engine::prelude::*;
use dialwave_telephony::{
    InstructionContext, OriginateRequest as TelOriginateRequest, ProviderError,
    RawHangupEvent, RawRecordingEvent,
};

/// Scripted in-memory adapter registered under the Plivo slot
struct MockAdapter {
    dials: Mutex<Vec<TelOriginateRequest>>,
    fail_numbers: Mutex<HashSet<String>>,
    notify: mpsc::UnboundedSender<TelOriginateRequest>,
}

impl MockAdapter {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TelOriginateRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let adapter = Arc::new(Self {
            dials: Mutex::new(Vec::new()),
            fail_numbers: Mutex::new(HashSet::new()),
            notify: tx,
        });
        (adapter, rx)
    }

    fn fail_number(&self, number: &str) {
        self.fail_numbers.lock().unwrap().insert(number.to_string());
    }

    fn dialed_numbers(&self) -> Vec<String> {
        self.dials.lock().unwrap().iter().map(|r| r.to.clone()).collect()
    }
}

#[async_trait]
impl TelephonyAdapter for MockAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Plivo
    }

    async fn originate(
        &self,
        request: &TelOriginateRequest,
    ) -> dialwave_telephony::Result<OriginateResponse> {
        if self.fail_numbers.lock().unwrap().contains(&request.to) {
            return Err(ProviderError::Rejected {
                code: 400,
                message: format!("number {} rejected by script", request.to),
            });
        }

        self.dials.lock().unwrap().push(request.clone());
        let _ = self.notify.send(request.clone());

        Ok(OriginateResponse {
            call_uuid: request.call_uuid,
            provider_call_id: format!("mock-{}", request.call_uuid),
        })
    }

    fn generate_instructions(&self, ctx: &InstructionContext) -> InstructionDoc {
        InstructionDoc {
            content_type: "application/xml",
            body: format!("<Response><Stream>{}</Stream></Response>", ctx.bot_ws_url),
        }
    }

    fn classify_status(&self, provider_status: &str) -> CallPhase {
        match provider_status {
            "ringing" => CallPhase::Ringing,
            "in-progress" => CallPhase::Ongoing,
            "completed" => CallPhase::Completed,
            "busy" | "failed" | "no-answer" => CallPhase::Failed,
            _ => CallPhase::Processed,
        }
    }

    fn parse_hangup(&self, payload: &serde_json::Value) -> dialwave_telephony::Result<RawHangupEvent> {
        let get = |key: &str| payload.get(key).and_then(|v| v.as_str()).map(|s| s.to_string());
        Ok(RawHangupEvent {
            call_uuid: get("call_uuid").and_then(|s| Uuid::parse_str(&s).ok()),
            provider_call_id: get("provider_call_id"),
            from: get("from"),
            to: get("to"),
            duration: get("duration"),
            status: get("status"),
            hangup_cause: get("hangup_cause"),
            sip_code: None,
            start_time: None,
            answer_time: None,
            end_time: None,
            recording_url: get("recording_url"),
        })
    }

    fn parse_recording(
        &self,
        payload: &serde_json::Value,
    ) -> dialwave_telephony::Result<RawRecordingEvent> {
        Ok(RawRecordingEvent {
            call_uuid: payload
                .get("call_uuid")
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok()),
            provider_call_id: None,
            recording_url: payload
                .get("recording_url")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            duration: None,
        })
    }
}

fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.general.subsequent_call_wait = Duration::from_millis(50);
    config.general.scheduler_interval = Duration::from_millis(50);
    config.general.shutdown_grace = Duration::from_millis(200);
    config.limits.max_calls_per_minute = 10_000;
    config.limits.admission_timeout = Duration::from_millis(400);
    config.limits.admission_retry_delay = Duration::from_millis(10);
    config.heartbeat.interval = Duration::from_millis(50);
    config.heartbeat.orphan_threshold = Duration::from_millis(200);
    config.heartbeat.scan_interval = Duration::from_millis(100);
    config.billing.aggregate_drain_poll = Duration::from_millis(20);
    config.billing.aggregate_drain_timeout = Duration::from_secs(5);
    config
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
}

async fn create_test_engine(
    store: &Store,
) -> (Arc<CampaignEngine>, Arc<MockAdapter>, mpsc::UnboundedReceiver<TelOriginateRequest>) {
    init_tracing();
    let engine = CampaignEngine::with_store(test_config(), store.clone()).unwrap();
    let (mock, rx) = MockAdapter::new();
    engine.providers().insert(mock.clone());
    (engine, mock, rx)
}

async fn seed_tenant(store: &Store, balance: i64) {
    store.upsert_tenant("tenant-1", balance, 10, &[]).await.unwrap();
}

async fn seed_list(store: &Store, contacts: usize) {
    let contacts: Vec<NewContact> = (0..contacts)
        .map(|i| NewContact {
            number: format!("+9198765432{i:02}"),
            first_name: Some(format!("Contact {i}")),
            email: None,
            fields: serde_json::Map::new(),
        })
        .collect();
    store
        .insert_contact_list("list-1", "tenant-1", "test list", &contacts)
        .await
        .unwrap();
}

fn new_campaign() -> NewCampaign {
    NewCampaign {
        tenant_id: "tenant-1".to_string(),
        name: "test-campaign".to_string(),
        list_id: "list-1".to_string(),
        from_number: "+14155550100".to_string(),
        bot_ws_url: "wss://bot.example.com/chat/v2/asst-1".to_string(),
        provider: None,
        scheduled_time: None,
    }
}

/// Deliver the hangup webhook for one dial
async fn deliver_hangup(engine: &Arc<CampaignEngine>, call_uuid: Uuid, duration: i64) {
    let payload = serde_json::json!({
        "call_uuid": call_uuid.to_string(),
        "from": "+14155550100",
        "to": "+919876543200",
        "duration": duration.to_string(),
        "status": "completed",
    });
    engine
        .callbacks()
        .handle_hangup(ProviderKind::Plivo, Some(call_uuid), &payload)
        .await
        .unwrap();
}

async fn wait_for_status(store: &Store, campaign_id: &str, expected: CampaignStatus) {
    for _ in 0..400 {
        if store.get_campaign_status(campaign_id).await.unwrap() == Some(expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("campaign {campaign_id} never reached {expected}");
}

async fn wait_for_aggregate(store: &Store, campaign_id: &str) {
    for _ in 0..400 {
        let campaign = store.get_campaign(campaign_id).await.unwrap().unwrap();
        if campaign.is_balance_updated {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("campaign {campaign_id} aggregate billing never ran");
}

#[tokio::test]
#[serial]
async fn happy_campaign_dials_bills_and_completes() {
    let store = Store::new_in_memory().await.unwrap();
    seed_tenant(&store, 1000).await;
    seed_list(&store, 3).await;
    let (engine, mock, mut dials) = create_test_engine(&store).await;

    let created = engine.clone().create_campaign(new_campaign()).await.unwrap();
    assert_eq!(created.status, CampaignStatus::Running);

    // each contact answers for 60 seconds
    for _ in 0..3 {
        let request = dials.recv().await.expect("originate expected");
        engine.callbacks().handle_ring(Some(request.call_uuid)).await.unwrap();
        deliver_hangup(&engine, request.call_uuid, 60).await;
    }

    wait_for_status(&store, &created.campaign_id, CampaignStatus::Completed).await;
    wait_for_aggregate(&store, &created.campaign_id).await;

    // 1000 - 3 * 60
    assert_eq!(store.get_tenant_balance("tenant-1").await.unwrap(), Some(820));

    let history = store.list_billing_history("tenant-1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].balance_count, -180);
    assert!(history[0].description.contains("3 calls"));
    assert_eq!(history[0].campaign_id.as_deref(), Some(created.campaign_id.as_str()));

    let progress = engine.get_campaign_progress(&created.campaign_id).await.unwrap();
    assert_eq!(progress.processed_contacts, 3);
    assert_eq!(progress.connected_calls, 3);
    assert_eq!(progress.failed_calls, 0);

    assert_eq!(mock.dialed_numbers().len(), 3);
}

#[tokio::test]
#[serial]
async fn pause_then_resume_dials_every_contact_exactly_once() {
    let store = Store::new_in_memory().await.unwrap();
    seed_tenant(&store, 10_000).await;
    seed_list(&store, 5).await;
    let (engine, mock, mut dials) = create_test_engine(&store).await;

    let created = engine.clone().create_campaign(new_campaign()).await.unwrap();

    // let two dials happen, then pause
    let first = dials.recv().await.unwrap();
    deliver_hangup(&engine, first.call_uuid, 10).await;
    let second = dials.recv().await.unwrap();
    deliver_hangup(&engine, second.call_uuid, 10).await;

    engine.pause_campaign(&created.campaign_id, "operator").await.unwrap();
    wait_for_status(&store, &created.campaign_id, CampaignStatus::Paused).await;

    let campaign = store.get_campaign(&created.campaign_id).await.unwrap().unwrap();
    assert!(campaign.heartbeat.is_none());
    assert_eq!(campaign.pause_reason.as_deref(), Some("manual"));
    // cooperative cancellation: at most one in-flight dial slipped through
    assert!((2..=3).contains(&campaign.current_index), "cursor was {}", campaign.current_index);

    // drain any dial that slipped through before the pause took effect
    while let Ok(request) = dials.try_recv() {
        deliver_hangup(&engine, request.call_uuid, 10).await;
    }

    engine.clone().resume_campaign(&created.campaign_id).await.unwrap();

    // answer everything still to come
    loop {
        match tokio::time::timeout(Duration::from_secs(2), dials.recv()).await {
            Ok(Some(request)) => deliver_hangup(&engine, request.call_uuid, 10).await,
            _ => break,
        }
    }

    wait_for_status(&store, &created.campaign_id, CampaignStatus::Completed).await;

    // every contact dialed exactly once, none skipped, none repeated
    let numbers = mock.dialed_numbers();
    assert_eq!(numbers.len(), 5);
    assert_eq!(numbers.iter().collect::<HashSet<_>>().len(), 5);

    let progress = engine.get_campaign_progress(&created.campaign_id).await.unwrap();
    assert_eq!(progress.processed_contacts, 5);
}

#[tokio::test]
#[serial]
async fn orphaned_campaign_is_adopted_and_finishes_from_cursor() {
    let store = Store::new_in_memory().await.unwrap();
    seed_tenant(&store, 10_000).await;
    seed_list(&store, 6).await;

    // a campaign left running by a container that died (no heartbeat)
    store
        .insert_campaign(
            "cmp-orphan", "tenant-1", "orphaned", "list-1", "+14155550100",
            "wss://bot.example.com/chat/v2/asst-1", None, CampaignStatus::Running, 6, None,
        )
        .await
        .unwrap();
    store.persist_campaign_cursor("cmp-orphan", 2).await.unwrap();

    let (engine, mock, mut dials) = create_test_engine(&store).await;

    let adopted = dialwave_campaign_engine::orchestrator::recover_orphans(&engine).await.unwrap();
    assert_eq!(adopted, 1);

    for _ in 0..4 {
        let request = dials.recv().await.unwrap();
        deliver_hangup(&engine, request.call_uuid, 15).await;
    }

    wait_for_status(&store, "cmp-orphan", CampaignStatus::Completed).await;

    // contacts 0 and 1 were dialed before the crash; only 2..=5 now
    let numbers = mock.dialed_numbers();
    assert_eq!(numbers.len(), 4);
    assert_eq!(numbers[0], "+919876543202");

    let campaign = store.get_campaign("cmp-orphan").await.unwrap().unwrap();
    assert_eq!(campaign.container_id.as_deref(), Some(engine.container_id()));
}

#[tokio::test]
#[serial]
async fn racing_supervisors_adopt_an_orphan_exactly_once() {
    let store = Store::new_in_memory().await.unwrap();
    seed_tenant(&store, 1000).await;
    seed_list(&store, 0).await;

    store
        .insert_campaign(
            "cmp-orphan", "tenant-1", "orphaned", "list-1", "+14155550100",
            "wss://bot.example.com/chat/v2/asst-1", None, CampaignStatus::Running, 0, None,
        )
        .await
        .unwrap();

    let (engine_a, _mock_a, _rx_a) = create_test_engine(&store).await;
    let (engine_b, _mock_b, _rx_b) = create_test_engine(&store).await;

    let (adopted_a, adopted_b) = tokio::join!(
        dialwave_campaign_engine::orchestrator::recover_orphans(&engine_a),
        dialwave_campaign_engine::orchestrator::recover_orphans(&engine_b),
    );

    assert_eq!(adopted_a.unwrap() + adopted_b.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn balance_exhaustion_auto_pauses_with_reason() {
    let store = Store::new_in_memory().await.unwrap();
    seed_tenant(&store, 30).await;
    seed_list(&store, 10).await;
    let (engine, _mock, mut dials) = create_test_engine(&store).await;

    // answer every dial immediately with a 20 second call
    let responder_engine = engine.clone();
    tokio::spawn(async move {
        while let Some(request) = dials.recv().await {
            deliver_hangup(&responder_engine, request.call_uuid, 20).await;
        }
    });

    let created = engine.clone().create_campaign(new_campaign()).await.unwrap();
    wait_for_status(&store, &created.campaign_id, CampaignStatus::Paused).await;

    let campaign = store.get_campaign(&created.campaign_id).await.unwrap().unwrap();
    assert_eq!(campaign.pause_reason.as_deref(), Some("insufficient_balance"));
    // the balance went negative transiently and the next check caught it
    let balance = store.get_tenant_balance("tenant-1").await.unwrap().unwrap();
    assert!(balance <= 0, "balance was {balance}");
    assert!(campaign.current_index < campaign.total_contacts);
}

#[tokio::test]
#[serial]
async fn zero_contact_campaign_completes_with_zero_billing() {
    let store = Store::new_in_memory().await.unwrap();
    seed_tenant(&store, 100).await;
    seed_list(&store, 0).await;
    let (engine, mock, _dials) = create_test_engine(&store).await;

    let created = engine.clone().create_campaign(new_campaign()).await.unwrap();

    wait_for_status(&store, &created.campaign_id, CampaignStatus::Completed).await;
    wait_for_aggregate(&store, &created.campaign_id).await;

    assert!(mock.dialed_numbers().is_empty());
    assert_eq!(store.get_tenant_balance("tenant-1").await.unwrap(), Some(100));

    let history = store.list_billing_history("tenant-1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].balance_count, 0);
}

#[tokio::test]
#[serial]
async fn rejected_numbers_count_failed_and_do_not_stop_the_campaign() {
    let store = Store::new_in_memory().await.unwrap();
    seed_tenant(&store, 1000).await;
    seed_list(&store, 3).await;
    let (engine, mock, mut dials) = create_test_engine(&store).await;
    mock.fail_number("+919876543201");

    let created = engine.clone().create_campaign(new_campaign()).await.unwrap();

    // only the two accepted dials reach the mock
    for _ in 0..2 {
        let request = dials.recv().await.unwrap();
        deliver_hangup(&engine, request.call_uuid, 5).await;
    }

    wait_for_status(&store, &created.campaign_id, CampaignStatus::Completed).await;

    let progress = engine.get_campaign_progress(&created.campaign_id).await.unwrap();
    assert_eq!(progress.processed_contacts, 3);
    assert_eq!(progress.connected_calls, 2);
    assert_eq!(progress.failed_calls, 1);
}

#[tokio::test]
#[serial]
async fn duplicate_hangup_webhook_reports_and_bills_once() {
    let store = Store::new_in_memory().await.unwrap();
    seed_tenant(&store, 1000).await;
    seed_list(&store, 1).await;
    let (engine, _mock, mut dials) = create_test_engine(&store).await;

    let created = engine.clone().create_campaign(new_campaign()).await.unwrap();
    let request = dials.recv().await.unwrap();

    let payload = serde_json::json!({
        "call_uuid": request.call_uuid.to_string(),
        "duration": "60",
        "status": "completed",
    });
    let first = engine
        .callbacks()
        .handle_hangup(ProviderKind::Plivo, Some(request.call_uuid), &payload)
        .await
        .unwrap();
    let second = engine
        .callbacks()
        .handle_hangup(ProviderKind::Plivo, Some(request.call_uuid), &payload)
        .await
        .unwrap();

    assert_eq!(first, WebhookOutcome::Recorded { billed: true });
    assert_eq!(second, WebhookOutcome::Duplicate);
    assert_eq!(store.get_tenant_balance("tenant-1").await.unwrap(), Some(940));

    wait_for_status(&store, &created.campaign_id, CampaignStatus::Completed).await;
}

#[tokio::test]
#[serial]
async fn scheduler_races_start_a_due_campaign_once() {
    let store = Store::new_in_memory().await.unwrap();
    seed_tenant(&store, 100).await;
    seed_list(&store, 0).await;

    let past = chrono::Utc::now() - chrono::Duration::seconds(5);
    store
        .insert_campaign(
            "cmp-due", "tenant-1", "due", "list-1", "+14155550100",
            "wss://bot.example.com/chat/v2/asst-1", None, CampaignStatus::Scheduled, 0,
            Some(past),
        )
        .await
        .unwrap();

    let (engine_a, _mock_a, _rx_a) = create_test_engine(&store).await;
    let (engine_b, _mock_b, _rx_b) = create_test_engine(&store).await;

    let (started_a, started_b) = tokio::join!(
        dialwave_campaign_engine::orchestrator::poll_scheduled(&engine_a),
        dialwave_campaign_engine::orchestrator::poll_scheduled(&engine_b),
    );

    assert_eq!(started_a.unwrap() + started_b.unwrap(), 1);
    wait_for_status(&store, "cmp-due", CampaignStatus::Completed).await;
}

#[tokio::test]
#[serial]
async fn illegal_transitions_are_refused_precisely() {
    let store = Store::new_in_memory().await.unwrap();
    seed_tenant(&store, 100).await;
    seed_list(&store, 0).await;
    let (engine, _mock, _dials) = create_test_engine(&store).await;

    let created = engine.clone().create_campaign(new_campaign()).await.unwrap();
    wait_for_status(&store, &created.campaign_id, CampaignStatus::Completed).await;

    let err = engine.clone().resume_campaign(&created.campaign_id).await.unwrap_err();
    match err {
        EngineError::IllegalTransition { from, to, .. } => {
            assert_eq!(from, CampaignStatus::Completed);
            assert_eq!(to, CampaignStatus::Running);
        }
        other => panic!("expected IllegalTransition, got {other}"),
    }

    let err = engine.pause_campaign(&created.campaign_id, "operator").await.unwrap_err();
    assert!(matches!(err, EngineError::IllegalTransition { .. }));

    let err = engine.clone().cancel_campaign("cmp-nope").await.unwrap_err();
    assert!(matches!(err, EngineError::CampaignNotFound(_)));
}

#[tokio::test]
#[serial]
async fn duplicate_campaign_names_are_rejected_per_tenant() {
    let store = Store::new_in_memory().await.unwrap();
    seed_tenant(&store, 100).await;
    seed_list(&store, 0).await;
    let (engine, _mock, _dials) = create_test_engine(&store).await;

    engine.clone().create_campaign(new_campaign()).await.unwrap();
    let err = engine.clone().create_campaign(new_campaign()).await.unwrap_err();
    assert!(matches!(err, EngineError::DuplicateCampaignName { .. }));
}

#[tokio::test]
#[serial]
async fn api_facades_cover_report_billing_and_balance_stream() {
    let store = Store::new_in_memory().await.unwrap();
    seed_tenant(&store, 1000).await;
    seed_list(&store, 2).await;
    let (engine, _mock, mut dials) = create_test_engine(&store).await;
    let server = CampaignServer::from_engine(engine.clone());

    let created = server
        .campaign_api()
        .create_campaign(new_campaign())
        .await
        .unwrap();

    for _ in 0..2 {
        let request = dials.recv().await.unwrap();
        deliver_hangup(&engine, request.call_uuid, 30).await;
    }
    wait_for_status(&store, &created.campaign_id, CampaignStatus::Completed).await;
    wait_for_aggregate(&store, &created.campaign_id).await;

    // paged report with totals
    let page = server
        .campaign_api()
        .get_report(&created.campaign_id, None, Some(1), ReportFilters::default())
        .await
        .unwrap();
    assert_eq!(page.records.len(), 1);
    assert_eq!(page.total_count, 2);
    assert_eq!(page.total_duration, 60);
    let rest = server
        .campaign_api()
        .get_report(&created.campaign_id, page.next_cursor, None, ReportFilters::default())
        .await
        .unwrap();
    assert_eq!(rest.records.len(), 1);
    assert!(rest.next_cursor.is_none());

    // per-call details and balance
    let details = server.billing_api().get_call_details("tenant-1", None, None).await.unwrap();
    assert_eq!(details.calls.len(), 2);
    assert_eq!(server.billing_api().get_balance("tenant-1").await.unwrap(), 940);

    // live balance events on top-up
    let mut balance_rx = server.billing_api().stream_balance("tenant-1");
    let new_balance = server
        .billing_api()
        .credit_tenant("tenant-1", 100, "Recharge")
        .await
        .unwrap();
    assert_eq!(new_balance, 1040);
    let event = balance_rx.recv().await.unwrap();
    assert_eq!(event.balance, 1040);
    assert_eq!(event.reason, "topup");

    // the ledger holds the campaign aggregate and the top-up
    let history = server.billing_api().get_aggregated_history("tenant-1").await.unwrap();
    assert!(history.aggregation_performed);
    assert_eq!(history.entries.len(), 2);
    let aggregate = history
        .entries
        .iter()
        .find(|e| e.campaign_id.as_deref() == Some(created.campaign_id.as_str()))
        .expect("campaign aggregate entry");
    assert_eq!(aggregate.balance_count, -60);

    // listing and record fetch round out the dashboard surface
    let listed = server.campaign_api().list_campaigns("tenant-1").await.unwrap();
    assert_eq!(listed.len(), 1);
    let record = server.campaign_api().get_campaign(&created.campaign_id).await.unwrap();
    assert!(record.is_balance_updated);

    let err = server
        .campaign_api()
        .get_report("cmp-missing", None, None, ReportFilters::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::CampaignNotFound(_)));
}

#[tokio::test]
#[serial]
async fn standalone_test_call_bills_with_immediate_ledger_entry() {
    let store = Store::new_in_memory().await.unwrap();
    seed_tenant(&store, 500).await;
    let (engine, _mock, mut dials) = create_test_engine(&store).await;

    let call_uuid = engine
        .originate_standalone_call(
            StandaloneCall::Test,
            "tenant-1",
            "+14155550100",
            "+919876543210",
            "wss://bot.example.com/chat/v2/asst-1",
            None,
        )
        .await
        .unwrap();

    let request = dials.recv().await.unwrap();
    assert_eq!(request.call_uuid, call_uuid);
    assert_eq!(request.campaign_id, "testcall");

    deliver_hangup(&engine, call_uuid, 30).await;

    assert_eq!(store.get_tenant_balance("tenant-1").await.unwrap(), Some(470));

    let history = store.list_billing_history("tenant-1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].balance_count, -30);
    assert!(history[0].description.contains("Test call"));

    let detail = store.get_billing_detail(&call_uuid.to_string()).await.unwrap().unwrap();
    assert_eq!(detail.call_type, "testcall");
}

#[tokio::test]
#[serial]
async fn server_wrapper_runs_scheduler_and_supervisor() {
    let store = Store::new_in_memory().await.unwrap();
    seed_tenant(&store, 100).await;
    seed_list(&store, 0).await;

    let engine = CampaignEngine::with_store(test_config(), store.clone()).unwrap();
    let (mock, _rx) = MockAdapter::new();
    engine.providers().insert(mock);

    let past = chrono::Utc::now() - chrono::Duration::seconds(5);
    store
        .insert_campaign(
            "cmp-due", "tenant-1", "due", "list-1", "+14155550100",
            "wss://bot.example.com/chat/v2/asst-1", None, CampaignStatus::Scheduled, 0,
            Some(past),
        )
        .await
        .unwrap();

    let mut server = CampaignServer::from_engine(engine);
    server.start().await.unwrap();

    // the scheduler loop picks the due campaign up on its own
    wait_for_status(&store, "cmp-due", CampaignStatus::Completed).await;

    server.stop().await.unwrap();
}
