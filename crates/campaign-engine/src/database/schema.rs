//! Database schema
//!
//! Applied statement-by-statement on connect. Statements are idempotent so a
//! restarted container can share a database file with a live peer.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tenants (
    tenant_id TEXT PRIMARY KEY,
    available_balance INTEGER NOT NULL DEFAULT 0,
    max_concurrent_calls INTEGER NOT NULL DEFAULT 10,
    caller_numbers TEXT NOT NULL DEFAULT '[]',
    last_incoming_aggregation_time TEXT
);

CREATE TABLE IF NOT EXISTS contact_lists (
    list_id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    name TEXT NOT NULL DEFAULT '',
    contact_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS contacts (
    list_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    number TEXT NOT NULL DEFAULT '',
    first_name TEXT,
    email TEXT,
    fields TEXT NOT NULL DEFAULT '{}',
    PRIMARY KEY (list_id, position)
);

CREATE TABLE IF NOT EXISTS campaigns (
    campaign_id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    name TEXT NOT NULL,
    list_id TEXT NOT NULL,
    from_number TEXT NOT NULL,
    bot_ws_url TEXT NOT NULL,
    provider TEXT,
    status TEXT NOT NULL,
    current_index INTEGER NOT NULL DEFAULT 0,
    total_contacts INTEGER NOT NULL DEFAULT 0,
    processed_contacts INTEGER NOT NULL DEFAULT 0,
    connected_calls INTEGER NOT NULL DEFAULT 0,
    failed_calls INTEGER NOT NULL DEFAULT 0,
    heartbeat TEXT,
    last_activity TEXT,
    container_id TEXT,
    scheduled_time TEXT,
    paused_at TEXT,
    paused_by TEXT,
    pause_reason TEXT,
    resumed_at TEXT,
    cancelled_at TEXT,
    error_message TEXT,
    is_balance_updated INTEGER NOT NULL DEFAULT 0,
    billing_processed_at TEXT,
    created_at TEXT NOT NULL,
    UNIQUE (tenant_id, name)
);

CREATE INDEX IF NOT EXISTS idx_campaigns_status ON campaigns (status);

CREATE TABLE IF NOT EXISTS active_calls (
    call_uuid TEXT PRIMARY KEY,
    provider_call_id TEXT,
    tenant_id TEXT NOT NULL,
    campaign_id TEXT NOT NULL,
    from_number TEXT NOT NULL,
    to_number TEXT NOT NULL,
    status TEXT NOT NULL,
    provider TEXT NOT NULL,
    assistant_id TEXT,
    bot_ws_url TEXT,
    contact_meta TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    ring_time TEXT,
    stream_start_time TEXT,
    end_time TEXT
);

CREATE INDEX IF NOT EXISTS idx_active_calls_tenant_status ON active_calls (tenant_id, status);
CREATE INDEX IF NOT EXISTS idx_active_calls_campaign ON active_calls (campaign_id, status);

CREATE TABLE IF NOT EXISTS provider_call_map (
    provider_call_id TEXT PRIMARY KEY,
    call_uuid TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS hangup_records (
    call_uuid TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    campaign_id TEXT NOT NULL,
    assistant_id TEXT,
    from_number TEXT NOT NULL,
    to_number TEXT NOT NULL,
    duration INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    hangup_cause TEXT NOT NULL,
    start_time TEXT,
    answer_time TEXT,
    end_time TEXT,
    recording_url TEXT,
    source TEXT NOT NULL,
    provider TEXT NOT NULL,
    contact_meta TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_hangup_campaign ON hangup_records (campaign_id);

CREATE TABLE IF NOT EXISTS pending_recordings (
    call_uuid TEXT PRIMARY KEY,
    recording_url TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS billing_details (
    call_uuid TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    call_type TEXT NOT NULL,
    duration INTEGER NOT NULL DEFAULT 0,
    from_number TEXT NOT NULL,
    to_number TEXT NOT NULL,
    credits INTEGER NOT NULL DEFAULT 0,
    ai_credits INTEGER NOT NULL DEFAULT 0,
    telephony_credits INTEGER NOT NULL DEFAULT 0,
    campaign_id TEXT,
    campaign_name TEXT,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_billing_tenant_time ON billing_details (tenant_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_billing_campaign ON billing_details (campaign_id);

CREATE TABLE IF NOT EXISTS billing_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL,
    balance_count INTEGER NOT NULL,
    new_available_balance INTEGER NOT NULL,
    description TEXT NOT NULL,
    transaction_type TEXT NOT NULL,
    campaign_id TEXT,
    call_uuid TEXT,
    date TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_history_tenant_date ON billing_history (tenant_id, date);

CREATE TABLE IF NOT EXISTS rate_counters (
    bucket TEXT PRIMARY KEY,
    count INTEGER NOT NULL DEFAULT 0
);
"#;
