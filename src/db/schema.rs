//! Fixed relational schema (spec §3). Applied idempotently at startup —
//! there is no separate migration runner; every statement is
//! `CREATE TABLE IF NOT EXISTS`, matching how the teacher crate's SQLite
//! consumers bring their own tables up rather than relying on a
//! compile-time-checked migration macro.

/// All `CREATE TABLE`/`CREATE INDEX` statements, applied in order inside a
/// single transaction by [`super::Db::migrate`].
pub const STATEMENTS: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS organizations (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        slug TEXT NOT NULL UNIQUE,
        settings TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS user_accounts (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        password_salt TEXT NOT NULL,
        org_id TEXT NOT NULL REFERENCES organizations(id),
        verified INTEGER NOT NULL DEFAULT 0,
        locked_until TEXT,
        failed_attempts INTEGER NOT NULL DEFAULT 0,
        account_status TEXT NOT NULL DEFAULT 'pending_review',
        created_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS agent_pool (
        org_id TEXT PRIMARY KEY REFERENCES organizations(id),
        max_agents INTEGER NOT NULL,
        active_agents INTEGER NOT NULL DEFAULT 0
    )"#,
    r#"CREATE TABLE IF NOT EXISTS agent_channels (
        agent_id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL REFERENCES organizations(id),
        display_name TEXT NOT NULL,
        phone_number TEXT,
        whatsapp_sender_sid TEXT,
        email_address TEXT,
        voice_id TEXT,
        system_prompt TEXT,
        greeting TEXT,
        blocked_channels TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'active',
        callback_url TEXT,
        created_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_agent_channels_org ON agent_channels(org_id)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_agent_channels_phone ON agent_channels(phone_number) WHERE phone_number IS NOT NULL",
    r#"CREATE TABLE IF NOT EXISTS whatsapp_pool (
        phone_number TEXT PRIMARY KEY,
        sender_sid TEXT NOT NULL UNIQUE,
        org_id TEXT NOT NULL REFERENCES organizations(id),
        status TEXT NOT NULL DEFAULT 'available',
        assigned_to_agent TEXT
    )"#,
    r#"CREATE TABLE IF NOT EXISTS number_pool (
        phone_number TEXT PRIMARY KEY,
        org_id TEXT NOT NULL REFERENCES organizations(id),
        country_code TEXT NOT NULL,
        capabilities TEXT NOT NULL DEFAULT '',
        is_default INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_number_pool_org_country ON number_pool(org_id, country_code)",
    r#"CREATE TABLE IF NOT EXISTS agent_tokens (
        token_hash TEXT PRIMARY KEY,
        agent_id TEXT NOT NULL REFERENCES agent_channels(agent_id),
        org_id TEXT NOT NULL REFERENCES organizations(id),
        label TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        revoked_at TEXT,
        last_used_at TEXT
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_agent_tokens_agent ON agent_tokens(agent_id)",
    r#"CREATE TABLE IF NOT EXISTS org_tokens (
        token_hash TEXT PRIMARY KEY,
        org_id TEXT NOT NULL REFERENCES organizations(id),
        label TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        revoked_at TEXT
    )"#,
    r#"CREATE TABLE IF NOT EXISTS usage_logs (
        id TEXT PRIMARY KEY,
        agent_id TEXT NOT NULL,
        org_id TEXT NOT NULL,
        action_type TEXT NOT NULL,
        channel TEXT NOT NULL,
        target_address TEXT NOT NULL,
        cost REAL NOT NULL DEFAULT 0,
        external_id TEXT,
        created_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_usage_logs_agent_time ON usage_logs(agent_id, created_at)",
    r#"CREATE TABLE IF NOT EXISTS audit_log (
        id TEXT PRIMARY KEY,
        org_id TEXT,
        timestamp TEXT NOT NULL,
        event_type TEXT NOT NULL,
        actor TEXT NOT NULL,
        target TEXT,
        details TEXT,
        prev_hash TEXT,
        row_hash TEXT NOT NULL,
        rowid_seq INTEGER
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_audit_log_ts ON audit_log(timestamp)",
    r#"CREATE TABLE IF NOT EXISTS dead_letters (
        id TEXT PRIMARY KEY,
        agent_id TEXT NOT NULL,
        org_id TEXT NOT NULL,
        channel TEXT NOT NULL,
        direction TEXT NOT NULL,
        reason TEXT NOT NULL,
        from_address TEXT,
        to_address TEXT,
        body TEXT,
        media_url TEXT,
        original_request TEXT,
        error_details TEXT,
        external_id TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        created_at TEXT NOT NULL,
        acknowledged_at TEXT
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_dead_letters_agent_status ON dead_letters(agent_id, status, created_at)",
    r#"CREATE TABLE IF NOT EXISTS spending_limits (
        agent_id TEXT PRIMARY KEY REFERENCES agent_channels(agent_id),
        max_actions_per_minute INTEGER,
        max_actions_per_hour INTEGER,
        max_actions_per_day INTEGER,
        max_spend_per_day REAL,
        max_spend_per_month REAL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS billing_config (
        agent_id TEXT PRIMARY KEY REFERENCES agent_channels(agent_id),
        tier TEXT NOT NULL DEFAULT 'free',
        markup_percent REAL NOT NULL DEFAULT 0,
        billing_email TEXT
    )"#,
    r#"CREATE TABLE IF NOT EXISTS call_logs (
        id TEXT PRIMARY KEY,
        agent_id TEXT NOT NULL,
        org_id TEXT NOT NULL,
        call_sid TEXT NOT NULL,
        direction TEXT NOT NULL,
        from_address TEXT NOT NULL,
        to_address TEXT NOT NULL,
        status TEXT NOT NULL,
        duration_seconds INTEGER,
        transfer_to TEXT,
        ended_at TEXT,
        created_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS erasure_requests (
        id TEXT PRIMARY KEY,
        subject_identifier TEXT NOT NULL,
        identifier_type TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        tables_affected TEXT NOT NULL DEFAULT '',
        rows_deleted INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        completed_at TEXT
    )"#,
    r#"CREATE TABLE IF NOT EXISTS dnc_list (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        phone_number TEXT,
        email_address TEXT,
        reason TEXT NOT NULL,
        added_by TEXT NOT NULL,
        added_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_dnc_phone ON dnc_list(org_id, phone_number)",
    "CREATE INDEX IF NOT EXISTS idx_dnc_email ON dnc_list(org_id, email_address)",
    r#"CREATE TABLE IF NOT EXISTS otp_codes (
        id TEXT PRIMARY KEY,
        contact_address TEXT NOT NULL,
        code_hash TEXT NOT NULL,
        purpose TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        consumed_at TEXT,
        created_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS provider_credentials (
        org_id TEXT NOT NULL,
        provider TEXT NOT NULL,
        ciphertext TEXT NOT NULL,
        nonce TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (org_id, provider)
    )"#,
];
