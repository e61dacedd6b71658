//! v001 -- Initial schema creation.
//!
//! Creates the full client schema: contacts, threads, groups and their
//! member/key tables, communities, messages, attachments, durable jobs,
//! config dumps, retrieval cursors, and the identity row.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Contacts
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS contacts (
    account_id     TEXT PRIMARY KEY NOT NULL,  -- hex-encoded 33-byte account id
    name           TEXT NOT NULL DEFAULT '',
    nickname       TEXT,
    picture_url    TEXT,
    picture_key    BLOB,
    is_approved    INTEGER NOT NULL DEFAULT 0,
    did_approve_me INTEGER NOT NULL DEFAULT 0,
    is_blocked     INTEGER NOT NULL DEFAULT 0,
    created_at     TEXT NOT NULL               -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Conversation threads
--
-- A thread exists only while the conversation is visible; hiding a
-- conversation deletes its thread (and, via cascade, its messages).
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS threads (
    id         TEXT PRIMARY KEY NOT NULL,      -- account id hex or community key
    kind       INTEGER NOT NULL,               -- 0=direct, 1=group, 2=community
    priority   INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Groups
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS groups (
    id            TEXT PRIMARY KEY NOT NULL,   -- group account id, hex
    name          TEXT NOT NULL,
    identity_seed BLOB,                        -- 32 bytes, admins only
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id    TEXT NOT NULL,
    member_id   TEXT NOT NULL,                 -- member account id, hex
    role        INTEGER NOT NULL,              -- 0=admin, 1=standard, 2=zombie
    role_status INTEGER NOT NULL,              -- 0=pending, 1=accepted, 2=failed
    added_at    TEXT NOT NULL,

    PRIMARY KEY (group_id, member_id),
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS group_key_pairs (
    group_id    TEXT NOT NULL,
    public_key  TEXT NOT NULL,                 -- hex-encoded 32 bytes
    secret_key  BLOB NOT NULL,                 -- 32 bytes
    received_at TEXT NOT NULL,

    PRIMARY KEY (group_id, public_key),
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_group_key_pairs_received
    ON group_key_pairs(group_id, received_at DESC);

-- ----------------------------------------------------------------
-- Communities
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS communities (
    key             TEXT PRIMARY KEY NOT NULL, -- normalized "server_url/room"
    server_url      TEXT NOT NULL,
    room            TEXT NOT NULL,
    server_pubkey   TEXT NOT NULL,             -- hex-encoded 32 bytes
    capabilities    TEXT NOT NULL DEFAULT '[]',-- JSON array of strings
    last_message_id INTEGER NOT NULL DEFAULT 0,
    last_inbox_id   INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    thread_id   TEXT NOT NULL,
    sender      TEXT NOT NULL,                 -- account id hex
    body        TEXT,
    sent_at     TEXT NOT NULL,                 -- sender clock
    received_at TEXT NOT NULL,                 -- local clock
    is_outgoing INTEGER NOT NULL DEFAULT 0,
    status      INTEGER NOT NULL DEFAULT 0,    -- 0=received, 1=sending, 2=sent, 3=failed

    FOREIGN KEY (thread_id) REFERENCES threads(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_thread_sent
    ON messages(thread_id, sent_at DESC);

-- ----------------------------------------------------------------
-- Attachments
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS attachments (
    id         TEXT PRIMARY KEY NOT NULL,      -- UUID v4
    message_id TEXT,                           -- nullable until linked
    remote_url TEXT,                           -- set once uploaded
    key        BLOB,                           -- content encryption key
    size       INTEGER NOT NULL DEFAULT 0,
    uploaded   INTEGER NOT NULL DEFAULT 0,

    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments(message_id);

-- ----------------------------------------------------------------
-- Durable jobs
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS jobs (
    id                TEXT PRIMARY KEY NOT NULL, -- UUID v4
    variant           TEXT NOT NULL,
    thread_id         TEXT,
    details           BLOB NOT NULL,
    failure_count     INTEGER NOT NULL DEFAULT 0,
    max_failure_count INTEGER NOT NULL DEFAULT 10,
    uniqueness_key    TEXT,
    next_attempt_at   TEXT,
    created_at        TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_uniqueness
    ON jobs(uniqueness_key) WHERE uniqueness_key IS NOT NULL;

-- ----------------------------------------------------------------
-- Config dumps (serialized ConfigObject state, per namespace and owner)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS config_dumps (
    namespace  INTEGER NOT NULL,
    owner      TEXT NOT NULL,                  -- account id hex
    dump       BLOB NOT NULL,
    updated_at TEXT NOT NULL,

    PRIMARY KEY (namespace, owner)
);

-- ----------------------------------------------------------------
-- Swarm retrieval cursors and processed-message dedup
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS last_hashes (
    target    TEXT NOT NULL,                   -- polled identity, hex
    namespace INTEGER NOT NULL,
    last_hash TEXT NOT NULL,

    PRIMARY KEY (target, namespace)
);

CREATE TABLE IF NOT EXISTS seen_messages (
    hash    TEXT PRIMARY KEY NOT NULL,         -- blake3 of the raw envelope
    seen_at TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Identity (single row)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS identity (
    id   INTEGER PRIMARY KEY CHECK (id = 0),
    seed BLOB NOT NULL                         -- 32 bytes
);
"#;

/// Apply the v001 schema.
pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
