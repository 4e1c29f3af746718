//! SQL schema for the Attest SQLite stores.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Ledger DDL; idempotent thanks to `IF NOT EXISTS`.
pub const LEDGER_SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = FULL;
PRAGMA foreign_keys = ON;

-- The version log is strictly append-only; the triggers below abort any
-- UPDATE or DELETE.
CREATE TABLE IF NOT EXISTS fact_versions (
    seq                INTEGER PRIMARY KEY AUTOINCREMENT,
    fact_id            TEXT    NOT NULL,
    version            INTEGER NOT NULL CHECK (version >= 1),
    supersedes         INTEGER REFERENCES fact_versions(seq),
    revision           INTEGER NOT NULL,
    retry_count        INTEGER NOT NULL,
    kind               TEXT    NOT NULL,
    subject_id         TEXT    NOT NULL,
    content_json       TEXT    NOT NULL,
    citations_json     TEXT    NOT NULL,
    proposer_json      TEXT    NOT NULL,
    initial_confidence INTEGER NOT NULL,   -- basis points
    deltas_json        TEXT    NOT NULL,
    final_confidence   INTEGER NOT NULL,   -- basis points
    status             TEXT    NOT NULL,
    annotation         TEXT,
    reason             TEXT    NOT NULL CHECK (length(trim(reason)) > 0),
    relations_json     TEXT    NOT NULL,
    created_at         TEXT    NOT NULL,   -- RFC 3339 UTC
    status_changed_at  TEXT    NOT NULL,
    UNIQUE (fact_id, version),
    CHECK ((version = 1) = (supersedes IS NULL))
);

CREATE TRIGGER IF NOT EXISTS fact_versions_no_update
BEFORE UPDATE ON fact_versions
BEGIN
    SELECT RAISE(ABORT, 'fact_versions is append-only');
END;

CREATE TRIGGER IF NOT EXISTS fact_versions_no_delete
BEFORE DELETE ON fact_versions
BEGIN
    SELECT RAISE(ABORT, 'fact_versions is append-only');
END;

-- Identity -> current record key, plus the currently accepted record key.
-- Updated in the same transaction as every append.
CREATE TABLE IF NOT EXISTS current_versions (
    fact_id      TEXT    PRIMARY KEY,
    seq          INTEGER NOT NULL REFERENCES fact_versions(seq),
    version      INTEGER NOT NULL,
    accepted_seq INTEGER REFERENCES fact_versions(seq)
);

-- An accepted version replaced by a later accepted version.
CREATE TABLE IF NOT EXISTS supersessions (
    old_seq     INTEGER PRIMARY KEY REFERENCES fact_versions(seq),
    new_seq     INTEGER NOT NULL UNIQUE REFERENCES fact_versions(seq),
    fact_id     TEXT    NOT NULL,
    recorded_at TEXT    NOT NULL,
    CHECK (old_seq < new_seq)
);

CREATE INDEX IF NOT EXISTS fact_versions_fact_idx    ON fact_versions(fact_id, version);
CREATE INDEX IF NOT EXISTS fact_versions_status_idx  ON fact_versions(status, seq);
CREATE INDEX IF NOT EXISTS fact_versions_subject_idx ON fact_versions(subject_id);

PRAGMA user_version = 1;
";

/// Derived-store DDL. Every table here can be dropped and rebuilt from the
/// ledger's accepted stream.
pub const PROJECTION_SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS fact_summary (
    fact_id     TEXT    PRIMARY KEY,
    version     INTEGER NOT NULL,
    seq         INTEGER NOT NULL,
    subject_id  TEXT    NOT NULL,
    kind        TEXT    NOT NULL,
    claim       TEXT    NOT NULL,
    value_json  TEXT    NOT NULL,
    confidence  INTEGER NOT NULL,
    annotation  TEXT,
    accepted_at TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS search_terms (
    token   TEXT    NOT NULL,
    fact_id TEXT    NOT NULL,
    version INTEGER NOT NULL,
    PRIMARY KEY (token, fact_id, version)
);

CREATE TABLE IF NOT EXISTS sync_feed (
    fact_id      TEXT    NOT NULL,
    version      INTEGER NOT NULL,
    seq          INTEGER NOT NULL,
    payload_json TEXT    NOT NULL,
    PRIMARY KEY (fact_id, version)
);

CREATE TABLE IF NOT EXISTS projection_state (
    key   TEXT    PRIMARY KEY,
    value INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS fact_summary_subject_idx ON fact_summary(subject_id);
CREATE INDEX IF NOT EXISTS sync_feed_seq_idx        ON sync_feed(seq);

PRAGMA user_version = 1;
";
