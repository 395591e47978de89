//! Database schema

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS visitor_profiles (
    visitor_id TEXT PRIMARY KEY,
    profile TEXT NOT NULL,
    total_conversations INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// Settings key naming the visitor this installation belongs to
pub const CURRENT_VISITOR_KEY: &str = "current_visitor";
