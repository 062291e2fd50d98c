//! Table definitions for the relevance engine's aggregates.
//!
//! One table per aggregate; keys are `"{user_id}/{suffix}"` strings so
//! per-user scans are prefix scans and namespaces stay disjoint.

use redb::TableDefinition;

pub const MEMORIES: TableDefinition<'static, &str, &[u8]> = TableDefinition::new("memories");
pub const ENTITIES: TableDefinition<'static, &str, &[u8]> = TableDefinition::new("entities");
pub const RELATIONSHIPS: TableDefinition<'static, &str, &[u8]> =
    TableDefinition::new("relationships");
pub const OPEN_LOOPS: TableDefinition<'static, &str, &[u8]> = TableDefinition::new("open_loops");
pub const CONTEXT_FRAMES: TableDefinition<'static, &str, &[u8]> =
    TableDefinition::new("context_frames");
pub const TEMPORAL_PATTERNS: TableDefinition<'static, &str, &[u8]> =
    TableDefinition::new("temporal_patterns");
pub const ACCESS_LOG: TableDefinition<'static, &str, &[u8]> = TableDefinition::new("access_log");
pub const RECALL_SESSIONS: TableDefinition<'static, &str, &[u8]> =
    TableDefinition::new("recall_sessions");
pub const NOTIFICATIONS: TableDefinition<'static, &str, &[u8]> =
    TableDefinition::new("notifications");
pub const AUDIT: TableDefinition<'static, &str, &[u8]> = TableDefinition::new("audit");
pub const OBJECTS: TableDefinition<'static, &str, &[u8]> = TableDefinition::new("objects");

/// Every document-store table, for creation at open time.
pub const ALL_DOCUMENT_TABLES: [TableDefinition<'static, &str, &[u8]>; 10] = [
    MEMORIES,
    ENTITIES,
    RELATIONSHIPS,
    OPEN_LOOPS,
    CONTEXT_FRAMES,
    TEMPORAL_PATTERNS,
    ACCESS_LOG,
    RECALL_SESSIONS,
    NOTIFICATIONS,
    AUDIT,
];
