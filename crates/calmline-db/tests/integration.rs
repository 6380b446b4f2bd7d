use calmline_db::{create_memory_pool, run_migrations};

#[test]
fn db_initialization_creates_call_tables() {
    let pool = create_memory_pool().expect("failed to create pool");
    let conn = pool.get().expect("failed to get connection");
    let applied = run_migrations(&conn).expect("failed to run migrations");
    assert_eq!(applied, 6);

    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master
             WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '\\_%' ESCAPE '\\'
             ORDER BY name",
        )
        .expect("failed to prepare table query");
    let tables: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .expect("failed to execute table query")
        .map(|r| r.expect("failed to read table name"))
        .collect();

    assert_eq!(
        tables,
        vec![
            "conversation_turns",
            "escalation_events",
            "intake_records",
            "knowledge_entries",
            "practice_profiles",
            "staff_notifications",
        ]
    );
}

#[test]
fn escalation_event_ids_are_unique() {
    let pool = create_memory_pool().expect("failed to create pool");
    let conn = pool.get().expect("failed to get connection");
    run_migrations(&conn).expect("failed to run migrations");

    let insert = "INSERT INTO escalation_events
        (event_id, call_id, tenant_id, priority, reason, action, transcript_excerpt, occurred_at)
        VALUES ('evt-1', 'CA1', 'default', 'CRISIS', 'r', 'a', 't', datetime('now'))";
    conn.execute(insert, []).expect("first insert");
    assert!(conn.execute(insert, []).is_err(), "duplicate event id must fail");
}
