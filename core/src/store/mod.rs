//! SQLite persistence layer: the storage boundary around the engine.
//!
//! RULE: Only the store module talks to the database.
//! The engine never touches it; callers load histories, run the
//! engine, then hand results back here.

use crate::{
    clock::AsOfClock,
    error::AdherenceResult,
    event::{AdherenceEvent, EventLogEntry},
    types::RunId,
};
mod fill;
mod result;
use rusqlite::{params, Connection};

pub struct AdherenceStore {
    conn: Connection,
}

impl AdherenceStore {
    pub fn open(path: &str) -> AdherenceResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> AdherenceResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> AdherenceResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_fill_history.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_adherence_result.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_fill_identity.sql"))?;
        Ok(())
    }

    // ── Run ────────────────────────────────────────────────────

    /// Register a batch run and return its generated id.
    pub fn insert_run(&self, clock: &AsOfClock, version: &str) -> AdherenceResult<RunId> {
        let run_id = format!("run-{}-{}", clock.as_of, uuid::Uuid::new_v4());
        self.insert_run_with_id(&run_id, clock, version)?;
        Ok(run_id)
    }

    pub fn insert_run_with_id(
        &self,
        run_id: &str,
        clock: &AsOfClock,
        version: &str,
    ) -> AdherenceResult<()> {
        self.conn.execute(
            "INSERT INTO run (run_id, as_of, measurement_year, version) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, clock.as_of.to_string(), clock.measurement_year, version],
        )?;
        Ok(())
    }

    // ── Event log ──────────────────────────────────────────────

    /// Append `events` starting at sequence number `next_seq`.
    /// Returns the next free sequence number.
    pub fn append_events(
        &self,
        run_id: &str,
        next_seq: u64,
        events: &[AdherenceEvent],
    ) -> AdherenceResult<u64> {
        let tx = self.conn.unchecked_transaction()?;
        let mut seq = next_seq;
        for event in events {
            let entry = EventLogEntry::new(run_id, seq, event)?;
            tx.execute(
                "INSERT INTO event_log (run_id, seq, patient_id, event_type, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.run_id,
                    entry.seq as i64,
                    entry.patient_id,
                    entry.event_type,
                    entry.payload,
                ],
            )?;
            seq += 1;
        }
        tx.commit()?;
        Ok(seq)
    }

    pub fn events_for_run(&self, run_id: &str) -> AdherenceResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, seq, patient_id, event_type, payload
             FROM event_log WHERE run_id = ?1
             ORDER BY seq ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id], |row| {
                Ok(EventLogEntry {
                    id:         Some(row.get(0)?),
                    run_id:     row.get(1)?,
                    seq:        row.get::<_, i64>(2)? as u64,
                    patient_id: row.get(3)?,
                    event_type: row.get(4)?,
                    payload:    row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
