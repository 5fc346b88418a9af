//! Persisted attendance events.
//!
//! Events are insert-only. The single permitted change is filling a missing
//! `local_device_id` once.

use crate::error::ServerResult;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use shiftpass_core::attendance::{AttendanceEvent, AttendanceKind, AttendancePayload, Geolocation};
use uuid::Uuid;

const EVENT_COLUMNS: &str = "event_id, kind, employee_id, register_id, retail_id, timestamp,
     latitude, longitude, accuracy, local_device_id";

pub fn insert_event(
    conn: &Connection,
    employee_id: &Uuid,
    retail_id: i64,
    payload: &AttendancePayload,
    local_device_id: Option<i64>,
    timestamp: i64,
) -> ServerResult<AttendanceEvent> {
    conn.execute(
        "INSERT INTO attendance_events
            (employee_id, kind, register_id, retail_id, timestamp,
             latitude, longitude, accuracy, local_device_id, reason)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            employee_id.to_string(),
            payload.kind.as_str(),
            payload.register_id,
            retail_id,
            timestamp,
            payload.location.latitude,
            payload.location.longitude,
            payload.location.accuracy,
            local_device_id,
            payload.reason,
        ],
    )?;

    Ok(AttendanceEvent {
        id: conn.last_insert_rowid(),
        kind: payload.kind,
        employee_id: *employee_id,
        register_id: payload.register_id,
        retail_id,
        timestamp,
        location: payload.location,
        local_device_id,
    })
}

/// Load an event owned by `employee_id`.
pub fn load_event(
    conn: &Connection,
    event_id: i64,
    employee_id: &Uuid,
) -> ServerResult<Option<AttendanceEvent>> {
    let event = conn
        .query_row(
            &format!(
                "SELECT {} FROM attendance_events WHERE event_id = ?1 AND employee_id = ?2",
                EVENT_COLUMNS
            ),
            params![event_id, employee_id.to_string()],
            row_to_event,
        )
        .optional()?;
    Ok(event)
}

/// Set `local_device_id` if it is still empty. Returns false when it was already set.
pub fn fill_local_device(conn: &Connection, event_id: i64, local_device_id: i64) -> ServerResult<bool> {
    let updated = conn.execute(
        "UPDATE attendance_events SET local_device_id = ?1
         WHERE event_id = ?2 AND local_device_id IS NULL",
        params![local_device_id, event_id],
    )?;
    Ok(updated == 1)
}

/// History page, newest first.
pub fn list_events(
    conn: &Connection,
    employee_id: &Uuid,
    retail_id: Option<i64>,
    limit: u32,
    skip: u32,
) -> ServerResult<Vec<AttendanceEvent>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM attendance_events
         WHERE employee_id = ?1 AND (?2 IS NULL OR retail_id = ?2)
         ORDER BY timestamp DESC, event_id DESC
         LIMIT ?3 OFFSET ?4",
        EVENT_COLUMNS
    ))?;

    let events = stmt
        .query_map(
            params![employee_id.to_string(), retail_id, limit, skip],
            row_to_event,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(events)
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<AttendanceEvent> {
    let kind: String = row.get(1)?;
    let kind = AttendanceKind::parse(&kind)
        .ok_or_else(|| rusqlite::Error::InvalidColumnType(1, "kind".to_string(), Type::Text))?;
    let employee_id: String = row.get(2)?;
    let employee_id = Uuid::parse_str(&employee_id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

    Ok(AttendanceEvent {
        id: row.get(0)?,
        kind,
        employee_id,
        register_id: row.get(3)?,
        retail_id: row.get(4)?,
        timestamp: row.get(5)?,
        location: Geolocation {
            latitude: row.get(6)?,
            longitude: row.get(7)?,
            accuracy: row.get(8)?,
        },
        local_device_id: row.get(9)?,
    })
}
