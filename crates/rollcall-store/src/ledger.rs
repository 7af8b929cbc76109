//! The attendance ledger: at most one "present" record per (employee, day).

use crate::StoreError;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{params, Connection};
use std::path::Path;

const STATUS_PRESENT: &str = "Present";

/// Outcome of a mark-present attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// A new record was inserted — first sighting of this person today.
    Recorded,
    /// A record for this (employee, day) already existed; nothing changed.
    AlreadyRecorded,
}

/// Contact details for the notification path.
#[derive(Debug, Clone)]
pub struct Contact {
    pub name: String,
    pub email: Option<String>,
}

/// One row of the operator attendance report.
#[derive(Debug, Clone)]
pub struct ReportRow {
    pub name: String,
    pub code: Option<String>,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: String,
}

/// Append-only presence ledger over one database connection.
///
/// Intended to be called from a single thread (the recognition loop); the
/// UNIQUE(employee_id, date) constraint still holds if a second process
/// shares the database file.
pub struct AttendanceLedger {
    conn: Connection,
}

impl AttendanceLedger {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(crate::db::open(path)?))
    }

    /// Record that an employee is present at `at`.
    ///
    /// The check and the insert are a single `INSERT OR IGNORE` riding the
    /// unique constraint, so two near-simultaneous sightings of the same
    /// person yield exactly one `Recorded` and the rest `AlreadyRecorded` —
    /// never two rows. Callers must not retry a failure within the same
    /// frame: if the insert actually landed and only the acknowledgment was
    /// lost, a retry could not break the invariant (the constraint holds)
    /// but would misreport a second `Recorded`.
    pub fn mark_present(
        &self,
        employee_id: i64,
        at: NaiveDateTime,
    ) -> Result<MarkOutcome, StoreError> {
        let date = at.date().format("%Y-%m-%d").to_string();
        let time = at.time().format("%H:%M:%S").to_string();

        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO attendance (employee_id, date, time, status)
             VALUES (?1, ?2, ?3, ?4)",
            params![employee_id, date, time, STATUS_PRESENT],
        )?;

        if inserted == 1 {
            tracing::info!(employee_id, %date, %time, "attendance recorded");
            Ok(MarkOutcome::Recorded)
        } else {
            Ok(MarkOutcome::AlreadyRecorded)
        }
    }

    /// Contact details for notifying an employee.
    pub fn lookup_contact(&self, employee_id: i64) -> Result<Contact, StoreError> {
        self.conn
            .query_row(
                "SELECT name, email FROM employees WHERE id = ?1",
                params![employee_id],
                |row| {
                    Ok(Contact {
                        name: row.get(0)?,
                        email: row.get(1)?,
                    })
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(employee_id),
                other => other.into(),
            })
    }

    /// Most recent attendance records joined with employee details,
    /// newest first.
    pub fn recent(&self, limit: u32) -> Result<Vec<ReportRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT e.name, e.employee_code, a.date, a.time, a.status
             FROM attendance a
             JOIN employees e ON e.id = a.employee_id
             ORDER BY a.date DESC, a.time DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut report = Vec::new();
        for row in rows {
            let (name, code, date, time, status) = row?;
            let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .map_err(|e| StoreError::BadRecord(format!("date {date:?}: {e}")))?;
            let time = NaiveTime::parse_from_str(&time, "%H:%M:%S")
                .map_err(|e| StoreError::BadRecord(format!("time {time:?}: {e}")))?;
            report.push(ReportRow { name, code, date, time, status });
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn ledger() -> AttendanceLedger {
        AttendanceLedger::new(db::open_in_memory().unwrap())
    }

    fn seed_employee(ledger: &AttendanceLedger, id: i64, name: &str, email: Option<&str>) {
        ledger
            .conn
            .execute(
                "INSERT INTO employees (id, name, employee_code, email, embedding)
                 VALUES (?1, ?2, ?3, ?4, x'00')",
                params![id, name, format!("E{id:03}"), email],
            )
            .unwrap();
    }

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    fn row_count(ledger: &AttendanceLedger) -> i64 {
        ledger
            .conn
            .query_row("SELECT COUNT(*) FROM attendance", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_first_mark_records_second_dedupes() {
        let ledger = ledger();
        seed_employee(&ledger, 1, "Alice", None);

        assert_eq!(
            ledger.mark_present(1, at("2024-01-01T09:00:00")).unwrap(),
            MarkOutcome::Recorded
        );
        assert_eq!(
            ledger.mark_present(1, at("2024-01-01T17:00:00")).unwrap(),
            MarkOutcome::AlreadyRecorded
        );
        assert_eq!(row_count(&ledger), 1);

        // The surviving record keeps the first sighting's time.
        let time: String = ledger
            .conn
            .query_row("SELECT time FROM attendance WHERE employee_id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(time, "09:00:00");
    }

    #[test]
    fn test_different_dates_make_distinct_records() {
        let ledger = ledger();
        seed_employee(&ledger, 1, "Alice", None);

        assert_eq!(
            ledger.mark_present(1, at("2024-01-01T09:00:00")).unwrap(),
            MarkOutcome::Recorded
        );
        assert_eq!(
            ledger.mark_present(1, at("2024-01-02T09:00:00")).unwrap(),
            MarkOutcome::Recorded
        );
        assert_eq!(row_count(&ledger), 2);
    }

    #[test]
    fn test_different_employees_same_day() {
        let ledger = ledger();
        seed_employee(&ledger, 1, "Alice", None);
        seed_employee(&ledger, 2, "Bob", None);

        assert_eq!(
            ledger.mark_present(1, at("2024-01-01T09:00:00")).unwrap(),
            MarkOutcome::Recorded
        );
        assert_eq!(
            ledger.mark_present(2, at("2024-01-01T09:00:05")).unwrap(),
            MarkOutcome::Recorded
        );
        assert_eq!(row_count(&ledger), 2);
    }

    #[test]
    fn test_lookup_contact() {
        let ledger = ledger();
        seed_employee(&ledger, 1, "Alice", Some("alice@example.com"));

        let contact = ledger.lookup_contact(1).unwrap();
        assert_eq!(contact.name, "Alice");
        assert_eq!(contact.email.as_deref(), Some("alice@example.com"));

        assert!(matches!(ledger.lookup_contact(99), Err(StoreError::NotFound(99))));
    }

    #[test]
    fn test_recent_report_joins_and_orders() {
        let ledger = ledger();
        seed_employee(&ledger, 1, "Alice", None);
        seed_employee(&ledger, 2, "Bob", None);

        ledger.mark_present(1, at("2024-01-01T09:00:00")).unwrap();
        ledger.mark_present(2, at("2024-01-02T08:30:00")).unwrap();

        let report = ledger.recent(10).unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].name, "Bob");
        assert_eq!(report[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(report[1].name, "Alice");
        assert_eq!(report[1].status, "Present");
    }

    #[test]
    fn test_recent_respects_limit() {
        let ledger = ledger();
        seed_employee(&ledger, 1, "Alice", None);
        for day in 1..=5 {
            ledger
                .mark_present(1, at(&format!("2024-01-0{day}T09:00:00")))
                .unwrap();
        }
        assert_eq!(ledger.recent(3).unwrap().len(), 3);
    }
}
