//! Employee roster: registration, CRUD, and the session snapshot load.

use crate::crypto::EmbeddingCipher;
use crate::StoreError;
use rollcall_core::matcher::duplicate_of;
use rollcall_core::types::{Embedding, Identity, RosterSnapshot};
use rusqlite::{params, Connection};

/// Registration input for a new employee.
#[derive(Debug, Clone)]
pub struct NewEmployee {
    pub name: String,
    pub code: String,
    pub email: Option<String>,
    pub department: String,
}

/// One employee as listed for operators (no embedding).
#[derive(Debug, Clone)]
pub struct EmployeeRow {
    pub id: i64,
    pub name: String,
    pub code: Option<String>,
    pub email: Option<String>,
    pub department: Option<String>,
    pub created_at: String,
}

/// Roster access over one database connection.
pub struct RosterStore {
    conn: Connection,
    cipher: EmbeddingCipher,
}

impl RosterStore {
    pub fn new(conn: Connection, cipher: EmbeddingCipher) -> Self {
        Self { conn, cipher }
    }

    /// Hand the connection over, e.g. to an [`crate::AttendanceLedger`]
    /// after the session snapshot has been loaded.
    pub fn into_connection(self) -> Connection {
        self.conn
    }

    /// Register a new employee.
    ///
    /// Rejects a face within `register_tolerance` of any existing identity
    /// (the matcher would otherwise report the new person as an existing
    /// one). The scan is linear over the roster; fine at this scale.
    pub fn add_employee(
        &self,
        new: &NewEmployee,
        embedding: &Embedding,
        register_tolerance: f32,
    ) -> Result<i64, StoreError> {
        let roster = self.snapshot(Some(embedding.len()))?;
        if let Some(existing) = duplicate_of(embedding, &roster, register_tolerance) {
            return Err(StoreError::DuplicateFace {
                id: existing.id,
                name: existing.display_name.clone(),
            });
        }

        let blob = self.cipher.encrypt(&embedding.values)?;
        let result = self.conn.execute(
            "INSERT INTO employees (name, employee_code, email, embedding, department)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![new.name, new.code, new.email, blob, new.department],
        );

        match result {
            Ok(_) => {
                let id = self.conn.last_insert_rowid();
                tracing::info!(id, name = %new.name, code = %new.code, "employee registered");
                Ok(id)
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::CodeExists(new.code.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Load the immutable roster snapshot for a recognition session.
    ///
    /// `expected_len` guards against a roster written by a different
    /// embedder model: any row whose decrypted embedding length differs
    /// fails the load, since distances across dimensions are meaningless.
    pub fn snapshot(&self, expected_len: Option<usize>) -> Result<RosterSnapshot, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, embedding FROM employees ORDER BY id")?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut identities = Vec::new();
        for row in rows {
            let (id, name, blob) = row?;
            let values = self.cipher.decrypt(&blob)?;
            if let Some(expected) = expected_len {
                if values.len() != expected {
                    return Err(StoreError::EmbeddingLength {
                        id,
                        got: values.len(),
                        expected,
                    });
                }
            }
            identities.push(Identity {
                id,
                display_name: name,
                embedding: Embedding::new(values),
            });
        }

        Ok(RosterSnapshot::new(identities))
    }

    /// List all employees for operator display.
    pub fn employees(&self) -> Result<Vec<EmployeeRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, employee_code, email, department, created_at
             FROM employees ORDER BY id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(EmployeeRow {
                id: row.get(0)?,
                name: row.get(1)?,
                code: row.get(2)?,
                email: row.get(3)?,
                department: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;

        let mut employees = Vec::new();
        for row in rows {
            employees.push(row?);
        }
        Ok(employees)
    }

    /// Update employee data (everything except the embedding).
    pub fn update_employee(&self, id: i64, new: &NewEmployee) -> Result<(), StoreError> {
        let result = self.conn.execute(
            "UPDATE employees SET name = ?1, employee_code = ?2, email = ?3, department = ?4
             WHERE id = ?5",
            params![new.name, new.code, new.email, new.department, id],
        );

        match result {
            Ok(0) => Err(StoreError::NotFound(id)),
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::CodeExists(new.code.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete an employee and their attendance history in one transaction.
    pub fn delete_employee(&mut self, id: i64) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM attendance WHERE employee_id = ?1", params![id])?;
        let deleted = tx.execute("DELETE FROM employees WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(StoreError::NotFound(id));
        }
        tx.commit()?;
        tracing::info!(id, "employee deleted");
        Ok(())
    }
}
