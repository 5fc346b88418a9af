//! Administrative data: employees, retails, registers and local devices.

use super::models::{Employee, Register, Retail};
use crate::error::{ServerError, ServerResult};
use rusqlite::{params, Connection, OptionalExtension};
use shiftpass_core::attendance::LocalDevice;
use uuid::Uuid;

pub fn load_employee(conn: &Connection, employee_id: &Uuid) -> ServerResult<Option<Employee>> {
    let employee = conn
        .query_row(
            "SELECT first_name, last_name, email, phone FROM employees WHERE employee_id = ?1",
            [employee_id.to_string()],
            |row| {
                Ok(Employee {
                    employee_id: *employee_id,
                    first_name: row.get(0)?,
                    last_name: row.get(1)?,
                    email: row.get(2)?,
                    phone: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(employee)
}

pub fn add_retail(conn: &Connection, name: &str) -> ServerResult<Retail> {
    let name = non_empty("name", name)?;
    conn.execute("INSERT INTO retails (name) VALUES (?1)", [name])?;
    Ok(Retail {
        retail_id: conn.last_insert_rowid(),
        name: name.to_string(),
    })
}

pub fn add_register(
    conn: &Connection,
    retail_id: i64,
    name: &str,
    latitude: f64,
    longitude: f64,
) -> ServerResult<Register> {
    let name = non_empty("name", name)?;
    let retail_exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM retails WHERE retail_id = ?1)",
        [retail_id],
        |row| row.get(0),
    )?;
    if !retail_exists {
        return Err(ServerError::NotFound(format!("retail {}", retail_id)));
    }

    conn.execute(
        "INSERT INTO registers (retail_id, name, latitude, longitude) VALUES (?1, ?2, ?3, ?4)",
        params![retail_id, name, latitude, longitude],
    )?;
    Ok(Register {
        register_id: conn.last_insert_rowid(),
        retail_id,
        name: name.to_string(),
        latitude,
        longitude,
    })
}

pub fn find_register(conn: &Connection, register_id: i64) -> ServerResult<Option<Register>> {
    let register = conn
        .query_row(
            "SELECT retail_id, name, latitude, longitude FROM registers WHERE register_id = ?1",
            [register_id],
            |row| {
                Ok(Register {
                    register_id,
                    retail_id: row.get(0)?,
                    name: row.get(1)?,
                    latitude: row.get(2)?,
                    longitude: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(register)
}

/// Allow an employee to record attendance at a register.
pub fn assign_register(conn: &Connection, employee_id: &Uuid, register_id: i64) -> ServerResult<()> {
    if load_employee(conn, employee_id)?.is_none() {
        return Err(ServerError::NotFound(format!("employee {}", employee_id)));
    }
    if find_register(conn, register_id)?.is_none() {
        return Err(ServerError::NotFound(format!("register {}", register_id)));
    }
    conn.execute(
        "INSERT OR IGNORE INTO employee_registers (employee_id, register_id) VALUES (?1, ?2)",
        params![employee_id.to_string(), register_id],
    )?;
    Ok(())
}

pub fn is_assigned(conn: &Connection, employee_id: &Uuid, register_id: i64) -> ServerResult<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM employee_registers WHERE employee_id = ?1 AND register_id = ?2)",
        params![employee_id.to_string(), register_id],
        |row| row.get(0),
    )?)
}

/// Registers assigned to an employee, with the name of their retail.
pub fn assigned_registers(
    conn: &Connection,
    employee_id: &Uuid,
) -> ServerResult<Vec<(Register, String)>> {
    let mut stmt = conn.prepare(
        "SELECT r.register_id, r.retail_id, r.name, r.latitude, r.longitude, t.name
         FROM employee_registers er
         JOIN registers r ON r.register_id = er.register_id
         JOIN retails t ON t.retail_id = r.retail_id
         WHERE er.employee_id = ?1
         ORDER BY r.register_id",
    )?;

    let rows = stmt
        .query_map([employee_id.to_string()], |row| {
            Ok((
                Register {
                    register_id: row.get(0)?,
                    retail_id: row.get(1)?,
                    name: row.get(2)?,
                    latitude: row.get(3)?,
                    longitude: row.get(4)?,
                },
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn add_local_device(
    conn: &Connection,
    register_id: i64,
    label: &str,
    now: i64,
) -> ServerResult<LocalDevice> {
    let label = non_empty("label", label)?;
    if find_register(conn, register_id)?.is_none() {
        return Err(ServerError::NotFound(format!("register {}", register_id)));
    }
    conn.execute(
        "INSERT INTO local_devices (register_id, label, created_at) VALUES (?1, ?2, ?3)",
        params![register_id, label, now],
    )?;
    Ok(LocalDevice {
        id: conn.last_insert_rowid(),
        register_id,
        label: label.to_string(),
        last_seen_at: None,
    })
}

/// Delete a local device. Attendance events that reference it are left as they are.
pub fn remove_local_device(conn: &Connection, local_device_id: i64) -> ServerResult<bool> {
    let removed = conn.execute(
        "DELETE FROM local_devices WHERE local_device_id = ?1",
        [local_device_id],
    )?;
    Ok(removed > 0)
}

pub fn list_local_devices(conn: &Connection, register_id: i64) -> ServerResult<Vec<LocalDevice>> {
    let mut stmt = conn.prepare(
        "SELECT local_device_id, register_id, label, last_seen_at
         FROM local_devices WHERE register_id = ?1
         ORDER BY local_device_id",
    )?;
    let devices = stmt
        .query_map([register_id], |row| {
            Ok(LocalDevice {
                id: row.get(0)?,
                register_id: row.get(1)?,
                label: row.get(2)?,
                last_seen_at: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(devices)
}

fn non_empty<'a>(field: &str, value: &'a str) -> ServerResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        Err(ServerError::validation(field, "must not be empty"))
    } else {
        Ok(value)
    }
}
