//! Local device resolution.
//!
//! Decides which physical terminal at a register an attendance write came
//! from. The write itself never waits on this: an ambiguous answer only
//! means the event is stored without a terminal and the candidates go back
//! to the device.

use crate::error::ServerResult;
use crate::storage::admin::list_local_devices;
use rusqlite::{params, Connection};
use shiftpass_core::attendance::LocalDevice;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(LocalDevice),
    /// Zero or several devices and no usable candidate.
    Ambiguous(Vec<LocalDevice>),
}

impl Resolution {
    pub fn local_device_id(&self) -> Option<i64> {
        match self {
            Self::Resolved(device) => Some(device.id),
            Self::Ambiguous(_) => None,
        }
    }

    /// Candidates worth showing to the employee; empty unless there is a choice.
    pub fn candidates(&self) -> Vec<LocalDevice> {
        match self {
            Self::Ambiguous(devices) if devices.len() >= 2 => devices.clone(),
            _ => Vec::new(),
        }
    }
}

/// Resolve the terminal of a write at `register_id`.
///
/// A resolved device has its `last_seen_at` refreshed to `now`.
pub fn resolve(
    conn: &Connection,
    register_id: i64,
    candidate: Option<i64>,
    now: i64,
) -> ServerResult<Resolution> {
    let devices = list_local_devices(conn, register_id)?;

    let chosen = match candidate {
        Some(id) => match devices.iter().find(|d| d.id == id) {
            Some(device) => Some(device.clone()),
            None => {
                debug!("Local device {} is not at register {}", id, register_id);
                single(&devices)
            }
        },
        None => single(&devices),
    };

    match chosen {
        Some(mut device) => {
            touch(conn, device.id, now)?;
            device.last_seen_at = Some(now);
            Ok(Resolution::Resolved(device))
        }
        None => Ok(Resolution::Ambiguous(devices)),
    }
}

fn single(devices: &[LocalDevice]) -> Option<LocalDevice> {
    match devices {
        [only] => Some(only.clone()),
        _ => None,
    }
}

pub fn touch(conn: &Connection, local_device_id: i64, now: i64) -> ServerResult<()> {
    conn.execute(
        "UPDATE local_devices SET last_seen_at = ?1 WHERE local_device_id = ?2",
        params![now, local_device_id],
    )?;
    Ok(())
}
