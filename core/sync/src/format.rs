//! Backend-specific payload shapes.
//!
//! Each backend variant has its own adapter, selected through a lookup table
//! keyed by variant. Adapters are pure: they only read the record, never
//! include media fields, and produce the same payload for the same record.

use serde::Serialize;
use serde_json::Value;

use catchsync_common::{BackendVariant, CatchRecord, Error, Result};

type Adapter = fn(&CatchRecord) -> Result<Value>;

/// Strategy table: one adapter per backend variant.
static ADAPTERS: [(BackendVariant, Adapter); 2] = [
    (BackendVariant::Offshore, offshore_payload),
    (BackendVariant::Shore, shore_payload),
];

/// Variant A body.
#[derive(Serialize)]
struct OffshorePayload<'a> {
    code: &'a str,
    card_number: &'a str,
    registered_by: &'a str,
    size: f64,
    team: &'a str,
}

/// Variant B body. Coordinates travel as decimal strings.
#[derive(Serialize)]
struct ShorePayload<'a> {
    code: &'a str,
    card_number: &'a str,
    team: &'a str,
    size: f64,
    registered_by: &'a str,
    species_id: &'a str,
    latitude: String,
    longitude: String,
}

fn offshore_payload(record: &CatchRecord) -> Result<Value> {
    to_value(OffshorePayload {
        code: record.code.as_str(),
        card_number: &record.card_number,
        registered_by: &record.registered_by,
        size: record.size,
        team: &record.team,
    })
}

fn shore_payload(record: &CatchRecord) -> Result<Value> {
    to_value(ShorePayload {
        code: record.code.as_str(),
        card_number: &record.card_number,
        team: &record.team,
        size: record.size,
        registered_by: &record.registered_by,
        species_id: &record.species_id,
        latitude: record.latitude.to_string(),
        longitude: record.longitude.to_string(),
    })
}

fn to_value(payload: impl Serialize) -> Result<Value> {
    serde_json::to_value(payload).map_err(|e| Error::RequestBuild(e.to_string()))
}

/// Build the metadata payload of `record` for the given backend variant.
///
/// # Errors
/// - `RequestBuild` if the record cannot be represented (e.g. a non-finite size)
pub fn build_payload(record: &CatchRecord, variant: BackendVariant) -> Result<Value> {
    if !record.size.is_finite() {
        return Err(Error::RequestBuild(format!(
            "Record {} has a non-numeric size",
            record.code
        )));
    }

    let adapter = ADAPTERS
        .iter()
        .find(|(v, _)| *v == variant)
        .map(|(_, adapter)| adapter)
        .ok_or_else(|| Error::RequestBuild(format!("No payload adapter for {}", variant)))?;

    adapter(record)
}
