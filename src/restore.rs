// Bulk restore reducer for disaster recovery
// Accepts the kv_entry JSON array exported from the admin panel

use spacetimedb::{reducer, ReducerContext, Timestamp, log, Table};
use crate::{KvEntry, kv_entry};
use crate::error::{ApiError, ApiResult, Reply};
use crate::store::keys;
use serde_json::Value;

/// Parse Timestamp from SDK JSON format: {"__timestamp_micros_since_unix_epoch__": "123456"}
fn parse_timestamp_json(val: &Value) -> Result<Timestamp, String> {
    let micros_str = val.get("__timestamp_micros_since_unix_epoch__")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid timestamp field")?;

    let micros: i64 = micros_str.parse()
        .map_err(|e| format!("Invalid timestamp micros: {}", e))?;

    Ok(Timestamp::from_micros_since_unix_epoch(micros))
}

/// One exported record: `{key, value, updatedAt?}`. The value may be the
/// JSON document itself or a string holding it; either way it must parse.
fn parse_entry(i: usize, e: &Value, now: Timestamp) -> Result<KvEntry, String> {
    let key = e.get("key")
        .and_then(|v| v.as_str())
        .filter(|k| !k.is_empty())
        .ok_or(format!("Entry {}: missing key", i))?
        .to_string();

    let value = match e.get("value") {
        Some(Value::String(raw)) => {
            serde_json::from_str::<Value>(raw)
                .map_err(|err| format!("Entry {} ({}): value is not JSON: {}", i, key, err))?;
            raw.clone()
        }
        Some(Value::Null) | None => return Err(format!("Entry {} ({}): missing value", i, key)),
        Some(doc) => doc.to_string(),
    };

    let updated_at = match e.get("updatedAt") {
        Some(ts) => parse_timestamp_json(ts).map_err(|err| format!("Entry {} ({}): {}", i, key, err))?,
        None => now,
    };

    Ok(KvEntry {
        namespace: keys::namespace_of(&key).to_string(),
        key,
        value,
        updated_at,
    })
}

/// Parse the whole export; any bad record rejects the batch
fn parse_entries(json_data: &str, now: Timestamp) -> ApiResult<Vec<KvEntry>> {
    let data: Value = serde_json::from_str(json_data)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON: {}", e)))?;

    let entries = data.as_array()
        .ok_or_else(|| ApiError::bad_request("Expected JSON array of entries"))?;

    entries.iter()
        .enumerate()
        .map(|(i, e)| parse_entry(i, e, now))
        .collect::<Result<Vec<_>, _>>()
        .map_err(ApiError::BadRequest)
}

/// Bulk restore kv_entry rows from JSON array, overwriting existing keys
/// Protected by authorization check - only workers and admins can call this
#[reducer]
pub fn bulk_restore_entries(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    crate::require_admin(ctx).reply("ADMIN")?;

    let entries = parse_entries(&json_data, ctx.timestamp).reply("ADMIN")?;

    let mut count = 0;
    for entry in entries {
        if ctx.db.kv_entry().key().find(&entry.key).is_some() {
            ctx.db.kv_entry().key().update(entry);
        } else {
            ctx.db.kv_entry().insert(entry);
        }
        count += 1;
    }

    log::info!("[ADMIN] restored {} entries", count);
    Ok(())
}
