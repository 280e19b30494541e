use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use stagebridge_protocol::mapping::{parse_records, Mapping, MappingRecord};

use crate::context::new_mapping_id;

use super::{ApiError, AppState};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// GET /api/mappings
pub async fn list_mappings(State(ctx): State<AppState>) -> Json<Value> {
    let config = ctx.config.read().await;
    Json(json!({ "mappings": config.osc_mappings }))
}

/// POST /api/mappings: append a new mapping under a fresh id.
pub async fn add_mapping(
    State(ctx): State<AppState>,
    Json(mut record): Json<MappingRecord>,
) -> Result<Json<Value>, ApiError> {
    record.id = Some(new_mapping_id());
    validate(&record)?;

    let stored = record.clone();
    ctx.update_config(|config| {
        config.osc_mappings.push(record);
        Ok::<_, ApiError>(())
    })
    .await?;

    info!(id = ?stored.id, address = ?stored.osc_address, "Mapping added");
    Ok(Json(json!({ "success": true, "mapping": stored })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub ids: Vec<String>,
}

/// DELETE /api/mappings: body `{"ids": [...]}`.
pub async fn delete_mappings(
    State(ctx): State<AppState>,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.ids.is_empty() {
        return Err(ApiError::bad_request("No mapping ids supplied"));
    }

    let deleted = ctx
        .update_config(|config| Ok::<_, ApiError>(remove_ids(&mut config.osc_mappings, &req.ids)))
        .await?;

    info!(deleted, "Mappings deleted");
    Ok(Json(json!({ "success": true, "deleted": deleted })))
}

/// PUT /api/mappings/:id: merge the supplied fields into one mapping.
pub async fn update_mapping(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let updated = ctx
        .update_config(|config| {
            let record = config
                .osc_mappings
                .iter_mut()
                .find(|r| r.id.as_deref() == Some(id.as_str()))
                .ok_or_else(|| ApiError::not_found(format!("Mapping '{}' not found", id)))?;
            let merged = merge_record(record, &patch)?;
            validate(&merged)?;
            *record = merged.clone();
            Ok::<_, ApiError>(merged)
        })
        .await?;

    info!(id = %id, "Mapping updated");
    Ok(Json(json!({ "success": true, "mapping": updated })))
}

/// DELETE /api/mappings/:id
pub async fn delete_mapping(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    ctx.update_config(|config| {
        match remove_ids(&mut config.osc_mappings, std::slice::from_ref(&id)) {
            0 => Err(ApiError::not_found(format!("Mapping '{}' not found", id))),
            _ => Ok(()),
        }
    })
    .await?;

    info!(id = %id, "Mapping deleted");
    Ok(Json(json!({ "success": true })))
}

/// POST /api/mappings/upload-json: bulk import keyed by OSC address.
/// Entries that do not read as mappings are counted as skipped.
pub async fn upload_json(
    State(ctx): State<AppState>,
    Json(uploaded): Json<Vec<Value>>,
) -> Result<Json<Value>, ApiError> {
    let summary = ctx
        .update_config(|config| Ok::<_, ApiError>(apply_upload(&mut config.osc_mappings, uploaded)))
        .await?;

    info!(
        added = summary.added,
        updated = summary.updated,
        skipped = summary.skipped,
        "Mappings uploaded"
    );
    Ok(Json(json!({
        "success": true,
        "added": summary.added,
        "updated": summary.updated,
        "skipped": summary.skipped,
    })))
}

fn validate(record: &MappingRecord) -> Result<(), ApiError> {
    Mapping::try_from(record)
        .map(|_| ())
        .map_err(|e| ApiError::bad_request(e.to_string()))
}

fn merge_record(record: &MappingRecord, patch: &Value) -> Result<MappingRecord, ApiError> {
    let mut current = serde_json::to_value(record).map_err(anyhow::Error::from)?;
    let (Some(target), Some(updates)) = (current.as_object_mut(), patch.as_object()) else {
        return Err(ApiError::bad_request("Mapping update must be a JSON object"));
    };
    for (key, value) in updates {
        if key != "id" {
            target.insert(key.clone(), value.clone());
        }
    }
    serde_json::from_value(current).map_err(|e| ApiError::bad_request(format!("Invalid mapping: {}", e)))
}

/// Decode an uploaded batch entry by entry and merge what reads cleanly.
pub fn apply_upload(records: &mut Vec<MappingRecord>, uploaded: Vec<Value>) -> UploadSummary {
    let (decoded, unreadable) = parse_records(uploaded);
    let mut summary = merge_upload(records, decoded);
    summary.skipped += unreadable;
    summary
}

/// Remove every record whose id is listed. Returns how many were removed.
pub fn remove_ids(records: &mut Vec<MappingRecord>, ids: &[String]) -> usize {
    let before = records.len();
    records.retain(|r| r.id.as_ref().map_or(true, |id| !ids.contains(id)));
    before - records.len()
}

/// Replace records with the same OSC address, append the rest. Records
/// without an address are skipped; later uploads win over earlier ones.
pub fn merge_upload(records: &mut Vec<MappingRecord>, uploaded: Vec<MappingRecord>) -> UploadSummary {
    let mut summary = UploadSummary::default();

    for mut incoming in uploaded {
        let Some(address) = incoming.osc_address.clone().filter(|a| !a.is_empty()) else {
            summary.skipped += 1;
            continue;
        };

        match records
            .iter_mut()
            .find(|r| r.osc_address.as_deref() == Some(address.as_str()))
        {
            Some(existing) => {
                if incoming.id.is_none() {
                    incoming.id = existing.id.clone();
                }
                *existing = incoming;
                summary.updated += 1;
            }
            None => {
                if incoming.id.is_none() {
                    incoming.id = Some(new_mapping_id());
                }
                records.push(incoming);
                summary.added += 1;
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: Option<&str>, address: Option<&str>, description: &str) -> MappingRecord {
        MappingRecord {
            id: id.map(str::to_string),
            osc_address: address.map(str::to_string),
            description: Some(description.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_upload_replaces_by_address() {
        let mut records = vec![record(Some("a1"), Some("/song/1"), "old")];
        let uploaded = vec![
            record(None, Some("/song/1"), "new"),
            record(None, Some("/song/2"), "added"),
            record(None, None, "no address"),
        ];

        let summary = merge_upload(&mut records, uploaded);

        assert_eq!(summary, UploadSummary { added: 1, updated: 1, skipped: 1 });
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id.as_deref(), Some("a1"));
        assert_eq!(records[0].description.as_deref(), Some("new"));
        assert!(records[1].id.is_some());
    }

    #[test]
    fn test_upload_last_write_wins() {
        let mut records = Vec::new();
        let uploaded = vec![
            record(None, Some("/go"), "first"),
            record(None, Some("/go"), "second"),
        ];

        let summary = merge_upload(&mut records, uploaded);

        assert_eq!(summary, UploadSummary { added: 1, updated: 1, skipped: 0 });
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].description.as_deref(), Some("second"));
    }

    #[test]
    fn test_upload_keeps_good_entries_of_mixed_batch() {
        let mut records = vec![record(Some("a1"), Some("/song/1"), "old")];
        let uploaded = vec![
            json!({ "osc_address": "/song/1", "description": "new" }),
            json!({ "osc_address": "/song/2",
                "midi_sequence": [{ "type": "control_change", "channel": 1, "control": 7, "value": "max" }] }),
            json!({ "osc_address": "/song/3",
                "midi_sequence": [{ "type": "control_change", "channel": "1", "control": 7, "value": 100.0 }] }),
        ];

        let summary = apply_upload(&mut records, uploaded);

        assert_eq!(summary, UploadSummary { added: 1, updated: 1, skipped: 1 });
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].description.as_deref(), Some("new"));
        assert_eq!(records[1].osc_address.as_deref(), Some("/song/3"));
        assert_eq!(records[1].midi_sequence[0].value, Some(100));
    }

    #[test]
    fn test_remove_ids() {
        let mut records = vec![
            record(Some("a"), Some("/a"), ""),
            record(Some("b"), Some("/b"), ""),
            record(Some("c"), Some("/c"), ""),
        ];

        let removed = remove_ids(&mut records, &["a".to_string(), "c".to_string(), "zz".to_string()]);

        assert_eq!(removed, 2);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id.as_deref(), Some("b"));
    }

    #[test]
    fn test_merge_record_keeps_id() {
        let existing = record(Some("a"), Some("/a"), "before");
        let patch = json!({ "id": "hijack", "description": "after", "osc_address": "/b" });

        let merged = merge_record(&existing, &patch).unwrap();

        assert_eq!(merged.id.as_deref(), Some("a"));
        assert_eq!(merged.osc_address.as_deref(), Some("/b"));
        assert_eq!(merged.description.as_deref(), Some("after"));
    }

    #[test]
    fn test_validate_rejects_unknown_type() {
        let mut bad = record(Some("a"), Some("/a"), "");
        bad.mapping_type = Some("dmx".to_string());
        assert!(validate(&bad).is_err());
    }
}
