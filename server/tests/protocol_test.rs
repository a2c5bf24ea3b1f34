//! Wire format tests for the HTTP protocol.
//!
//! These pin the JSON shapes exchanged between `HttpRemote` and the server.

use satchel_engine::remote::ListQuery;
use satchel_engine::{
    DatasetAuthority, DatasetMetadata, DatasetStatus, PushOutcome, PushRequest, PushResponse,
    Record, RecordPage, RecordPush,
};
use serde_json::json;

/// Test helper to create a pushed record.
fn create_test_push(key: &str, value: Option<&str>, base: u64) -> RecordPush {
    RecordPush::new(
        Record::new(key, value.map(String::from), "device-1", 1706745600000),
        base,
    )
}

#[cfg(test)]
mod protocol_tests {
    use super::*;

    #[test]
    fn test_push_request_deserialization() {
        let json = r#"{
            "deviceId": "device-123",
            "records": [
                {
                    "record": {
                        "key": "high",
                        "value": "95",
                        "syncCount": 3,
                        "lastModifiedDate": 1706745600000,
                        "lastModifiedBy": "device-123",
                        "deviceLastModifiedDate": 1706745600000
                    },
                    "baseSyncCount": 3
                }
            ]
        }"#;

        let request: PushRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.device_id, "device-123");
        assert_eq!(request.records.len(), 1);
        assert_eq!(request.records[0].base_sync_count, 3);
        assert_eq!(request.records[0].record.value.as_deref(), Some("95"));
        // The dirty flag is client-local and optional on the wire.
        assert!(!request.records[0].record.modified);
    }

    #[test]
    fn test_push_response_serialization() {
        let remote = Record::new("low", Some("7".into()), "device-2", 1000).confirmed(5);
        let response = PushResponse {
            outcomes: vec![PushOutcome::accepted("high", 6), PushOutcome::conflict(remote)],
            sync_count: 6,
        };

        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["syncCount"], 6);
        assert_eq!(
            value["outcomes"][0],
            json!({"key": "high", "status": "accepted", "syncCount": 6})
        );
        assert_eq!(value["outcomes"][1]["status"], "conflict");
        assert_eq!(value["outcomes"][1]["remote"]["syncCount"], 5);
    }

    #[test]
    fn test_tombstone_serializes_null_value() {
        let push = create_test_push("gone", None, 2);
        let value = serde_json::to_value(&push).unwrap();

        assert!(value["record"]["value"].is_null());
        assert_eq!(value["baseSyncCount"], 2);
    }

    #[test]
    fn test_record_page_from_authority() {
        let mut authority = DatasetAuthority::new("scores", 0);
        authority.apply_push(
            vec![
                create_test_push("high", Some("90"), 0),
                create_test_push("low", Some("10"), 0),
            ],
            "device-1",
            1000,
        );

        let page: RecordPage =
            serde_json::from_str(&serde_json::to_string(&authority.list_since(0)).unwrap())
                .unwrap();

        assert_eq!(page.sync_count, 1);
        assert_eq!(page.records.len(), 2);
        assert!(authority.list_since(1).records.is_empty());
    }

    #[test]
    fn test_record_page_reports_deletion() {
        let mut authority = DatasetAuthority::new("scores", 0);
        authority.apply_push(vec![create_test_push("high", Some("90"), 0)], "device-1", 1000);
        authority.delete(2000);

        let value = serde_json::to_value(authority.list_since(1)).unwrap();
        assert_eq!(value["status"], "deleted");
        assert_eq!(value["reset"], true);
        assert_eq!(value["syncCount"], 2);

        // Both fields are optional on the wire.
        let page: RecordPage = serde_json::from_value(json!({"records": [], "syncCount": 4})).unwrap();
        assert_eq!(page.status, DatasetStatus::Active);
        assert!(!page.reset);
    }

    #[test]
    fn test_dataset_metadata_serialization() {
        let mut metadata = DatasetMetadata::new("scores", 1706745600000);
        metadata.status = DatasetStatus::Deleted;
        metadata.sync_count = 4;

        let value = serde_json::to_value(&metadata).unwrap();

        assert_eq!(value["name"], "scores");
        assert_eq!(value["status"], "deleted");
        assert_eq!(value["syncCount"], 4);
        assert_eq!(value["creationDate"], 1706745600000u64);
    }

    #[test]
    fn test_list_query_since() {
        let query: ListQuery = serde_json::from_value(json!({"since": 12})).unwrap();
        assert_eq!(query.since, 12);

        let query: ListQuery = serde_json::from_value(json!({})).unwrap();
        assert_eq!(query.since, 0);
    }
}
