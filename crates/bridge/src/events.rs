//! Telemetry events recorded in the project's event log.

use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, warn};

use sinkbridge_core::{SinkKey, Statistics, format_key_timestamp};
use sinkbridge_storage_api::{Event, EventType, StorageApi};

use crate::bridge::BridgeState;

pub const SLICE_UPLOAD_COMPONENT: &str = "keboola.stream.sliceUpload";
pub const FILE_IMPORT_COMPONENT: &str = "keboola.stream.fileImport";

/// Event of a finished slice upload.
pub fn slice_upload_event(
    sink: &SinkKey,
    duration: Duration,
    statistics: &Statistics,
    error: Option<&str>,
) -> Event {
    let message = if error.is_some() {
        "Slice upload failed."
    } else {
        "Slice upload done."
    };
    event(SLICE_UPLOAD_COMPONENT, message, sink, duration, statistics, error)
}

/// Event of a finished file import.
pub fn file_import_event(
    sink: &SinkKey,
    duration: Duration,
    statistics: &Statistics,
    error: Option<&str>,
) -> Event {
    let message = if error.is_some() {
        "File import failed."
    } else {
        "File import done."
    };
    event(FILE_IMPORT_COMPONENT, message, sink, duration, statistics, error)
}

impl BridgeState {
    /// Record the event, bounded by the configured timeout. Failures are
    /// only logged.
    pub(crate) async fn send_event(&self, api: &dyn StorageApi, event: Event) {
        let timeout = self.config.event_send_timeout;
        match tokio::time::timeout(timeout, api.create_event(&event)).await {
            Ok(Ok(id)) => debug!(event_id = %id, component = %event.component, "sent event"),
            Ok(Err(e)) => {
                warn!(error = %e, component = %event.component, "unable to send event");
            }
            Err(_) => {
                warn!(timeout = ?timeout, component = %event.component, "sending event timed out");
            }
        }
    }
}

fn event(
    component: &str,
    message: &str,
    sink: &SinkKey,
    duration: Duration,
    statistics: &Statistics,
    error: Option<&str>,
) -> Event {
    let results = match error {
        Some(error) => json!({ "error": error }),
        None => json!({ "statistics": statistics_value(statistics) }),
    };
    Event {
        component: component.to_owned(),
        message: message.to_owned(),
        kind: if error.is_some() {
            EventType::Error
        } else {
            EventType::Info
        },
        duration: duration.as_secs_f64(),
        params: params(sink).to_string(),
        results: results.to_string(),
    }
}

fn params(sink: &SinkKey) -> Value {
    json!({
        "branchId": sink.branch().branch_id.get(),
        "projectId": sink.project_id().get(),
        "sinkId": sink.sink_id.as_str(),
        "sourceId": sink.source.source_id.as_str(),
        "streamId": sink.source.to_string(),
    })
}

fn statistics_value(stats: &Statistics) -> Value {
    let mut value = json!({
        "compressedSize": stats.compressed_size,
        "recordsCount": stats.records_count,
        "slicesCount": stats.slices_count,
        "stagingSize": stats.staging_size,
        "uncompressedSize": stats.uncompressed_size,
    });
    if let Some(at) = &stats.first_record_at {
        value["firstRecordAt"] = Value::String(format_key_timestamp(at));
    }
    if let Some(at) = &stats.last_record_at {
        value["lastRecordAt"] = Value::String(format_key_timestamp(at));
    }
    value
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use sinkbridge_core::{BranchKey, SourceKey};

    use super::*;

    fn sink() -> SinkKey {
        SinkKey::new(SourceKey::new(BranchKey::new(123, 456), "my-source"), "my-sink")
    }

    fn stats() -> Statistics {
        Statistics {
            slices_count: 1,
            records_count: 123,
            first_record_at: Some(Utc.with_ymd_and_hms(2000, 1, 1, 20, 0, 0).unwrap()),
            last_record_at: Some(Utc.with_ymd_and_hms(2000, 1, 2, 1, 0, 0).unwrap()),
            uncompressed_size: 104_857_600,
            compressed_size: 52_428_800,
            staging_size: 26_214_400,
        }
    }

    fn parse(s: &str) -> Value {
        serde_json::from_str(s).unwrap()
    }

    #[test]
    fn upload_done_event() {
        let event = slice_upload_event(&sink(), Duration::from_secs(3), &stats(), None);
        assert_eq!(event.component, "keboola.stream.sliceUpload");
        assert_eq!(event.message, "Slice upload done.");
        assert_eq!(event.kind, EventType::Info);
        assert!((event.duration - 3.0).abs() < f64::EPSILON);
        assert_eq!(
            parse(&event.params),
            json!({
                "branchId": 456,
                "projectId": 123,
                "sinkId": "my-sink",
                "sourceId": "my-source",
                "streamId": "123/456/my-source",
            })
        );
        assert_eq!(
            parse(&event.results),
            json!({
                "statistics": {
                    "compressedSize": 52_428_800,
                    "firstRecordAt": "2000-01-01T20:00:00.000Z",
                    "lastRecordAt": "2000-01-02T01:00:00.000Z",
                    "recordsCount": 123,
                    "slicesCount": 1,
                    "stagingSize": 26_214_400,
                    "uncompressedSize": 104_857_600,
                }
            })
        );
    }

    #[test]
    fn import_failed_event() {
        let event = file_import_event(&sink(), Duration::from_secs(1), &stats(), Some("some error"));
        assert_eq!(event.component, "keboola.stream.fileImport");
        assert_eq!(event.message, "File import failed.");
        assert_eq!(event.kind, EventType::Error);
        assert_eq!(parse(&event.results), json!({ "error": "some error" }));
    }

    #[test]
    fn missing_record_times_are_omitted() {
        let event = file_import_event(&sink(), Duration::ZERO, &Statistics::default(), None);
        let results = parse(&event.results);
        assert!(results["statistics"].get("firstRecordAt").is_none());
        assert_eq!(results["statistics"]["recordsCount"], 0);
    }
}
