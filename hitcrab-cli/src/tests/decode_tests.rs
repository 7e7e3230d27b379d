use super::*;

fn record(payload: &str) -> SourceRecord {
    SourceRecord::new(2, 17, payload.as_bytes().to_vec())
}

#[test]
fn test_decode_full_hit() {
    let payload = r#"{"ip":"10.0.0.1","event_timestamp":"2024-01-01 00:04:59","referrer":"https://example.org","host":"www.example.com","url":"/index.html","geodata":{"country":"NL"}}"#;
    let event = JsonHitDecoder::new().decode(&record(payload)).unwrap();

    assert_eq!(event.host, "www.example.com");
    assert_eq!(event.event_time, 1_704_067_499_000);
    assert_eq!(event.partition_id, 2);
}

#[test]
fn test_decode_tolerates_missing_optional_fields() {
    let payload = r#"{"event_timestamp":"1970-01-01 00:00:30","host":"a"}"#;
    let event = JsonHitDecoder::new().decode(&record(payload)).unwrap();
    assert_eq!(event.event_time, 30_000);
}

#[test]
fn test_decode_rejects_missing_host() {
    let payload = r#"{"event_timestamp":"2024-01-01 00:00:00","url":"/"}"#;
    let err = JsonHitDecoder::new().decode(&record(payload)).unwrap_err();
    assert!(err.to_string().contains("no host"), "unexpected: {err}");
}

#[test]
fn test_decode_rejects_bad_timestamp() {
    let payload = r#"{"event_timestamp":"2024-01-01T00:00:00Z","host":"a"}"#;
    let err = JsonHitDecoder::new().decode(&record(payload)).unwrap_err();
    assert!(
        format!("{err:#}").contains("bad event_timestamp"),
        "unexpected: {err:#}"
    );
}

#[test]
fn test_decode_rejects_garbage() {
    let err = JsonHitDecoder::new().decode(&record("not json")).unwrap_err();
    assert!(err.to_string().contains("invalid hit json"), "unexpected: {err}");
    assert!(!hitcrab_core::error::is_fatal(&err));
}
