use super::*;

#[test]
fn test_stream_element_record() {
    let elem = StreamElement::record(HitEvent::new("example.com", 1_000, 0));
    match &elem {
        StreamElement::Record(event) => {
            assert_eq!(event.host, "example.com");
            assert_eq!(event.event_time, 1_000);
            assert_eq!(event.partition_id, 0);
        }
        _ => panic!("expected Record"),
    }
}

#[test]
fn test_stream_element_barrier() {
    let elem = StreamElement::<HitEvent>::barrier(5);
    match elem {
        StreamElement::CheckpointBarrier(b) => {
            assert_eq!(b.checkpoint_id, 5);
            assert_eq!(b.timestamp, 0);
        }
        _ => panic!("expected CheckpointBarrier"),
    }
}

#[test]
fn test_stream_element_barrier_with_timestamp() {
    let elem = StreamElement::<HitEvent>::barrier_with_timestamp(10, 123);
    assert_eq!(
        elem,
        StreamElement::CheckpointBarrier(Barrier::with_timestamp(10, 123))
    );
}

#[test]
fn test_watermark_ordering() {
    assert!(Watermark::new(10) < Watermark::new(20));
    assert_eq!(Watermark::new(42_000).to_string(), "Watermark(42000ms)");
}

#[test]
fn test_source_record_new() {
    let rec = SourceRecord::new(2, 17, b"{}".to_vec());
    assert_eq!(rec.partition_id, 2);
    assert_eq!(rec.offset, 17);
    assert_eq!(rec.payload, b"{}");
}

#[test]
fn test_processing_time_is_positive() {
    assert!(processing_time_ms() > 0);
}

#[test]
fn test_stream_element_watermark() {
    let elem = StreamElement::<HitEvent>::watermark(300_000);
    assert_eq!(elem, StreamElement::Watermark(Watermark::new(300_000)));
}
