//! Document Stream Pipeline Tests
//!
//! End-to-end behaviour of the event map operator and the external-store
//! interceptor, alone and composed with restream.

use std::collections::{BTreeMap, BTreeSet};

use databroker::document::{
    DataKey, Document, DocumentKind, Event, EventDescriptor, ExitStatus, RunStart, RunStop,
};
use databroker::stream::{EventMap, FrameWriter, EXTERNAL_TAG};
use databroker::{Broker, Error, Result};
use serde_json::{json, Map, Value};

/// One run: Start, a "primary" descriptor declaring `x` and `img`, one
/// event per value, then a success Stop.
fn primary_run(values: &[i64]) -> (RunStart, Vec<Result<Document>>) {
    let start = RunStart::builder().scan_id(7).build();
    let desc = EventDescriptor::builder(start.uid())
        .data_key("x", DataKey::new().with("dtype", json!("number")))
        .data_key("img", DataKey::new().with("shape", json!([2])))
        .build();
    let mut docs: Vec<Result<Document>> = vec![Ok(start.clone().into()), Ok(desc.clone().into())];
    for (i, v) in values.iter().enumerate() {
        let event = Event::builder(desc.uid())
            .seq_num(i as u64 + 1)
            .time(100.0 + f64::from(u32::try_from(i).unwrap()))
            .datum("x", json!(v))
            .datum("img", json!([v, v + 1]))
            .build();
        docs.push(Ok(event.into()));
    }
    docs.push(Ok(RunStop::new(start.uid(), ExitStatus::Success).into()));
    (start, docs)
}

fn fields(names: &[&str]) -> BTreeMap<String, Map<String, Value>> {
    names.iter().map(|n| ((*n).to_string(), Map::new())).collect()
}

fn kinds(docs: &[Document]) -> Vec<DocumentKind> {
    docs.iter().map(Document::kind).collect()
}

// =============================================================================
// Event map
// =============================================================================

#[test]
fn test_event_map_derives_complete_run() {
    let (source_start, input) = primary_run(&[1, 2, 3]);
    let op = EventMap::new("primary", fields(&["x"]), json!({"op": "times ten"}), |v: &Value| {
        Ok(json!(v.as_i64().unwrap_or(0) * 10))
    });

    let out: Vec<Document> = op.apply(input).collect::<Result<_>>().unwrap();
    assert_eq!(
        kinds(&out),
        vec![
            DocumentKind::Start,
            DocumentKind::Descriptor,
            DocumentKind::Event,
            DocumentKind::Event,
            DocumentKind::Event,
            DocumentKind::Stop,
        ]
    );

    let Document::Start(start) = &out[0] else {
        panic!("expected start");
    };
    assert_ne!(start.uid(), source_start.uid());
    assert_eq!(start.parents(), &[source_start.uid().to_string()]);
    assert_eq!(start.provenance(), Some(&json!({"op": "times ten"})));

    let Document::Descriptor(desc) = &out[1] else {
        panic!("expected descriptor");
    };
    assert_eq!(desc.run_start(), start.uid());
    assert!(desc.data_keys().contains_key("img"));
    assert_eq!(desc.data_keys()["x"].schema()["dtype"], json!("number"));

    let xs: Vec<Value> = out
        .iter()
        .filter_map(|d| match d {
            Document::Event(e) => {
                assert_eq!(e.descriptor(), desc.uid());
                Some(e.data()["x"].clone())
            }
            _ => None,
        })
        .collect();
    assert_eq!(xs, vec![json!(10), json!(20), json!(30)]);

    let Document::Stop(stop) = &out[5] else {
        panic!("expected stop");
    };
    assert_eq!(stop.run_start(), start.uid());
    assert_eq!(stop.exit_status(), ExitStatus::Success);
}

#[test]
fn test_event_map_transforms_every_declared_field() {
    let start = RunStart::builder().build();
    let desc = EventDescriptor::builder(start.uid())
        .data_key("x", DataKey::new())
        .data_key("y", DataKey::new())
        .build();
    let event = Event::builder(desc.uid())
        .seq_num(1)
        .time(100.0)
        .datum("x", json!(1))
        .datum("y", json!(2))
        .build();
    let input: Vec<Result<Document>> = vec![
        Ok(start.clone().into()),
        Ok(desc.into()),
        Ok(event.into()),
        Ok(RunStop::new(start.uid(), ExitStatus::Success).into()),
    ];
    let op = EventMap::new("primary", fields(&["x"]), json!({}), |v: &Value| {
        Ok(json!(v.as_i64().unwrap_or(0) * 10))
    });

    let out: Vec<Document> = op.apply(input).collect::<Result<_>>().unwrap();
    let Document::Descriptor(derived) = &out[1] else {
        panic!("expected descriptor");
    };
    let declared: Vec<&str> = derived.data_keys().keys().map(String::as_str).collect();
    assert_eq!(declared, vec!["x", "y"]);

    let Document::Event(event) = &out[2] else {
        panic!("expected event");
    };
    assert_eq!(event.data()["x"], json!(10));
    assert_eq!(event.data()["y"], json!(20));
    assert_eq!(event.seq_num(), Some(1));
    assert_eq!(event.time(), 100.0);
}

#[test]
fn test_event_map_failure_closes_run_then_raises() {
    let (_, input) = primary_run(&[1, 2, 3]);
    let op = EventMap::new("primary", fields(&["x"]), json!({}), |v: &Value| {
        if v == &json!(2) {
            anyhow::bail!("cannot transform {v}");
        }
        Ok(v.clone())
    });

    let mut out = op.apply(input);
    let start = match out.next() {
        Some(Ok(Document::Start(start))) => start,
        other => panic!("expected start, got {other:?}"),
    };
    assert!(matches!(out.next(), Some(Ok(Document::Descriptor(_)))));
    assert!(matches!(out.next(), Some(Ok(Document::Event(_)))));

    match out.next() {
        Some(Ok(Document::Stop(stop))) => {
            assert_eq!(stop.run_start(), start.uid());
            assert_eq!(stop.exit_status(), ExitStatus::Failure);
            assert!(stop.reason().unwrap().contains("cannot transform 2"));
        }
        other => panic!("expected failure stop, got {other:?}"),
    }
    match out.next() {
        Some(Err(Error::Transform { field, .. })) => assert_eq!(field, "x"),
        other => panic!("expected transform error, got {other:?}"),
    }
    assert!(out.next().is_none());
    assert!(out.next().is_none());
}

#[test]
fn test_event_map_missing_field_is_transform_failure() {
    let start = RunStart::builder().build();
    let desc = EventDescriptor::builder(start.uid())
        .data_key("x", DataKey::new())
        .build();
    let event = Event::builder(desc.uid()).field("note", json!("no x here")).build();
    let input: Vec<Result<Document>> = vec![Ok(start.into()), Ok(desc.into()), Ok(event.into())];

    let op = EventMap::new("primary", fields(&["x"]), json!({}), |v: &Value| Ok(v.clone()));
    let out: Vec<Result<Document>> = op.apply(input).collect();
    assert_eq!(out.len(), 4);
    assert!(matches!(&out[2], Ok(Document::Stop(s)) if s.exit_status() == ExitStatus::Failure));
    assert!(matches!(out[3], Err(Error::Transform { .. })));
}

#[test]
fn test_event_map_configured_field_absent_from_descriptor_is_ignored() {
    let (_, input) = primary_run(&[1]);
    let op = EventMap::new("primary", fields(&["x", "temperature"]), json!({}), |v: &Value| {
        Ok(v.clone())
    });
    let out: Vec<Document> = op.apply(input).collect::<Result<_>>().unwrap();
    assert_eq!(out.len(), 4);
}

// =============================================================================
// External store interceptor
// =============================================================================

#[test]
fn test_interceptor_persisted_and_emitted_copies_differ() {
    let broker = Broker::in_memory("/data");
    let (start, input) = primary_run(&[1, 2]);
    let interceptor = broker.interceptor().writer("img", FrameWriter::boxed);

    let out: Vec<Document> = interceptor.intercept(input).collect::<Result<_>>().unwrap();
    assert_eq!(out.len(), 5);

    // Emitted events keep literal values and advertise them as unfilled.
    let emitted: Vec<&Event> = out
        .iter()
        .filter_map(|d| match d {
            Document::Event(e) => Some(e),
            _ => None,
        })
        .collect();
    assert_eq!(emitted[0].data()["img"], json!([1, 2]));
    assert_eq!(emitted[0].filled().get("img"), Some(&false));
    assert_eq!(emitted[0].filled().len(), 1);

    // Persisted copies hold datum ids that resolve to the same values.
    let descriptors = broker.mds().descriptors_for(start.uid()).unwrap();
    assert_eq!(descriptors.len(), 1);
    assert_eq!(descriptors[0].data_keys()["img"].external(), Some(EXTERNAL_TAG));
    assert!(!descriptors[0].data_keys()["x"].is_external());

    let stored = broker.mds().events_for(descriptors[0].uid()).unwrap();
    assert_eq!(stored.len(), 2);
    for (persisted, original) in stored.iter().zip(&emitted) {
        assert_eq!(persisted.uid(), original.uid());
        assert!(persisted.filled().is_empty());
        assert_eq!(persisted.data()["x"], original.data()["x"]);
        let Value::String(datum_id) = &persisted.data()["img"] else {
            panic!("expected datum id");
        };
        assert_eq!(broker.fs().retrieve(datum_id).unwrap(), original.data()["img"]);
    }

    let header = broker.resolve(7).unwrap().into_vec().remove(0);
    assert_eq!(header.stop().unwrap().exit_status(), ExitStatus::Success);
    assert_eq!(broker.resource_uids(&header).unwrap().len(), 1);
}

#[test]
fn test_interceptor_without_writers_persists_verbatim() {
    let broker = Broker::in_memory("");
    let (start, input) = primary_run(&[3]);

    let out: Vec<Document> = broker
        .interceptor()
        .intercept(input)
        .collect::<Result<_>>()
        .unwrap();
    let Document::Event(emitted) = &out[2] else {
        panic!("expected event");
    };
    assert!(emitted.filled().is_empty());

    let header = broker.resolve(start.uid()).unwrap().into_vec().remove(0);
    let stored = broker.mds().events_for(header.descriptors()[0].uid()).unwrap();
    assert_eq!(stored[0].data(), emitted.data());
    assert!(broker.resource_uids(&header).unwrap().is_empty());
}

#[test]
fn test_interceptor_opens_one_resource_per_run() {
    let broker = Broker::in_memory("");
    let (_, mut input) = primary_run(&[1]);
    input.extend(primary_run(&[2]).1);

    let interceptor = broker.interceptor().writer("img", FrameWriter::boxed);
    let count = interceptor
        .intercept(input)
        .collect::<Result<Vec<_>>>()
        .unwrap()
        .len();
    assert_eq!(count, 8);

    let headers = broker.resolve(vec![-1, -2]).unwrap().into_vec();
    let first = broker.resource_uids(&headers[0]).unwrap();
    let second = broker.resource_uids(&headers[1]).unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_ne!(first, second);
}

#[test]
fn test_interceptor_rejects_event_outside_run() {
    let broker = Broker::in_memory("");
    let event = Event::builder("no-descriptor").datum("img", json!([0])).build();
    let mut stream = broker
        .interceptor()
        .writer("img", FrameWriter::boxed)
        .intercept(vec![Ok(Document::Event(event))]);

    assert!(matches!(stream.next(), Some(Err(Error::Protocol(_)))));
    assert!(stream.next().is_none());
    assert_eq!(broker.mds().find_last(10).unwrap().len(), 0);
}

// =============================================================================
// Composition
// =============================================================================

#[test]
fn test_restream_filled_round_trips_intercepted_values() {
    let broker = Broker::in_memory("/data");
    let (start, input) = primary_run(&[5, 6]);
    let interceptor = broker.interceptor().writer("img", FrameWriter::boxed);
    for doc in interceptor.intercept(input) {
        doc.unwrap();
    }
    let header = broker.resolve(start.uid()).unwrap().into_vec().remove(0);

    let raw: Vec<Document> = broker.restream(&header, false).collect::<Result<_>>().unwrap();
    let Document::Event(raw_event) = &raw[2] else {
        panic!("expected event");
    };
    assert!(raw_event.data()["img"].is_string());

    let filled: Vec<Document> = broker.restream(&header, true).collect::<Result<_>>().unwrap();
    let imgs: Vec<Value> = filled
        .iter()
        .filter_map(|d| match d {
            Document::Event(e) => {
                assert_eq!(e.filled().get("img"), Some(&true));
                Some(e.data()["img"].clone())
            }
            _ => None,
        })
        .collect();
    assert_eq!(imgs, vec![json!([5, 6]), json!([6, 7])]);

    let single = broker.fill_event(&header, raw_event).unwrap();
    assert_eq!(single.data()["img"], json!([5, 6]));
}

#[test]
fn test_event_map_into_interceptor() {
    let broker = Broker::in_memory("");
    let (source, input) = primary_run(&[1, 2, 3]);
    let op = EventMap::new("primary", fields(&["img"]), json!({}), |v: &Value| {
        let sum: i64 = v.as_array().map_or(0, |a| a.iter().filter_map(Value::as_i64).sum());
        Ok(json!(sum))
    });
    let interceptor = broker.interceptor().writer("img", FrameWriter::boxed);

    let out: Vec<Document> = interceptor
        .intercept(op.apply(input))
        .collect::<Result<_>>()
        .unwrap();
    let derived_uid = out[0].uid().to_string();

    let header = broker.resolve(derived_uid.as_str()).unwrap().into_vec().remove(0);
    assert_eq!(header.start().parents(), &[source.uid().to_string()]);
    let filled: Vec<Value> = broker
        .restream(&header, true)
        .filter_map(|d| match d {
            Ok(Document::Event(e)) => Some(e.data()["img"].clone()),
            _ => None,
        })
        .collect();
    assert_eq!(filled, vec![json!(3), json!(5), json!(7)]);
}

#[test]
fn test_restream_many_replays_runs_in_order_with_field_whitelist() {
    let broker = Broker::in_memory("/data");
    let interceptor = broker.interceptor().writer("img", FrameWriter::boxed);
    let (_, mut input) = primary_run(&[1, 2]);
    input.extend(primary_run(&[3]).1);
    for doc in interceptor.intercept(input) {
        doc.unwrap();
    }
    let mut headers = broker.resolve(-2..0).unwrap().into_vec();
    headers.reverse();

    let all: Vec<Document> = broker
        .restream_many(&headers, None, true)
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(all.len(), 9);
    let imgs: Vec<Value> = all
        .iter()
        .filter_map(|d| match d {
            Document::Event(e) => Some(e.data()["img"].clone()),
            _ => None,
        })
        .collect();
    assert_eq!(imgs, vec![json!([1, 2]), json!([2, 3]), json!([3, 4])]);

    let only_x: BTreeSet<String> = ["x".to_string()].into_iter().collect();
    let narrowed: Vec<Document> = broker
        .restream_many(&headers, Some(&only_x), true)
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(kinds(&narrowed), kinds(&all));
    for doc in &narrowed {
        match doc {
            Document::Descriptor(d) => assert!(!d.data_keys().contains_key("img")),
            Document::Event(e) => {
                assert!(!e.data().contains_key("img"));
                assert!(e.filled().is_empty());
            }
            _ => {}
        }
    }
}
