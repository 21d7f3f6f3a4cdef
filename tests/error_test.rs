//! Tests for error types

use std::error::Error as _;

use databroker::Error;

#[test]
fn test_validation_error() {
    let error = Error::Validation("'abc' matches 3 runs. Provide more characters.".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Invalid input"));
    assert!(error_str.contains("Provide more characters"));
}

#[test]
fn test_not_found_error() {
    let error = Error::NotFound("no run with scan_id=12".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Not found"));
    assert!(error_str.contains("scan_id=12"));
}

#[test]
fn test_out_of_range_error() {
    let error = Error::OutOfRange {
        requested: 10,
        available: 4,
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("run -10"));
    assert!(error_str.contains("only 4 runs"));
}

#[test]
fn test_protocol_error() {
    let error = Error::Protocol("Received Event before RunStart.".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Protocol error"));
    assert!(error_str.contains("before RunStart"));
}

#[test]
fn test_transform_error_keeps_source() {
    let error = Error::transform("img", anyhow::anyhow!("shape mismatch"));
    let error_str = format!("{error}");
    assert!(error_str.contains("'img'"));
    assert!(error_str.contains("shape mismatch"));
    assert_eq!(error.source().unwrap().to_string(), "shape mismatch");
}

#[test]
fn test_writer_error() {
    let error = Error::writer("img", "disk full");
    let error_str = format!("{error}");
    assert!(error_str.contains("Writer error"));
    assert!(error_str.contains("disk full"));
    assert!(error.source().is_some());
}

#[test]
fn test_store_error() {
    let error = Error::Store("unknown datum 'd-1'".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Store error"));
    assert!(error_str.contains("d-1"));
}

#[test]
fn test_json_error_from_conversion() {
    let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error: Error = json_error.into();
    assert!(format!("{error}").contains("JSON error"));
}

#[test]
fn test_io_error_from_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: Error = io_error.into();
    let error_str = format!("{error}");
    assert!(error_str.contains("IO error"));
    assert!(error_str.contains("file not found"));
}

#[test]
fn test_error_debug_format() {
    let error = Error::Validation("test".to_string());
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("Validation"));
}
