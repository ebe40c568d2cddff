//! Error message quality tests
//!
//! Tests that verify error messages are helpful and distinguishable.

use std::error::Error;
use zfs_event_exporter::error::{ExporterError, LineError};
use zfs_event_exporter::zfs::snapshot::parse_listing;

#[test]
fn test_parse_error_lists_every_line() {
    // Given: A parse error over two lines
    let error = ExporterError::Parse {
        input: "zfs list",
        lines: vec![
            LineError::new(2, "bad", vec!["expected 3 fields, found 1".to_string()]),
            LineError::new(
                5,
                "a@b x y",
                vec![
                    "invalid creation time \"x\"".to_string(),
                    "invalid used bytes \"y\"".to_string(),
                ],
            ),
        ],
    };

    // When: Converting to string
    let message = error.to_string();

    // Then: Input, line numbers, texts and causes are all present
    assert_eq!(
        message,
        "Parse error in zfs list: line 2 \"bad\": expected 3 fields, found 1; \
         line 5 \"a@b x y\": invalid creation time \"x\", invalid used bytes \"y\""
    );
}

#[test]
fn test_listing_error_names_offending_values() {
    // Given: A listing line with a bad timestamp
    // When: Parsing it
    let error = parse_listing("tank/ds@a yesterday 10\n").expect_err("Parse should fail");

    // Then: The message quotes the value
    assert!(error.to_string().contains("\"yesterday\""));
}

#[test]
fn test_command_start_error_keeps_source() {
    // Given: A spawn failure
    let error = ExporterError::CommandStart {
        command: "zpool status -pP".to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
    };

    // When: Converting to string
    let message = error.to_string();

    // Then: Command and cause are present, and the source is chained
    assert!(message.contains("zpool status -pP"));
    assert!(message.contains("No such file"));
    assert!(error.source().is_some());
}

#[test]
fn test_decode_error_message_clarity() {
    // Given: A decode error
    let error = ExporterError::Decode {
        line_number: 42,
        reason: "unable to parse seconds: invalid integer \"0xZZ\"".to_string(),
    };

    // When: Converting to string
    let message = error.to_string();

    // Then: Line and reason are present
    assert!(message.contains("Event stream decode error"));
    assert!(message.contains("line 42"));
    assert!(message.contains("0xZZ"));
}

#[test]
fn test_config_error_message_clarity() {
    // Given: A configuration error
    let error = ExporterError::Config("invalid snapshot exclude pattern".to_string());

    // When: Converting to string
    let message = format!("{}", error);

    // Then: Message should clearly indicate configuration issue
    assert!(message.contains("Configuration error"));
    assert!(message.contains("invalid snapshot exclude pattern"));
}

#[test]
fn test_io_error_converts() {
    // Given: An IO error
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");

    // When: Converting into the exporter error
    let error: ExporterError = io.into();

    // Then: It keeps the IO message
    assert!(matches!(error, ExporterError::Io(_)));
    assert!(error.to_string().contains("denied"));
}

#[test]
fn test_error_messages_are_distinguishable() {
    // Given: One error of each kind
    let errors = [
        ExporterError::Parse {
            input: "zpool status",
            lines: Vec::new(),
        },
        ExporterError::Decode {
            line_number: 1,
            reason: "x".to_string(),
        },
        ExporterError::Config("x".to_string()),
        ExporterError::Server("x".to_string()),
    ];

    // When: Rendering their prefixes
    let prefixes: Vec<String> = errors
        .iter()
        .map(|e| e.to_string().split(':').next().unwrap_or_default().to_string())
        .collect();

    // Then: No two kinds share a prefix
    let mut unique = prefixes.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), prefixes.len());
}
