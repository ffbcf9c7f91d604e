//! Tests for daemon error types

use crate::error::DaemonError;
use intake_core::IngestError;

#[test]
fn exit_codes_by_failure_class() {
    assert_eq!(DaemonError::ConfigError("bad".to_string()).exit_code(), 2);
    assert_eq!(
        DaemonError::from(IngestError::Config("bad".to_string())).exit_code(),
        2
    );
    assert_eq!(
        DaemonError::from(IngestError::Bind {
            addr: "127.0.0.1:1".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        })
        .exit_code(),
        3
    );
    assert_eq!(
        DaemonError::from(IngestError::Listener("broken".to_string())).exit_code(),
        3
    );
    assert_eq!(
        DaemonError::from(IngestError::storage("intake.log", "disk full")).exit_code(),
        4
    );
    assert_eq!(
        DaemonError::from(std::io::Error::new(std::io::ErrorKind::Other, "x")).exit_code(),
        4
    );
}

#[test]
fn display_includes_source_message() {
    let err = DaemonError::from(IngestError::storage("intake.log", "disk full"));
    assert!(err.to_string().contains("disk full"));

    let err = DaemonError::ConfigError("port: must be 1..=65535".to_string());
    assert_eq!(err.to_string(), "Config error: port: must be 1..=65535");
}
