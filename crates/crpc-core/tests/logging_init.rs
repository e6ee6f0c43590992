//! Logging setup checks that need their own process: the global tracing
//! subscriber can only be installed once, so this lives outside the unit
//! test binary.

use std::fs;

use crpc_core::logging::{init_logging, LogFormat};

#[test]
fn json_file_output_captures_events() {
    // The ambient RUST_LOG would override the verbosity-derived filter.
    std::env::remove_var("RUST_LOG");

    let path = std::env::temp_dir().join(format!("crpc-logging-{}.json", std::process::id()));

    init_logging(3, Some(&path), LogFormat::Json).unwrap();
    tracing::info!(target: "crpc_core::logging_check", "logging initialized");

    let contents = fs::read_to_string(&path).unwrap();
    let _ = fs::remove_file(&path);

    assert!(
        contents.contains("logging initialized"),
        "log file missing the emitted event: {}",
        contents
    );
    assert!(
        contents.contains("\"target\":\"crpc_core::logging_check\""),
        "log file is not JSON formatted: {}",
        contents
    );

    // A second initialization must fail instead of clobbering the first.
    assert!(init_logging(2, None, LogFormat::Text).is_err());
}
