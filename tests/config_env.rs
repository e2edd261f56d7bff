//! Configuration loading from files and the environment
//!
//! Environment variables are process-global, so every test here is serial.

use std::io::Write;

use escalar::config::{CONFIG_PATH_ENV, NON_FINITE_ENV, NUM_THREADS_ENV};
use escalar::{BlockScaledGemm, EscalarError, GemmConfig, GemmShape, NonFinitePolicy};
use serial_test::serial;
use tempfile::NamedTempFile;

fn clear_env() {
    std::env::remove_var(CONFIG_PATH_ENV);
    std::env::remove_var(NUM_THREADS_ENV);
    std::env::remove_var(NON_FINITE_ENV);
}

fn config_file(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
#[serial]
fn test_from_env_without_variables_is_default() {
    clear_env();
    assert_eq!(GemmConfig::from_env().unwrap(), GemmConfig::default());
}

#[test]
#[serial]
fn test_from_env_reads_config_file() {
    clear_env();
    let file = config_file(
        r#"{
            "tile_m": 8,
            "supported_shapes": [
                {"m": 128, "n": 256, "k": 256},
                {"m": 1, "n": 128, "k": 128}
            ]
        }"#,
    );
    std::env::set_var(CONFIG_PATH_ENV, file.path());
    let engine = BlockScaledGemm::from_env().unwrap();
    clear_env();

    assert_eq!(engine.config().tile_m, 8);
    assert_eq!(engine.registry().len(), 2);
    assert!(engine.registry().is_supported(1, 128, 128));
    assert!(!engine.registry().contains(&escalar::REFERENCE_SHAPE));
}

#[test]
#[serial]
fn test_env_overrides_apply_on_top_of_file() {
    clear_env();
    let file = config_file(r#"{"num_threads": 2, "non_finite": "reject"}"#);
    std::env::set_var(CONFIG_PATH_ENV, file.path());
    std::env::set_var(NUM_THREADS_ENV, "3");
    std::env::set_var(NON_FINITE_ENV, "Propagate");
    let config = GemmConfig::from_env();
    clear_env();

    let config = config.unwrap();
    assert_eq!(config.num_threads, Some(3));
    assert_eq!(config.non_finite, NonFinitePolicy::Propagate);
}

#[test]
#[serial]
fn test_invalid_overrides_rejected() {
    clear_env();
    std::env::set_var(NUM_THREADS_ENV, "many");
    let err = GemmConfig::from_env().unwrap_err();
    assert!(matches!(err, EscalarError::InvalidConfiguration(_)));

    std::env::set_var(NUM_THREADS_ENV, "0");
    let err = GemmConfig::from_env().unwrap_err();
    assert!(matches!(err, EscalarError::InvalidConfiguration(_)));

    clear_env();
    std::env::set_var(NON_FINITE_ENV, "mask");
    let err = GemmConfig::from_env().unwrap_err();
    clear_env();
    assert!(matches!(err, EscalarError::InvalidConfiguration(_)));
}

#[test]
#[serial]
fn test_missing_and_malformed_files() {
    clear_env();
    std::env::set_var(CONFIG_PATH_ENV, "/nonexistent/escalar/config.json");
    let err = GemmConfig::from_env().unwrap_err();
    assert!(matches!(err, EscalarError::IoError { .. }));

    let file = config_file("{ not json");
    std::env::set_var(CONFIG_PATH_ENV, file.path());
    let err = GemmConfig::from_env().unwrap_err();
    clear_env();
    assert!(matches!(err, EscalarError::FormatError { .. }));
}

#[cfg(unix)]
#[test]
#[serial]
fn test_non_unicode_variables_rejected() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let raw = OsStr::from_bytes(b"/tmp/escalar-\xff.json");
    for name in [CONFIG_PATH_ENV, NUM_THREADS_ENV, NON_FINITE_ENV] {
        clear_env();
        std::env::set_var(name, raw);
        let result = GemmConfig::from_env();
        clear_env();
        assert!(
            matches!(result, Err(EscalarError::InvalidConfiguration(_))),
            "{name}: {result:?}"
        );
    }
}

#[test]
#[serial]
fn test_misaligned_shape_in_file_rejected() {
    clear_env();
    let file = config_file(r#"{"supported_shapes": [{"m": 4, "n": 200, "k": 128}]}"#);
    let err = GemmConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(
        err,
        EscalarError::MisalignedDimension { axis: "N", value: 200, .. }
    ));
}

#[test]
fn test_file_roundtrip_builds_same_engine() {
    let config = GemmConfig::new()
        .with_tile_m(4)
        .with_tile_n(64)
        .with_supported_shape(GemmShape::new(4, 128, 128));
    let file = config_file(&config.to_json().unwrap());
    let loaded = GemmConfig::from_file(file.path()).unwrap();
    assert_eq!(loaded, config);
    assert!(BlockScaledGemm::new(loaded).is_ok());
}
