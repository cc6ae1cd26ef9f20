//! Configuration files on disk.

use mcm_driver_thorlabs::{ConfigError, Mcm3000Config, StageModel};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(text: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_shipped_config_loads() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/mcm3000.toml");
    let cfg = Mcm3000Config::load(&path).unwrap();

    assert_eq!(cfg.home_timeout, Duration::from_secs(30));
    assert_eq!(cfg.poll_interval, Duration::from_millis(20));

    let axes = cfg.axis_settings().unwrap();
    let numbers: Vec<u8> = axes.iter().map(|(a, _)| a.number()).collect();
    assert_eq!(numbers, vec![1, 2, 3]);

    let (_, z) = &axes[2];
    assert_eq!(z.stage, Some(StageModel::Zfm2020));
    assert!(z.reverse);
}

#[test]
fn test_load_from_file() {
    let file = write_config(
        r#"
        port = "/dev/ttyUSB3"
        move_timeout = "1m 30s"
        wait_for_moves = false

        [[axes]]
        axis = 2
        stage = "MMP-2XY"
        "#,
    );

    let cfg = Mcm3000Config::load(file.path()).unwrap();
    assert_eq!(cfg.port, "/dev/ttyUSB3");
    assert_eq!(cfg.move_timeout, Duration::from_secs(90));
    assert!(!cfg.wait_for_moves);
    assert_eq!(cfg.axes[0].stage, StageModel::Mmp2Xy);
}

#[test]
fn test_missing_file() {
    let err = Mcm3000Config::load(std::path::Path::new("/nonexistent/mcm3000.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound(_)));
}

#[test]
fn test_invalid_file_is_rejected() {
    let file = write_config(
        r#"
        port = "auto"
        baud_rate = 12

        [[axes]]
        axis = 7
        stage = "ZFM2030"
        "#,
    );

    let err = Mcm3000Config::load(file.path()).unwrap_err();
    let msg = err.to_string();
    assert!(matches!(err, ConfigError::ValidationError(_)));
    assert!(msg.contains("baud_rate 12"));
    assert!(msg.contains("axis 7"));
}
