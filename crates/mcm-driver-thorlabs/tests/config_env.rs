//! Environment overrides layered over configuration files.
//!
//! Kept in its own test binary so the variables set here cannot leak into
//! other file-loading tests running in parallel.

use figment::Jail;
use mcm_driver_thorlabs::config::ENV_PREFIX;
use mcm_driver_thorlabs::{Mcm3000Config, StageModel};
use std::path::Path;
use std::time::Duration;

const FILE: &str = r#"
    port = "/dev/ttyUSB0"
    timeout = "5s"
    move_timeout = "8s"

    [[axes]]
    axis = 1
    stage = "PLS-X"
"#;

#[test]
fn test_env_overrides_file() {
    Jail::expect_with(|jail| {
        jail.create_file("mcm3000.toml", FILE)?;
        jail.set_env(format!("{}PORT", ENV_PREFIX), "/dev/ttyACM7");
        jail.set_env(format!("{}TIMEOUT", ENV_PREFIX), "250ms");

        let cfg = Mcm3000Config::load(Path::new("mcm3000.toml")).map_err(|e| e.to_string())?;
        assert_eq!(cfg.port, "/dev/ttyACM7");
        assert_eq!(cfg.timeout, Duration::from_millis(250));
        assert_eq!(cfg.move_timeout, Duration::from_secs(8));
        assert_eq!(cfg.axes[0].stage, StageModel::PlsX);
        Ok(())
    });
}

#[test]
fn test_invalid_env_value_fails_validation() {
    Jail::expect_with(|jail| {
        jail.create_file("mcm3000.toml", FILE)?;
        jail.set_env(format!("{}BAUD_RATE", ENV_PREFIX), "42");

        let err = Mcm3000Config::load(Path::new("mcm3000.toml")).unwrap_err();
        assert!(err.to_string().contains("baud_rate 42"));
        Ok(())
    });
}

#[test]
fn test_unprefixed_variables_are_ignored() {
    Jail::expect_with(|jail| {
        jail.create_file("mcm3000.toml", FILE)?;
        jail.set_env("PORT", "/dev/ttyS9");

        let cfg = Mcm3000Config::load(Path::new("mcm3000.toml")).map_err(|e| e.to_string())?;
        assert_eq!(cfg.port, "/dev/ttyUSB0");
        Ok(())
    });
}
