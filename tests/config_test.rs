//! Integration tests for configuration loading

use anpr_flows::domain::ConfigError;
use anpr_flows::infra::Config;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[test]
fn test_load_config_from_file() {
    let config_content = r#"
[mapper]
passes = 5
camera_range = 25.0

[trips]
speed_threshold_kmh = 3.6
duplicate_threshold_secs = 120
max_speed_kmh = 72.0
auto_sort = false

[flows]
freq = "15min"
pthreshold = 0.5
same_period = true
remove_na = true

[wrangle]
confidence_threshold = 0.9
digest_size = 16
digest_salt = "pepper"
date_format = "%d/%m/%Y %H:%M:%S"
"#;
    let temp_file = write_config(config_content);

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.mapper().passes, 5);
    assert_eq!(config.mapper().camera_range, 25.0);
    assert!((config.trips().speed_threshold - 1.0).abs() < 1e-12);
    assert!((config.trips().max_speed - 20.0).abs() < 1e-12);
    assert_eq!(config.trips().duplicate_threshold, 120.0);
    assert!(!config.trips().auto_sort);
    assert_eq!(config.flows().freq_secs, 900);
    assert_eq!(config.flows().pthreshold, 0.5);
    assert!(config.flows().same_period);
    assert!(config.flows().remove_na);
    assert!(config.flows().explicit_zeros);
    assert_eq!(config.wrangle().digest_size, 16);
    assert_eq!(config.wrangle().digest_salt.as_deref(), Some(&b"pepper"[..]));
    assert_eq!(config.wrangle().date_format, "%d/%m/%Y %H:%M:%S");
    assert_eq!(config.config_file(), temp_file.path().display().to_string());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml").unwrap();
    assert_eq!(config.mapper().passes, 3);
    assert_eq!(config.mapper().camera_range, 40.0);
    assert_eq!(config.flows().freq_secs, 300);
    assert!(config.wrangle().anonymise);
    assert_eq!(config.wrangle().digest_salt, None);
}

#[test]
fn test_malformed_file_is_an_error() {
    let temp_file = write_config("[flows\nfreq = ");
    assert!(Config::load_from_path(temp_file.path()).is_err());
}

#[test]
fn test_pthreshold_out_of_range_rejected() {
    let temp_file = write_config("[flows]\npthreshold = 1.5\n");

    let err = Config::load_from_path(temp_file.path()).unwrap_err();

    assert_eq!(err.downcast_ref::<ConfigError>(), Some(&ConfigError::PThresholdOutOfRange(1.5)));
}

#[test]
fn test_bad_frequency_rejected() {
    let temp_file = write_config("[flows]\nfreq = \"0min\"\n");
    assert!(Config::load_from_path(temp_file.path()).is_err());

    let temp_file = write_config("[flows]\nfreq = \"5 fortnights\"\n");
    assert!(Config::load_from_path(temp_file.path()).is_err());
}

#[test]
fn test_freq_override() {
    let config = Config::default().with_freq("1H").unwrap();
    assert_eq!(config.flows().freq_secs, 3600);
    assert!(Config::default().with_freq("-5min").is_err());
}
