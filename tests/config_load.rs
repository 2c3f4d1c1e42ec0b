// tests/config_load.rs
//
// Config file lookup order and environment overrides. Tests touching the
// process env or CWD run serially.

use std::time::Duration;
use std::{env, fs};

use crop_advisor::config::{
    api_key_env_var, AppConfig, ENV_CACHE_TTL_SECS, ENV_CONFIG_PATH, ENV_RETRY_MAX_ATTEMPTS,
};
use crop_advisor::features::Source;

const MINIMAL: &str = r#"
[cache]
ttl_secs = 7200
"#;

fn clear_env() {
    for var in [ENV_CONFIG_PATH, ENV_CACHE_TTL_SECS, ENV_RETRY_MAX_ATTEMPTS] {
        env::remove_var(var);
    }
    for source in Source::ALL {
        env::remove_var(api_key_env_var(source));
    }
}

#[test]
fn shipped_config_parses_and_validates() {
    let cfg = AppConfig::from_toml_str(include_str!("../config/advisor.toml")).unwrap();
    cfg.validate().unwrap();
    assert_eq!(cfg.cache.ttl().unwrap(), Duration::from_secs(21_600));
    assert_eq!(cfg.cache.degraded_ttl().unwrap(), Duration::from_secs(1_800));
    assert_eq!(cfg.retry.policy().max_attempts, 10);
    assert_eq!(cfg.connectivity.targets.len(), 3);
    assert_eq!(cfg.sources.vegetation.lookback_days, 144);
}

#[serial_test::serial]
#[test]
fn default_uses_env_then_fallbacks() {
    clear_env();
    // Isolate CWD so the repo's config/ is not picked up.
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();

    // 1) Nothing at all: built-in defaults lack a TTL.
    let err = AppConfig::load_default().unwrap_err();
    assert!(format!("{err:#}").contains("ttl"), "{err:#}");

    // 2) TTL from the env is enough with built-in defaults.
    env::set_var(ENV_CACHE_TTL_SECS, "900");
    let cfg = AppConfig::load_default().unwrap();
    assert_eq!(cfg.cache.ttl().unwrap(), Duration::from_secs(900));
    env::remove_var(ENV_CACHE_TTL_SECS);

    // 3) Fallback file in ./config/
    let cfg_dir = tmp.path().join("config");
    fs::create_dir_all(&cfg_dir).unwrap();
    fs::write(cfg_dir.join("advisor.toml"), MINIMAL).unwrap();
    let cfg = AppConfig::load_default().unwrap();
    assert_eq!(cfg.cache.ttl().unwrap(), Duration::from_secs(7_200));

    // 4) Explicit path wins over ./config/
    let p_env = tmp.path().join("other.toml");
    fs::write(&p_env, "[cache]\nttl_secs = 60\n[model]\ntop_n = 5\n").unwrap();
    env::set_var(ENV_CONFIG_PATH, p_env.display().to_string());
    let cfg = AppConfig::load_default().unwrap();
    assert_eq!(cfg.cache.ttl().unwrap(), Duration::from_secs(60));
    assert_eq!(cfg.model.top_n, 5);

    // 5) Explicit path that does not exist is an error, not a fallback.
    env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
    assert!(AppConfig::load_default().is_err());

    clear_env();
    env::set_current_dir(&old).unwrap();
}

#[serial_test::serial]
#[test]
fn env_overrides_file_values() {
    clear_env();
    let tmp = tempfile::tempdir().unwrap();
    let p = tmp.path().join("advisor.toml");
    fs::write(&p, MINIMAL).unwrap();

    env::set_var(ENV_CACHE_TTL_SECS, "120");
    env::set_var(ENV_RETRY_MAX_ATTEMPTS, "3");
    let cfg = AppConfig::load_from(&p).unwrap();
    assert_eq!(cfg.cache.ttl().unwrap(), Duration::from_secs(120));
    assert_eq!(cfg.retry.policy().max_attempts, 3);

    env::set_var(ENV_RETRY_MAX_ATTEMPTS, "many");
    assert!(AppConfig::load_from(&p).is_err());

    clear_env();
}

#[serial_test::serial]
#[test]
fn api_key_env_placeholder_is_resolved() {
    clear_env();
    let tmp = tempfile::tempdir().unwrap();
    let p = tmp.path().join("advisor.toml");
    fs::write(
        &p,
        r#"
[cache]
ttl_secs = 600

[sources.soil]
base_url = "https://rest.isric.org/soilgrids/v2.0/properties/query"
lookback_days = 1
timeout_secs = 30
api_key = "ENV"
"#,
    )
    .unwrap();

    // Placeholder without the variable fails loudly.
    let err = AppConfig::load_from(&p).unwrap_err();
    assert!(format!("{err:#}").contains("ADVISOR_SOIL_API_KEY"), "{err:#}");

    env::set_var(api_key_env_var(Source::Soil), "s3cret");
    let cfg = AppConfig::load_from(&p).unwrap();
    assert_eq!(cfg.sources.soil.api_key.as_deref(), Some("s3cret"));
    assert_eq!(cfg.sources.climate.api_key, None);

    clear_env();
}
