use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use syncline::config::ConfigLoader;
use tempfile::TempDir;

// Base64 of 32 bytes, the minimum viable credential key.
const KEY_B64: &str = "YWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWE=";

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    unsafe {
        for key in [
            "SYNCLINE_PROFILE",
            "SYNCLINE_HOST",
            "SYNCLINE_PORT",
            "SYNCLINE_DATABASE_URL",
            "SYNCLINE_LOG_FORMAT",
            "SYNCLINE_OPERATOR_TOKEN",
            "SYNCLINE_CREDENTIAL_KEY",
            "SYNCLINE_AUTO_MIGRATE",
            "SYNCLINE_SCHEDULER_ENABLED",
            "SYNCLINE_SCHEDULER_HOT_INTERVAL_SECS",
            "SYNCLINE_WEBHOOK_VIMEO_SECRET",
            "SYNCLINE_RATE_LIMIT_OVERRIDE_VIMEO_LIMIT",
            "SYNCLINE_RATE_LIMIT_OVERRIDE_VIMEO_WINDOW_MS",
            "SYNCLINE_SCHEDULER_INTERVAL_OVERRIDE_BROKER_HOT_SECS",
        ] {
            env::remove_var(key);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

#[test]
fn loads_defaults_when_no_env_files_present() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("SYNCLINE_CREDENTIAL_KEY", KEY_B64);
        env::set_var("SYNCLINE_OPERATOR_TOKEN", "ops-token");
    }

    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.bind_addr(), "0.0.0.0:8080");
    assert!(cfg.auto_migrate);
    assert_eq!(cfg.scheduler.tick_interval_ms, 5000);
    assert_eq!(cfg.scheduler.hot_interval_secs, 60);
    assert_eq!(cfg.rate_limit.default_limit, 60);
    assert_eq!(cfg.credential_key.as_ref().map(|k| k.len()), Some(32));

    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "SYNCLINE_PORT=3000\n");
    write_env_file(&temp_dir, ".env.test", "SYNCLINE_PORT=5000\n");
    write_env_file(&temp_dir, ".env.test.local", "SYNCLINE_PORT=6000\n");

    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        &format!(
            "SYNCLINE_PROFILE=test\nSYNCLINE_PORT=4000\nSYNCLINE_OPERATOR_TOKEN=layered-token\nSYNCLINE_CREDENTIAL_KEY={}\n",
            KEY_B64
        ),
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.port, 6000);

    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "SYNCLINE_PORT=3000\nSYNCLINE_OPERATOR_TOKEN=file-token\n",
    );

    unsafe {
        env::set_var("SYNCLINE_PORT", "9090");
        env::set_var("SYNCLINE_CREDENTIAL_KEY", KEY_B64);
    }

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with env override");
    assert_eq!(cfg.port, 9090);
    assert_eq!(cfg.operator_token.as_deref(), Some("file-token"));

    clear_env();
}

#[test]
fn missing_operator_token_fails_validation() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("SYNCLINE_CREDENTIAL_KEY", KEY_B64);
    }

    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("missing token should fail");
    assert!(format!("{}", err).contains("operator token"));

    clear_env();
}

#[test]
fn invalid_credential_key_is_rejected() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    unsafe {
        env::set_var("SYNCLINE_OPERATOR_TOKEN", "ops-token");
        env::set_var("SYNCLINE_CREDENTIAL_KEY", "not-base64!!");
    }
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("malformed base64 should fail");
    assert!(format!("{}", err).contains("invalid base64"));

    // Valid base64 of the wrong length fails later, at validation.
    unsafe {
        env::set_var("SYNCLINE_CREDENTIAL_KEY", "YWFhYWFhYWFhYWFhYWFhYQ==");
    }
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("16-byte key should fail");
    assert!(format!("{}", err).contains("32 bytes"));

    clear_env();
}

#[test]
fn webhook_secrets_and_provider_overrides_parse() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        &format!(
            concat!(
                "SYNCLINE_OPERATOR_TOKEN=ops-token\n",
                "SYNCLINE_CREDENTIAL_KEY={}\n",
                "SYNCLINE_WEBHOOK_VIMEO_SECRET=hook-secret\n",
                "SYNCLINE_RATE_LIMIT_OVERRIDE_VIMEO_LIMIT=10\n",
                "SYNCLINE_RATE_LIMIT_OVERRIDE_VIMEO_WINDOW_MS=1000\n",
                "SYNCLINE_SCHEDULER_INTERVAL_OVERRIDE_BROKER_HOT_SECS=30\n",
            ),
            KEY_B64
        ),
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with overrides");

    assert_eq!(
        cfg.webhooks.secrets.get("vimeo").map(String::as_str),
        Some("hook-secret")
    );

    let limit = cfg
        .rate_limit
        .provider_overrides
        .get("vimeo")
        .expect("vimeo rate limit override present");
    assert_eq!(limit.limit, 10);
    assert_eq!(limit.window_ms, 1000);

    let intervals = cfg
        .scheduler
        .provider_interval_overrides
        .get("broker")
        .expect("broker interval override present");
    assert_eq!(intervals.hot_secs, 30);
    // Unset tiers fall back to the global defaults.
    assert_eq!(intervals.warm_secs, 180);
    assert_eq!(intervals.cold_secs, 600);

    clear_env();
}
