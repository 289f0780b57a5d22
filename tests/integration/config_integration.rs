//! Integration tests for configuration loading and workspace catalogs

use crate::integration::test_utils::with_env;
use factorbox::cli::{Cli, RunContext};
use factorbox::config::{ConfigLoader, ValidationError};
use factorbox::error::FactorError;
use clap::Parser;
use std::time::Duration;
use tempfile::TempDir;

fn write(path: &std::path::Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

#[test]
fn test_workspace_config_drives_run_context() {
    let temp_dir = TempDir::new().unwrap();
    let workspace = temp_dir.path().join("ws");
    write(
        &workspace.join("config/config.toml"),
        r#"
[job]
deadline_secs = 90
log_drain_ms = 500

[build]
work_dir = "out/contexts"

[catalog]
factors_dir = "my_factors"
"#,
    );
    write(
        &workspace.join("my_factors/rsi.toml"),
        r#"
name = "RSI"
description = "Relative Strength Index"
source = "RSI.py"

[[parameters]]
name = "window"
type = "int"
"#,
    );
    write(
        &workspace.join("my_factors/RSI.py"),
        "def RSI(data, window=14):\n    return data\n",
    );

    let ctx = with_env(
        &[
            ("XDG_CONFIG_HOME", Some(temp_dir.path().join("xdg").to_str().unwrap())),
            ("FACTORBOX_ENV", None),
            ("FACTORBOX__JOB__DEADLINE_SECS", None),
        ],
        || RunContext::new(workspace.clone(), None),
    )
    .unwrap();

    assert_eq!(ctx.config().job.deadline_secs, 90);
    assert_eq!(ctx.config().job.settings().log_drain, Duration::from_millis(500));
    assert_eq!(ctx.catalog().len(), 3);

    let cli = Cli::try_parse_from(["factorbox", "generate", "rsi"]).unwrap();
    ctx.execute(&cli.command).unwrap();
    assert!(workspace.join("out/contexts/rsi/RSI.py").exists());
    let main = std::fs::read_to_string(workspace.join("out/contexts/rsi/main.py")).unwrap();
    assert!(main.contains("parser.add_argument(\"--window\", type=int)"));
}

#[test]
fn test_environment_overrides_workspace_file() {
    let temp_dir = TempDir::new().unwrap();
    write(
        &temp_dir.path().join("config/config.toml"),
        "[engine]\nendpoint = \"http://file:2375\"\n",
    );

    let config = with_env(
        &[
            ("XDG_CONFIG_HOME", Some(temp_dir.path().join("xdg").to_str().unwrap())),
            ("FACTORBOX_ENV", None),
            ("FACTORBOX__ENGINE__ENDPOINT", Some("http://env:2375")),
        ],
        || ConfigLoader::load(temp_dir.path()),
    )
    .unwrap();

    assert_eq!(config.engine.endpoint.as_deref(), Some("http://env:2375"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("factorbox.toml");
    write(
        &config_file,
        "[job]\ndeadline_secs = 0\nentry_point_target = \"main.py\"\n",
    );

    let config = with_env(&[("FACTORBOX__JOB__DEADLINE_SECS", None)], || {
        ConfigLoader::load_from_file(&config_file)
    })
    .unwrap();
    let errors = config.validate().unwrap_err();
    assert_eq!(errors.len(), 1);
    assert!(matches!(&errors[0], ValidationError::Job(msg) if msg.contains("Deadline")));

    let err = with_env(&[("FACTORBOX__JOB__DEADLINE_SECS", None)], || {
        RunContext::new(temp_dir.path().to_path_buf(), Some(config_file.clone()))
    })
    .err()
    .unwrap();
    assert!(matches!(err, FactorError::Config(_)));
}

#[test]
fn test_broken_manifest_is_a_config_error() {
    let temp_dir = TempDir::new().unwrap();
    write(
        &temp_dir.path().join("factors/bad.toml"),
        "name = \"BAD\"\nsource = \"missing.py\"\n",
    );

    let err = with_env(
        &[
            ("XDG_CONFIG_HOME", Some(temp_dir.path().join("xdg").to_str().unwrap())),
            ("FACTORBOX_ENV", None),
        ],
        || RunContext::new(temp_dir.path().to_path_buf(), None),
    )
    .err()
    .unwrap();
    assert!(err.to_string().contains("missing.py"));
}
