//! Merge rules: defaults first, later sources override earlier ones key by key.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

/// Create a Config builder with the scalar defaults applied.
///
/// List-valued keys take their defaults from serde so a source that sets a
/// list replaces it instead of merging element-wise.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("engine.api_version", "v1.41")?
        .set_default("engine.connect_timeout_secs", 10)?
        .set_default("engine.request_timeout_secs", 30)?
        .set_default("build.base_image", "python:3.10")?
        .set_default("build.work_dir", ".factorbox/build")?
        .set_default("build.keep_context", false)?
        .set_default("job.deadline_secs", 3600)?
        .set_default("job.entry_point_target", "/app/main.py")?
        .set_default("job.stop_grace_secs", 10)?
        .set_default("job.log_drain_ms", 2000)?
        .set_default("catalog.factors_dir", "factors")
}
