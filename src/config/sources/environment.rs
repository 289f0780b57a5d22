//! Environment source: FACTORBOX__SECTION__KEY, e.g. FACTORBOX__JOB__DEADLINE_SECS=60

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment};

pub fn add_to_builder(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix("FACTORBOX")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    )
}
