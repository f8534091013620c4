//! Environment source: `MADSEA__SECTION__KEY=value`.
//!
//! `MADSEA__CACHE__CACHE_ENABLED=false` sets `cache.cache_enabled`;
//! `MADSEA__API_KEYS__CLOUD=sk-...` sets `api_keys.cloud`.

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment};

pub fn add_to_builder(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix("MADSEA")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    )
}
