//! Unit configuration: the `kip.toml` schema, parsing and loading.

pub mod cascade;
pub mod parser;
pub mod schema;
pub mod store;

pub use cascade::{
    CascadeField, DEFAULT_ENVIRONMENT, DEFAULT_TIMEOUT_SECS, EffectiveConfig, resolve,
    select_environment,
};
pub use parser::{CONFIG_FILE, parse_kip_toml, parse_kip_toml_str};
pub use schema::{
    EnvironmentOverride, Hook, SCHEMA_VERSION, ScriptConfig, UnitConfig, UnitKind,
};
pub use store::{ConfigStore, find_config_dir};
