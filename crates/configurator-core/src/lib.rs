//! Configurator core library
//!
//! Building blocks shared by the script pipeline and the CLI:
//! - XML element tree with verbatim span tracking
//! - Values document flattening into environment bindings
//! - Settings and configurator kinds
//! - Configuration store and stale file janitor

pub mod error;
pub mod janitor;
pub mod settings;
pub mod store;
pub mod telemetry;
pub mod values;
pub mod xml;

pub use error::{ParseError, SettingsError, StoreError, XmlError};
pub use janitor::{remove_files, StaleFileScan};
pub use settings::{ConfiguratorKind, Settings, DEFAULT_MAX_OUTPUT_BYTES};
pub use store::{ConfigStore, FsConfigStore, MemoryConfigStore};
pub use telemetry::init_tracing;
pub use values::{load_values, resolve, Environment, ValueMap, KEY_SEPARATOR, LIST_ATTRIBUTE};
pub use xml::{element_name, Document, Element};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
