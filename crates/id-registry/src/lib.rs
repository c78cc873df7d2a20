//! id-registry: stable small-integer identifiers for device and state names
//!
//! Identifiers are handed out in first-seen order and persisted as `name<TAB>id`
//! text files so that the identifier space survives restarts.

mod error;
pub use error::{RegistryError, Result};

mod store;
pub use store::{parse_entries, Entry, RegistryStore};

mod registry;
pub use registry::{FlushPolicy, IdentifierRegistry, Registries, DEVICES_FILE, ID_LIMIT, STATES_FILE};
