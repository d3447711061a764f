//! Service resolution for endpoints.
//!
//! 1. **Descriptors** (`registry`): named services with async registration functions
//! 2. **Registry** (`registry`): single-flight, cached resolution per runtime lifetime
//! 3. **Pool** (`registry`): one registry per (logger, environment) pair
//! 4. **Sniffing** (`sniff`): static discovery of the configuration keys services read

pub mod environment;
pub mod registry;
pub mod sniff;

pub use environment::Environment;
pub use registry::{
    Instance, RegistryError, RegistryPool, ServiceContext, ServiceDescriptor, ServiceRegistry,
    Services, SharedError,
};
pub use sniff::{ConfigSniffer, SniffReport};
