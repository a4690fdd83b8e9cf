// Library facade so integration tests and other crates can use the modules.
pub mod classifier;
pub mod config;
pub mod error;
pub mod event;
pub mod geo;
pub mod guard;
pub mod listener;
pub mod metrics;
pub mod protocol;
pub mod reporter;
pub mod service;
pub mod session;

// Re-export commonly used types
pub use classifier::{AttackProfile, Classifier};
pub use config::Config;
pub use event::{AttackEvent, EventBus, EventType};
pub use guard::{Guard, Verdict};
pub use listener::Listeners;
pub use reporter::Reporter;
pub use service::{Protocol, ServiceDescriptor, Transport};
