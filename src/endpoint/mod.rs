//! Everything needed to reach one remote HSM endpoint: the credential used
//! for it, its cancellable execution context, and the REST client that
//! checks whether it is ready.
pub mod client;
pub mod context;
pub mod credential;
pub mod probe;

pub use client::ApiClient;
pub use context::EndpointContext;
pub use probe::ReadinessProbe;
