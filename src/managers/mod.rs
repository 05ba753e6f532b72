pub mod host;

pub use host::HostManager;
