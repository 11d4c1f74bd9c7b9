pub mod endpoints;
pub mod types;

pub use endpoints::BackendApi;
