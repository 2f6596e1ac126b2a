pub mod request;
pub mod types;
