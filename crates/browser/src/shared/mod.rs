pub mod js;
pub mod errors;
pub mod config;

pub use config::TimeoutConfig;
pub use errors::{BrowserError, to_dom_error};
