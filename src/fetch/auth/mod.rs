//! Credential injection for API requests.

mod url_param;

pub use url_param::{UrlParam, app_credentials};
