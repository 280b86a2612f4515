pub mod catalog;
pub mod credentials;

pub use catalog::SoundCloudCatalog;
pub use credentials::{OAuthCredentials, OAuthSettings};
