pub mod catalog;
pub mod credentials;
pub mod materializer;
