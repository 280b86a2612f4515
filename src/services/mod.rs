pub mod materializer;
pub mod soundcloud;
pub mod sync;
