pub mod config;
pub mod directory;
pub mod error;
pub mod logging;
pub mod upstream;

pub use directory::{
    CallContext, Credential, DirectoryEntry, DirectoryRegistry, DirectoryResolver,
};
pub use error::{DirectoryError, Result, UpstreamError};
