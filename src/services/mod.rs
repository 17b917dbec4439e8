pub mod acl;
pub mod audit;
pub mod backend;
pub mod credentials;
pub mod diagnostics;
pub mod migration;
pub mod path_codec;
pub mod upload_sessions;
