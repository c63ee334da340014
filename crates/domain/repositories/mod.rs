pub mod archiver;
pub mod remote_directory;
pub mod sleeper;
pub mod token_provider;
pub mod upload_session_store;
pub mod upload_target;
