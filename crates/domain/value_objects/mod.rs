pub mod bearer_token;
pub mod folder_listing;
pub mod retention;
pub mod retry_policy;
pub mod staged_archive;
pub mod upload_session;
