pub mod drive_client;
pub mod http;
mod responses;
pub mod token_cache;
pub mod token_client;
