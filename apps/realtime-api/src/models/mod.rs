pub mod app_token;
pub mod feed;
