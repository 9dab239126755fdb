pub mod preview_cache;
pub mod record;
pub mod repository;
