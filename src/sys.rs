pub mod app;
pub mod axuielement;
pub mod observer;
pub mod permissions;
pub mod skylight;
pub mod window_server;
