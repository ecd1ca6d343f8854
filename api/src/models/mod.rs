pub mod entity;
pub mod user;
pub mod validate;
