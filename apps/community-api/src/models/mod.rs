pub mod community;
pub mod membership;
pub mod message;
pub mod user;
