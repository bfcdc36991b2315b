pub mod procurement;
pub mod session;
pub mod supplier;
