pub mod constants;
pub mod led;
pub mod types;
