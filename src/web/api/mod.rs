pub mod checks;
pub mod error;
pub mod stream;
