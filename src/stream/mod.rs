pub mod broadcaster;
pub mod subscriber;

pub use broadcaster::Broadcaster;
