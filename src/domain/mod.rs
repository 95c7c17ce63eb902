pub mod category;
pub mod point;

pub use category::{Api, Category, UnknownCategory};
pub use point::{PayloadEncoding, Point};
