pub mod driver;
pub mod merge;
