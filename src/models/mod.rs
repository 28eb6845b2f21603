pub mod gbsnet;

pub use gbsnet::{GbsCls, GbsConvNet};
