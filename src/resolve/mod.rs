pub mod detector;
pub mod resolver;

pub use detector::{DetectorRunner, ProcessDetector};
pub use resolver::{Resolver, read_probe};
