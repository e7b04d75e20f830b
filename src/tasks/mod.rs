//! Task model and generation.

pub mod answered;
pub mod generator;
pub mod model;

pub use generator::TaskGenerator;
pub use model::{AiType, Task};
