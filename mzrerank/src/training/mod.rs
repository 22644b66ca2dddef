//! Training of the scoring network and selection of the final model

mod parameters;
mod report;
mod trainer;

pub use parameters::*;
pub use report::*;
pub use trainer::*;
