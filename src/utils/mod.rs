pub mod dataset;
pub mod evaluation;
pub mod linalg;
pub mod neighbors;
pub mod split;
