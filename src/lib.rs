pub mod data;
pub mod metrics;
pub mod model;
pub mod prep;
pub mod recipe;
pub mod split;
pub mod synth;
