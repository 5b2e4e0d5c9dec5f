pub mod elasticity;
pub mod smoothing;
pub mod volume;
