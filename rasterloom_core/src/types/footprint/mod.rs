mod constructors;
mod fmt;
mod queries;
mod sampling;
mod tiling;
#[cfg(test)]
mod tests;

pub use constructors::*;
pub use tiling::BoundaryEffect;
