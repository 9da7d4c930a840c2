pub mod distance;
pub mod spd;

pub use distance::Distance;
pub use spd::{eig_fn, inv_sqrtm, logm};
