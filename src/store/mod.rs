pub mod coordination;
pub mod drivers;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod rides;

pub use coordination::{CoordinationStore, DriverCache, InMemoryCoordinationStore};
pub use drivers::{DriverDirectory, InMemoryDriverDirectory};
pub use rides::{InMemoryRideStore, RideStore};
