// Entity Models
// "Identity persists, values change": stable UUID, versioned values,
// registry for lookups.

pub mod category;

pub use category::{Category, CategoryRegistry, CategorySeed};
