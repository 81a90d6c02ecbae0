//! External collaborators: graphics device, materials and scene

mod dummy;
mod traits;

pub use dummy::{DummyDevice, StaticMaterials, StaticScene};
pub use traits::*;
