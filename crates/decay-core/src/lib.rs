pub mod error;
pub mod events;
pub mod traits;
pub mod types;

pub use error::*;
pub use events::*;
pub use traits::*;
pub use types::*;
