//! Grantflow Core - Entity Types
//!
//! Data structures shared by the storage and API crates. No I/O lives here:
//! only rows, enums, partial updates and the derived values that must stay in
//! sync with them (checklist completion, budget totals).

mod derived;
mod entities;
mod enums;
mod error;
mod identity;
mod patch;

pub use derived::*;
pub use entities::*;
pub use enums::*;
pub use error::*;
pub use identity::*;
pub use patch::*;
