//! Plan model: entities, identifiers, parsing, serialization and
//! dependency validation.

mod hash;
mod model;
mod parser;
mod types;
mod validator;

pub use hash::IdHasher;
pub use model::{DEFAULT_SYNTAX_VERSION, Plan};
pub use parser::PlanParser;
pub use types::{Change, Dependency, DependencyKind, Planner, Tag};
pub use validator::DependencyValidator;
