pub mod executor;
pub mod land_executor;
pub mod template;
pub mod value;

pub use executor::SqlExecutor;
pub use land_executor::LandExecutor;
pub use template::{TemplateCache, Templates};
pub use value::{SqlRecord, SqlValue};
