mod coordinator;
mod error;
mod field;
mod persistence;
mod row;
mod run;
mod sink;

pub use coordinator::*;
pub use error::*;
pub use field::*;
pub use persistence::*;
pub use row::*;
pub use run::*;
pub use sink::*;
