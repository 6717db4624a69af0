//! AI function surface: signatures, versioned catalogs, result decoding,
//! semantic-model questions.

pub mod analyst;
pub mod catalog;
pub mod functions;
pub mod output;

pub use analyst::{AnalystAnswer, AnalystRequest};
pub use catalog::{CatalogVersion, FunctionCatalog, Invocation};
pub use functions::{AiFunction, ParamShape, ReturnShape};
pub use output::{decode, AiOutput, Polarity};
