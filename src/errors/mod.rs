pub mod types;

pub use types::{AppError, ExecutableError, StreamError};
