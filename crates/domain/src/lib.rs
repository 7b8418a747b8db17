pub mod admission;
pub mod error;
pub mod ports;
pub mod quest;
pub mod records;
pub mod submissions;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;
