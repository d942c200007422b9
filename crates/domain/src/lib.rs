pub mod documents;
pub mod error;
pub mod groups;
pub mod identity;
pub mod media;
pub mod ports;
pub mod posts;
pub mod users;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;
