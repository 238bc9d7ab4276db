//! Database models split into domain-specific modules.

pub mod audit;
pub mod book;
pub mod cached_book;
pub mod challenge;
pub mod invitation;
pub mod school;
pub mod student;
pub mod user;

pub use audit::*;
pub use book::*;
pub use cached_book::*;
pub use challenge::*;
pub use invitation::*;
pub use school::*;
pub use student::*;
pub use user::*;
