pub mod error;
pub mod identity;
pub mod pointer;
pub mod store;
