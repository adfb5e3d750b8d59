// Core modules implementing key encoding, engine adapters, predicates, and error modeling.
pub mod backend;
pub mod codec;
pub mod error;
pub(crate) mod expiry;
pub(crate) mod lock;
pub mod options;
pub mod predicate;
pub mod scan;
