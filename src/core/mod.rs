// Core modules implementing connections, streams, storage, and error modeling.
pub mod aggregate;
pub mod batch;
pub mod connection;
pub mod error;
pub mod file;
pub mod memory;
pub mod paginate;
pub mod query;
pub mod rows;
pub mod table;
pub mod value;
