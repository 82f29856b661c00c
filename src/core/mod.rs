// Core modules implementing the table text format, the data model and error modeling.
pub mod decode;
pub mod encode;
pub mod error;
pub(crate) mod lexer;
pub mod table;
pub mod value;
