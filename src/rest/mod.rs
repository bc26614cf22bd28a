//! The REST model the pipeline operates on, decoupled from the HTTP
//! framework that parses requests off the wire.

pub mod error;
pub mod headers;
pub mod request;
pub mod response;

pub use error::{RestError, RestErrorKind};
pub use request::{Arg, FrontendOperation, RequestPath, RestMethod, RestRequest, SubResource};
pub use response::{ResponseStatus, RestResponseChannel};
