pub mod request;
pub mod response;

pub use request::{Body, Method, QueryValue, Request};
pub use response::{Response, ResponseBody};
