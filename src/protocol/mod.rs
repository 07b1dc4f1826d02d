//! RESP protocol implementation
//!
//! Implements the subset of the Redis serialization protocol the server
//! speaks: simple strings, errors, integers, bulk strings and arrays.

pub mod parser;
pub mod resp;
pub mod serializer;

pub use parser::{parse_resp_frame, RespParser};
pub use resp::{Bytes, RespFrame};
pub use serializer::{serialize_resp_frame, serialize_to_vec};
