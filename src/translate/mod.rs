//! API translation between the OpenAI client format and the Dedalus upstream format.
//!
//! Converts requests, responses, and streaming chunks between the two shapes.
//! All translation functions are pure (no I/O).

pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;
pub mod upstream_types;
