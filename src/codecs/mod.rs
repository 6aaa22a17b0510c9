//! Built-in implementations of [`Serializer`](crate::traits::Serializer).

mod json;
pub use json::JsonCodec;
