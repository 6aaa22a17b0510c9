//! Concrete [`Driver`](crate::traits::Driver) implementations.

mod redis_driver;
pub use redis_driver::RedisDriver;
