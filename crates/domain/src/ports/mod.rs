use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub mod events;
pub mod idempotency;
pub mod impact;
pub mod issues;
pub mod jobs;
pub mod reputation;
