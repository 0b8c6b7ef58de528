pub mod context;
pub mod lifecycle;
pub mod publish;
pub mod recovery;
pub mod waiter;
