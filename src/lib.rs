pub mod models;
pub mod output;
pub mod probe;
pub mod queue;
pub mod scanner;
