pub mod queue;

pub use queue::{Chain, Command, CommandsQueue, Environment, ThreadHook};
