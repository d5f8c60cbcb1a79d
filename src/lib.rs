pub mod bridge;
pub mod channel;
pub mod config;
pub mod error;
pub mod event_log;
pub mod invocation;
pub mod protocol;
pub mod repl;
pub mod skill_docs;
pub mod stub_worker;
pub mod supervisor;
