pub mod args;
pub mod capture;
pub mod config;
pub mod error;
pub mod header;
pub mod layout;
pub mod monitoring;
pub mod packet;
pub mod recovery;
pub mod ringbuffer;
pub mod router;
pub mod run;
pub mod scheduler;

pub use error::Error;
pub use run::RunContext;
