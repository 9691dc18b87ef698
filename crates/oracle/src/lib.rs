//! Commands, result messages and the backends that execute them.

pub mod command;
pub mod cooperative;
pub mod messages;
pub mod oracle;
pub mod runner;
pub mod threaded;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use command::{Command, CommandBody, CommandKind, Payload};
pub use cooperative::CooperativeOracle;
pub use messages::*;
pub use oracle::Oracle;
pub use runner::{DicomParser, GenericOracleRunner, RunnerSettings};
pub use threaded::{OracleState, ThreadedOracle};
