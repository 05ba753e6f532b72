//! Pooled interactive SSH shells with retry and command interpretation.

pub mod descriptor;
pub mod keys;
pub mod pool;
pub mod retry;
pub mod runner;
pub mod session;

pub use descriptor::{CompletionMode, ConnectionDescriptor, Credential};
pub use pool::{SessionHandle, SessionPool};
pub use retry::{
    echo_reachability, AttemptContext, HostStatus, ReachabilityCheck, RetryPolicy, RetryWrapper,
    StatusHook,
};
pub use runner::{CommandInvocation, CommandResult, CommandRunner};
pub use session::{Connector, ReadStatus, RemoteSession, RemoteShell, ShellOutput, SshConnector};
