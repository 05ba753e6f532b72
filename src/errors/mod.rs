mod remote_error;
mod tool_error;

pub use remote_error::{CommandFailure, ConnectError, OutputError, RetryError};
pub use tool_error::{ToolError, ToolErrorKind};
