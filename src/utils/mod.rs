pub mod text;
pub mod tool_errors;
pub mod user_paths;
