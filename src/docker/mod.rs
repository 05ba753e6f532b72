//! Docker-specific helpers layered over the remote command runner.

pub mod features;
pub mod ops;
pub mod probes;

pub use features::{
    api_features, parse_buildkit_progress, ApiFeatures, BuildProgress, BuildRequest, SearchQuery,
    StageStatus,
};
pub use ops::{DockerOps, HealthReport, LogOptions, PermissionReport, SocketReport};
pub use probes::{
    api_version_at_least, detect_permission_error, extract_api_version, in_docker_group,
    is_docker_running, suggest_permission_fix, validate_docker_info,
};
