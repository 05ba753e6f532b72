pub mod network {
    pub const SSH_DEFAULT_PORT: u16 = 22;
    pub const TIMEOUT_SSH_CONNECT_MS: u64 = 15_000;
    pub const TIMEOUT_SSH_COMMAND_MS: u64 = 60_000;
    pub const TIMEOUT_SSH_PROBE_MS: u64 = 5_000;
    pub const TIMEOUT_REACHABILITY_MS: u64 = 10_000;
    pub const BANNER_WAIT_MS: u64 = 500;
    pub const IDLE_THRESHOLD_MS: u64 = 1_000;
    pub const POLL_INTERVAL_MS: u64 = 100;
    pub const KEEPALIVE_INTERVAL_SECS: u32 = 30;
}

pub mod retry {
    pub const MAX_RETRIES: u32 = 3;
    pub const RETRY_DELAY_MS: u64 = 2_000;
    pub const MAX_DELAY_MS: u64 = 60_000;
    pub const SLEEP_SLICE_MS: u64 = 50;
}

pub mod limits {
    pub const MAX_PORT: u16 = 65_535;
    pub const MIN_PORT: u16 = 1;
    pub const MAX_CAPTURE_BYTES: usize = 4 * 1024 * 1024;
    pub const READ_CHUNK_BYTES: usize = 4096;
    pub const LOG_PREVIEW_BYTES: usize = 200;
    pub const MAX_BATCH_HOSTS: usize = 64;
}

pub mod markers {
    pub const PROBE_COMMAND: &str = "echo 'connection_test'";
    pub const PROBE_MARKER: &str = "connection_test";
    pub const TIMEOUT_MARKER: &str = "[output truncated: command timed out]";
    pub const SENTINEL_PREFIX: &str = "__SSHPOOL_END_";
    pub const MINIMAL_TERM: &str = "dumb";
    pub const FULL_TERM: &str = "xterm";
    pub const JSON_FORMAT_FLAG: &str = "--format '{{json .}}'";
    pub const SUDO_PREFIX: &str = "sudo ";
}
