//! Connectivity harness: runs the selected checks against one host and
//! prints a pass/fail line per step.

use crate::docker::features::shell_quote;
use crate::docker::ops::docker_reachability;
use crate::docker::probes::is_docker_running;
use crate::docker::{
    api_features, suggest_permission_fix, BuildRequest, DockerOps, SearchQuery,
};
use crate::errors::{CommandFailure, ConnectError, RetryError};
use crate::output::extract_json_from_output;
use crate::services::logger::{LogLevel, Logger};
use crate::ssh::runner::build_command;
use crate::ssh::{
    AttemptContext, CommandInvocation, CommandResult, ConnectionDescriptor, Connector, Credential,
    HostStatus, RemoteShell, RetryPolicy, RetryWrapper, SessionPool, SshConnector,
};
use clap::Parser;
use serde_json::Value;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const COMMAND_TIMEOUT_SECS: u64 = 30;
const RETRY_COUNT: u32 = 2;
const RETRY_DELAY_SECS: u64 = 2;
const BUILD_TIMEOUT_SECS: u64 = 120;
const BUILD_DIR: &str = "/tmp/sshpool_build";
const BUILD_TAG: &str = "api149test:latest";
const DOCKERFILE_LINES: [&str; 3] = [
    "FROM alpine:latest",
    "RUN echo hello > /hello.txt",
    "CMD [\"cat\", \"/hello.txt\"]",
];

/// Docker connectivity checks over pooled SSH sessions
#[derive(Parser, Debug, Clone)]
#[command(name = "sshpool")]
#[command(about = "Test Docker connectivity over SSH")]
#[command(version)]
pub struct CliArgs {
    /// SSH hostname
    #[arg(long)]
    pub hostname: String,
    /// SSH port
    #[arg(long, default_value_t = 22)]
    pub port: u16,
    /// SSH username
    #[arg(long)]
    pub username: String,
    /// SSH password
    #[arg(long)]
    pub password: Option<String>,
    /// SSH private key file
    #[arg(long)]
    pub key_file: Option<PathBuf>,
    /// Passphrase for an encrypted private key
    #[arg(long)]
    pub key_passphrase: Option<String>,
    /// Use sudo for Docker commands
    #[arg(long)]
    pub sudo: bool,
    /// Run all checks
    #[arg(long)]
    pub all: bool,
    /// Check basic connectivity
    #[arg(long)]
    pub connection: bool,
    /// Check session pooling
    #[arg(long)]
    pub pool: bool,
    /// Check Docker commands
    #[arg(long)]
    pub commands: bool,
    /// Check Docker health
    #[arg(long)]
    pub health: bool,
    /// Check error handling
    #[arg(long)]
    pub errors: bool,
    /// Check BuildKit build progress
    #[arg(long)]
    pub buildkit: bool,
    /// Check registry search
    #[arg(long)]
    pub search: bool,
    /// Check platform-aware image listing
    #[arg(long)]
    pub multiplatform: bool,
    /// Check image build info
    #[arg(long)]
    pub buildinfo: bool,
    /// Check Docker socket permissions
    #[arg(long)]
    pub permissions: bool,
    /// Verbose logging
    #[arg(long)]
    pub debug: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    Connection,
    Pool,
    Commands,
    Health,
    Errors,
    BuildKit,
    Search,
    MultiPlatform,
    BuildInfo,
    Permissions,
}

impl Check {
    const CORE: [Check; 5] = [
        Check::Connection,
        Check::Pool,
        Check::Commands,
        Check::Health,
        Check::Errors,
    ];

    const ALL: [Check; 10] = [
        Check::Connection,
        Check::Pool,
        Check::Commands,
        Check::Health,
        Check::Errors,
        Check::BuildKit,
        Check::Search,
        Check::MultiPlatform,
        Check::BuildInfo,
        Check::Permissions,
    ];

    fn title(self) -> &'static str {
        match self {
            Check::Connection => "Testing Basic Connectivity",
            Check::Pool => "Testing Connection Pooling",
            Check::Commands => "Testing Docker Commands",
            Check::Health => "Testing Server Health Check",
            Check::Errors => "Testing Error Handling",
            Check::BuildKit => "Testing BuildKit Build Progress",
            Check::Search => "Testing Registry Search",
            Check::MultiPlatform => "Testing Multi-Platform Image Listing",
            Check::BuildInfo => "Testing Image Build Info",
            Check::Permissions => "Testing Docker Permissions",
        }
    }
}

impl CliArgs {
    /// Checks to run, in order. No selection flag means the core
    /// connectivity checks; `--all` adds the API 1.49 and permission checks.
    pub fn selected(&self) -> Vec<Check> {
        let flags = [
            (Check::Connection, self.connection),
            (Check::Pool, self.pool),
            (Check::Commands, self.commands),
            (Check::Health, self.health),
            (Check::Errors, self.errors),
            (Check::BuildKit, self.buildkit),
            (Check::Search, self.search),
            (Check::MultiPlatform, self.multiplatform),
            (Check::BuildInfo, self.buildinfo),
            (Check::Permissions, self.permissions),
        ];
        if self.all {
            return Check::ALL.to_vec();
        }
        if !flags.iter().any(|(_, on)| *on) {
            return Check::CORE.to_vec();
        }
        flags
            .into_iter()
            .filter_map(|(check, on)| on.then_some(check))
            .collect()
    }

    /// Key file wins over password when both are given.
    pub fn descriptor(&self) -> Result<ConnectionDescriptor, ConnectError> {
        let credential = match (self.key_file.as_ref(), self.password.as_ref()) {
            (Some(path), _) => Credential::KeyFile(path.clone()),
            (None, Some(password)) => Credential::Password(password.clone()),
            (None, None) => {
                return Err(ConnectError::InvalidDescriptor(
                    "either --password or --key-file is required".to_string(),
                ))
            }
        };
        let mut descriptor =
            ConnectionDescriptor::new(self.hostname.clone(), self.username.clone(), credential)
                .with_port(self.port);
        descriptor.key_passphrase = self.key_passphrase.clone();
        descriptor.connect_timeout = Duration::from_secs(CONNECT_TIMEOUT_SECS);
        descriptor.command_timeout = Duration::from_secs(COMMAND_TIMEOUT_SECS);
        descriptor.retry_count = RETRY_COUNT;
        descriptor.retry_delay = Duration::from_secs(RETRY_DELAY_SECS);
        Ok(descriptor)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub passed: u32,
    pub failed: u32,
}

impl Summary {
    pub fn exit_code(&self) -> i32 {
        if self.failed == 0 {
            0
        } else {
            1
        }
    }

    fn record(&mut self, ok: bool) {
        if ok {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
    }
}

pub fn run(args: CliArgs) -> i32 {
    let mut logger = Logger::new("sshpool");
    if args.debug {
        logger.set_level(LogLevel::Debug);
    }
    let connector: Arc<dyn Connector> = Arc::new(SshConnector::new(logger.clone()));
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match run_with(&args, connector, logger.clone(), &mut out) {
        Ok(summary) => summary.exit_code(),
        Err(err) => {
            logger.error("Harness aborted", Some(&serde_json::json!({ "error": err.to_string() })));
            1
        }
    }
}

/// Runs the selected checks through `connector` and writes the report to `out`.
pub fn run_with(
    args: &CliArgs,
    connector: Arc<dyn Connector>,
    logger: Logger,
    out: &mut dyn Write,
) -> io::Result<Summary> {
    let mut summary = Summary::default();
    let descriptor = match args.descriptor() {
        Ok(descriptor) => descriptor,
        Err(err) => {
            writeln!(out, "✗ {}", err)?;
            summary.failed += 1;
            return Ok(summary);
        }
    };
    let harness = Harness::new(descriptor, connector, logger, args.sudo);

    for check in args.selected() {
        writeln!(out, "\n=== {} ===", check.title())?;
        let ok = match check {
            Check::Connection => harness.connection(out)?,
            Check::Pool => harness.pool(out)?,
            Check::Commands => harness.commands(out)?,
            Check::Health => harness.health(out)?,
            Check::Errors => harness.errors(out)?,
            Check::BuildKit => harness.buildkit(out)?,
            Check::Search => harness.search(out)?,
            Check::MultiPlatform => harness.multiplatform(out)?,
            Check::BuildInfo => harness.buildinfo(out)?,
            Check::Permissions => harness.permissions(out)?,
        };
        summary.record(ok);
        if check == Check::Connection && !ok {
            writeln!(out, "Connection failed, skipping remaining checks")?;
            break;
        }
    }

    writeln!(out, "\n=== Test Summary ===")?;
    writeln!(out, "Tests passed: {}", summary.passed)?;
    writeln!(out, "Tests failed: {}", summary.failed)?;
    harness.pool.close_all();
    Ok(summary)
}

fn mark(ok: bool) -> &'static str {
    if ok {
        "✓"
    } else {
        "✗"
    }
}

fn non_empty_rows(text: &str) -> usize {
    text.lines().filter(|line| !line.trim().is_empty()).count()
}

struct Harness {
    descriptor: ConnectionDescriptor,
    connector: Arc<dyn Connector>,
    pool: Arc<SessionPool>,
    retry: RetryWrapper,
    docker: DockerOps,
    policy: RetryPolicy,
    use_sudo: bool,
    cancel: CancellationToken,
}

impl Harness {
    fn new(
        descriptor: ConnectionDescriptor,
        connector: Arc<dyn Connector>,
        logger: Logger,
        use_sudo: bool,
    ) -> Self {
        let pool = Arc::new(SessionPool::new(connector.clone(), logger.clone()));
        let retry = RetryWrapper::new(pool.clone(), logger.clone())
            .with_reachability_check(docker_reachability(use_sudo));
        let policy = RetryPolicy::from_descriptor(&descriptor);
        Self {
            descriptor,
            connector,
            pool,
            retry,
            docker: DockerOps::new(logger),
            policy,
            use_sudo,
            cancel: CancellationToken::new(),
        }
    }

    fn retried<T, F>(&self, op: F) -> Result<T, RetryError>
    where
        F: FnMut(&mut dyn RemoteShell, &AttemptContext<'_>) -> Result<T, CommandFailure>,
    {
        self.retry.run(&self.descriptor, &self.policy, &self.cancel, op)
    }

    fn docker_command(&self, command: &str, format_json: bool) -> Result<CommandResult, RetryError> {
        let mut invocation = CommandInvocation::new(command).sudo(self.use_sudo);
        if format_json {
            invocation = invocation.json();
        }
        self.retried(|shell, ctx| {
            self.docker
                .runner()
                .run(shell, &invocation, ctx.cancel)
                .into_result()
        })
    }

    /// Direct session outside the pool: echo, client version, daemon state.
    fn connection(&self, out: &mut dyn Write) -> io::Result<bool> {
        writeln!(out, "Testing direct SSH connection...")?;
        let mut shell = match self.connector.connect(&self.descriptor) {
            Ok(shell) => shell,
            Err(err) => {
                writeln!(out, "✗ Direct SSH connection failed: {}", err)?;
                return Ok(false);
            }
        };
        writeln!(out, "✓ Direct SSH connection successful")?;
        let timeout = Some(self.descriptor.command_timeout);

        let echo = shell.execute("echo 'test successful'", timeout, &self.cancel);
        let echoed = echo.text.contains("test successful");
        writeln!(out, "{} Basic command execution", mark(echoed))?;
        if !echoed {
            writeln!(out, "Output: {}", echo.text)?;
        }

        writeln!(out, "Testing Docker access...")?;
        let version = shell.execute("docker --version", timeout, &self.cancel);
        writeln!(out, "Docker version: {}", version.text.trim())?;

        let ps = shell.execute(
            &build_command("docker ps", false, self.use_sudo),
            timeout,
            &self.cancel,
        );
        let running = is_docker_running(&ps.text);
        if running {
            writeln!(out, "✓ Docker is running")?;
        } else {
            writeln!(out, "✗ Docker is not running or not accessible")?;
        }
        shell.disconnect();
        Ok(echoed)
    }

    /// Same key reuses the cached handle; `force_new` replaces it.
    fn pool(&self, out: &mut dyn Write) -> io::Result<bool> {
        writeln!(out, "Creating first connection...")?;
        let first = match self.pool.get_or_create(&self.descriptor, false) {
            Ok(handle) => handle,
            Err(err) => {
                writeln!(out, "✗ Failed to create first connection: {}", err)?;
                return Ok(false);
            }
        };
        writeln!(out, "✓ First connection created")?;

        writeln!(out, "Creating second connection (should reuse existing)...")?;
        let reused = match self.pool.get_or_create(&self.descriptor, false) {
            Ok(second) => Arc::ptr_eq(&first, &second),
            Err(err) => {
                writeln!(out, "✗ Second connection failed: {}", err)?;
                false
            }
        };
        if reused {
            writeln!(out, "✓ Connection pooling works - reused existing connection")?;
        } else {
            writeln!(out, "✗ Connection pooling failed - created new connection")?;
        }

        writeln!(out, "Creating forced new connection...")?;
        let replaced = match self.pool.get_or_create(&self.descriptor, true) {
            Ok(third) => !Arc::ptr_eq(&first, &third),
            Err(err) => {
                writeln!(out, "✗ Forced connection failed: {}", err)?;
                false
            }
        };
        if replaced {
            writeln!(out, "✓ Forced new connection created")?;
        } else {
            writeln!(out, "✗ Failed to create new connection when forced")?;
        }
        Ok(reused && replaced)
    }

    fn commands(&self, out: &mut dyn Write) -> io::Result<bool> {
        let mut ok = true;

        writeln!(out, "Testing Docker info...")?;
        match self.retried(|shell, ctx| self.docker.info(shell, self.use_sudo, ctx.cancel)) {
            Ok(info) => {
                writeln!(out, "✓ Docker info retrieved successfully")?;
                for field in ["ServerVersion", "Server Version", "Containers", "Images"] {
                    if let Some(value) = info.get(field) {
                        writeln!(out, "  {}: {}", field, display_value(value))?;
                    }
                }
            }
            Err(err) => {
                ok = false;
                writeln!(out, "✗ Failed to retrieve Docker info: {}", err)?;
            }
        }

        writeln!(out, "Testing Docker version...")?;
        match self.retried(|shell, ctx| self.docker.version(shell, self.use_sudo, ctx.cancel)) {
            Ok(version) => {
                writeln!(out, "✓ Docker version retrieved successfully")?;
                if let Some(server) = version.get("Server") {
                    if let Some(api) = server.get("ApiVersion") {
                        writeln!(out, "  API Version: {}", display_value(api))?;
                    }
                    if let Some(engine) = server.get("Version") {
                        writeln!(out, "  Engine Version: {}", display_value(engine))?;
                    }
                }
            }
            Err(err) => {
                ok = false;
                writeln!(out, "✗ Failed to retrieve Docker version: {}", err)?;
            }
        }

        for (label, command) in [
            ("Container", "docker container ls --all"),
            ("Image", "docker image ls"),
        ] {
            writeln!(out, "Testing {} list...", label.to_lowercase())?;
            match self.docker_command(command, false) {
                Ok(result) => {
                    writeln!(out, "✓ {} list retrieved successfully", label)?;
                    let rows = non_empty_rows(&result.raw_text).saturating_sub(1);
                    writeln!(out, "  {} count: {}", label, rows)?;
                }
                Err(err) => {
                    ok = false;
                    writeln!(out, "✗ Failed to retrieve {} list: {}", label.to_lowercase(), err)?;
                }
            }
        }
        Ok(ok)
    }

    fn health(&self, out: &mut dyn Write) -> io::Result<bool> {
        writeln!(out, "Running comprehensive health check...")?;
        let report = match self.retried(|shell, ctx| {
            Ok(self.docker.health(shell, self.use_sudo, ctx.cancel))
        }) {
            Ok(report) => report,
            Err(err) => {
                writeln!(out, "✗ Health check failed: {}", err)?;
                return Ok(false);
            }
        };
        writeln!(out, "Health status: {}", report.status.as_str())?;
        writeln!(out, "Message: {}", report.message)?;
        writeln!(
            out,
            "API Version: {}",
            report.api_version.as_deref().unwrap_or("unknown")
        )?;
        writeln!(
            out,
            "Engine Version: {}",
            report.engine_version.as_deref().unwrap_or("unknown")
        )?;
        if let Some(api) = report.api_version.as_deref() {
            let features = api_features(api);
            writeln!(
                out,
                "API 1.49 features: {}/{}",
                features.supported_features, features.total_features
            )?;
        }
        let has_details = report
            .details
            .as_object()
            .is_some_and(|details| !details.is_empty());
        if has_details {
            writeln!(out, "Health details available")?;
            for field in ["Containers", "Images"] {
                if let Some(value) = report.details.get(field) {
                    writeln!(out, "{}: {}", field, display_value(value))?;
                }
            }
            if report.details.get("DriverStatus").is_some() {
                writeln!(out, "Storage driver details available")?;
            }
        } else {
            writeln!(out, "No detailed health information available")?;
        }
        Ok(report.status == HostStatus::Online)
    }

    /// Remote failures must come back as errors; extraction must reject
    /// prose and dig JSON out of mixed text.
    fn errors(&self, out: &mut dyn Write) -> io::Result<bool> {
        let mut ok = true;

        writeln!(out, "Testing invalid Docker command...")?;
        let detected = self.expect_failure(out, "docker invalid-command", false)?;
        writeln!(out, "{} Invalid command detected as error", mark(detected))?;
        ok &= detected;

        writeln!(out, "Testing non-existent container...")?;
        let detected =
            self.expect_failure(out, "docker container inspect nonexistentcontainer12345", true)?;
        writeln!(out, "{} Non-existent container detected as error", mark(detected))?;
        ok &= detected;

        writeln!(out, "Testing invalid JSON handling...")?;
        match extract_json_from_output("This is not valid JSON data at all", None) {
            Err(err) => {
                writeln!(out, "✓ Invalid JSON properly detected")?;
                writeln!(out, "  Error message: {}", err)?;
            }
            Ok(_) => {
                ok = false;
                writeln!(out, "✗ Invalid JSON not detected properly")?;
            }
        }

        writeln!(out, "Testing partial valid JSON extraction...")?;
        let mixed = "Some garbage text here { \"key\": \"value\" } and more garbage here";
        let extracted = extract_json_from_output(mixed, None)
            .map(|value| value.get("key") == Some(&Value::from("value")))
            .unwrap_or(false);
        writeln!(out, "{} Valid JSON extracted from mixed content", mark(extracted))?;
        ok &= extracted;

        Ok(ok)
    }

    /// Writes a small Dockerfile and builds it with plain BuildKit progress.
    fn buildkit(&self, out: &mut dyn Write) -> io::Result<bool> {
        let quoted: Vec<String> = DOCKERFILE_LINES
            .iter()
            .map(|line| shell_quote(line))
            .collect();
        let prepare = CommandInvocation::new(format!(
            "mkdir -p {dir} && printf '%s\\n' {lines} > {dir}/Dockerfile",
            dir = BUILD_DIR,
            lines = quoted.join(" ")
        ))
        .allow_error_lines();
        let request = BuildRequest::new(BUILD_TAG, BUILD_DIR).build_arg("VERSION", "latest");
        let timeout = Some(Duration::from_secs(BUILD_TIMEOUT_SECS));

        writeln!(out, "Running build with progress tracking...")?;
        let progress = match self.retried(|shell, ctx| {
            self.docker
                .runner()
                .run(shell, &prepare, ctx.cancel)
                .into_result()?;
            self.docker
                .build_with_progress(shell, &request, self.use_sudo, timeout, ctx.cancel)
        }) {
            Ok(progress) => progress,
            Err(err) => {
                writeln!(out, "✗ Build failed: {}", err)?;
                return Ok(false);
            }
        };
        if progress.stages.is_empty() {
            writeln!(out, "✗ Could not parse BuildKit progress data")?;
            return Ok(false);
        }
        writeln!(out, "{} Captured BuildKit progress events", mark(!progress.failed))?;
        writeln!(out, "  Stages: {}", progress.stages.len())?;
        for stage in &progress.stages {
            writeln!(
                out,
                "  - {}: {:?} ({} steps)",
                stage.name,
                stage.status,
                stage.steps.len()
            )?;
            if let Some(error) = stage.error.as_deref() {
                writeln!(out, "    {}", error)?;
            }
        }
        Ok(!progress.failed)
    }

    fn search(&self, out: &mut dyn Write) -> io::Result<bool> {
        let query = SearchQuery::new("ubuntu").filter("is-official", "true").limit(5);
        match self.retried(|shell, ctx| {
            self.docker
                .search_registry(shell, &query, self.use_sudo, ctx.cancel)
        }) {
            Ok(rows) if !rows.is_empty() => {
                writeln!(out, "✓ Registry search returned {} results", rows.len())?;
                for (rank, row) in rows.iter().take(3).enumerate() {
                    writeln!(
                        out,
                        "  {}. {} - Stars: {}",
                        rank + 1,
                        row.get("Name").map(display_value).unwrap_or_default(),
                        row.get("StarCount").map(display_value).unwrap_or_default()
                    )?;
                }
                Ok(true)
            }
            Ok(_) => {
                writeln!(out, "✗ Registry search returned no results")?;
                Ok(false)
            }
            Err(err) => {
                writeln!(out, "✗ Registry search failed: {}", err)?;
                Ok(false)
            }
        }
    }

    /// An empty listing passes; not every daemon holds platform images.
    fn multiplatform(&self, out: &mut dyn Write) -> io::Result<bool> {
        let images = match self.retried(|shell, ctx| {
            self.docker
                .multiplatform_images(shell, self.use_sudo, ctx.cancel)
        }) {
            Ok(images) => images,
            Err(err) => {
                writeln!(out, "✗ Image listing failed: {}", err)?;
                return Ok(false);
            }
        };
        if images.is_empty() {
            writeln!(out, "No multi-platform images found")?;
            return Ok(true);
        }
        writeln!(out, "✓ Found {} multi-platform images", images.len())?;
        for image in images.iter().take(3) {
            writeln!(
                out,
                "  {}:{}",
                image.get("Repository").map(display_value).unwrap_or_default(),
                image.get("Tag").map(display_value).unwrap_or_default()
            )?;
            writeln!(
                out,
                "     Platform: {}",
                image.get("Platform").map(display_value).unwrap_or_default()
            )?;
        }
        Ok(true)
    }

    /// Build info for the first local image.
    fn buildinfo(&self, out: &mut dyn Write) -> io::Result<bool> {
        let image_id = match self.docker_command("docker images", true) {
            Ok(result) => first_image_id(result.json.as_ref()),
            Err(err) => {
                writeln!(out, "✗ Image listing failed: {}", err)?;
                return Ok(false);
            }
        };
        let Some(image_id) = image_id else {
            writeln!(out, "✗ No images available to read build info from")?;
            return Ok(false);
        };
        let info = match self.retried(|shell, ctx| {
            self.docker
                .build_info(shell, &image_id, self.use_sudo, ctx.cancel)
        }) {
            Ok(info) => info,
            Err(err) => {
                writeln!(out, "✗ Could not get build info: {}", err)?;
                return Ok(false);
            }
        };
        writeln!(out, "✓ Retrieved build info for image {}", image_id)?;
        for field in ["Architecture", "Os", "Size"] {
            if let Some(value) = info.get(field) {
                writeln!(out, "  {}: {}", field, display_value(value))?;
            }
        }
        match info.get("BuildInfo").and_then(Value::as_object) {
            Some(details) if !details.is_empty() => {
                writeln!(out, "  Build info details available")?;
                for key in details.keys() {
                    writeln!(out, "    - {}", key)?;
                }
            }
            _ => writeln!(out, "  No detailed build info available")?,
        }
        Ok(true)
    }

    /// Per-command access, socket ownership and group membership.
    fn permissions(&self, out: &mut dyn Write) -> io::Result<bool> {
        let (access, socket) = match self.retried(|shell, ctx| {
            let access = self.docker.check_permissions(shell, self.use_sudo, ctx.cancel);
            let socket = self.docker.socket_permissions(shell, ctx.cancel);
            Ok((access, socket))
        }) {
            Ok(reports) => reports,
            Err(err) => {
                writeln!(out, "✗ Permission check failed: {}", err)?;
                return Ok(false);
            }
        };
        for check in &access.commands {
            writeln!(out, "  {}: {}", check.name, mark(check.direct_access))?;
        }
        writeln!(out, "Socket: {}", socket.socket_details)?;
        writeln!(out, "Docker group: {}", socket.docker_group)?;
        writeln!(out, "User: {}", socket.user_info)?;
        if access.direct_access_allowed {
            writeln!(out, "✓ Direct Docker access allowed")?;
            return Ok(true);
        }
        if access.requires_sudo {
            writeln!(out, "✓ Docker access requires sudo")?;
        } else {
            writeln!(out, "✗ No Docker access")?;
        }
        if !socket.in_docker_group {
            writeln!(out, "{}", suggest_permission_fix(&self.descriptor.username))?;
        }
        Ok(access.requires_sudo)
    }

    fn expect_failure(
        &self,
        out: &mut dyn Write,
        command: &str,
        format_json: bool,
    ) -> io::Result<bool> {
        match self.docker_command(command, format_json) {
            Ok(_) => Ok(false),
            Err(RetryError::Failed { failure, .. }) => {
                writeln!(out, "  Error message: {}", failure.message())?;
                Ok(true)
            }
            Err(err) => {
                writeln!(out, "  Error message: {}", err)?;
                Ok(true)
            }
        }
    }
}

fn first_image_id(listing: Option<&Value>) -> Option<String> {
    let first = match listing? {
        Value::Array(rows) => rows.first()?,
        row => row,
    };
    first.get("ID").and_then(Value::as_str).map(str::to_string)
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
