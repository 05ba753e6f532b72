use crate::constants::limits::MAX_BATCH_HOSTS;
use crate::docker::features::{api_features, SearchQuery};
use crate::docker::ops::{docker_reachability, DockerOps, HealthReport, LogOptions};
use crate::docker::probes::suggest_permission_fix;
use crate::errors::{CommandFailure, ToolError};
use crate::services::logger::Logger;
use crate::services::validation::Validation;
use crate::ssh::descriptor::ConnectionDescriptor;
use crate::ssh::pool::SessionPool;
use crate::ssh::retry::{
    echo_reachability, AttemptContext, HostStatus, ReachabilityCheck, RetryPolicy, RetryWrapper,
};
use crate::ssh::runner::{CommandInvocation, CommandResult};
use crate::ssh::session::{Connector, RemoteShell, SshConnector};
use crate::utils::tool_errors::unknown_action_error;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const HOST_ACTIONS: &[&str] = &[
    "exec",
    "docker",
    "check_host",
    "batch_check",
    "containers",
    "logs",
    "permissions",
    "search",
    "build_info",
    "pool_status",
    "disconnect",
];

type StatusBoard = Arc<Mutex<HashMap<String, HostStatus>>>;

/// JSON facade over the pool, retry wrapper and Docker operations.
///
/// Blocking SSH work runs on `spawn_blocking`; dropping a pending call
/// cancels its read loop and backoff sleeps.
#[derive(Clone)]
pub struct HostManager {
    logger: Logger,
    validation: Validation,
    pool: Arc<SessionPool>,
    docker: DockerOps,
    statuses: StatusBoard,
}

impl HostManager {
    pub fn new(logger: Logger, connector: Arc<dyn Connector>) -> Self {
        let logger = logger.child("host");
        Self {
            pool: Arc::new(SessionPool::new(connector, logger.clone())),
            docker: DockerOps::new(logger.clone()),
            validation: Validation::new(),
            statuses: Arc::new(Mutex::new(HashMap::new())),
            logger,
        }
    }

    /// Manager backed by real SSH connections.
    pub fn with_ssh(logger: Logger) -> Self {
        let connector = Arc::new(SshConnector::new(logger.clone()));
        Self::new(logger, connector)
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    pub fn host_status(&self, key: &str) -> Option<HostStatus> {
        self.statuses
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .get(key)
            .copied()
    }

    pub async fn handle_action(&self, args: Value) -> Result<Value, ToolError> {
        let action = args.get("action").and_then(|v| v.as_str()).unwrap_or("");
        match action {
            "exec" => self.exec(&args).await,
            "docker" => self.docker_command(&args).await,
            "check_host" => self.check_host(&args).await,
            "batch_check" => self.batch_check(&args).await,
            "containers" => self.containers(&args).await,
            "logs" => self.logs(&args).await,
            "permissions" => self.permissions(&args).await,
            "search" => self.search(&args).await,
            "build_info" => self.build_info(&args).await,
            "pool_status" => self.pool_status(),
            "disconnect" => self.disconnect(&args),
            _ => Err(unknown_action_error("host", args.get("action"), HOST_ACTIONS)),
        }
    }

    pub async fn cleanup(&self) -> Result<Value, ToolError> {
        let pool = self.pool.clone();
        let closed = tokio::task::spawn_blocking(move || pool.close_all())
            .await
            .map_err(|err| ToolError::internal(format!("cleanup task failed: {}", err)))?;
        Ok(serde_json::json!({ "success": true, "closed_sessions": closed }))
    }

    fn descriptor(&self, args: &Value) -> Result<ConnectionDescriptor, ToolError> {
        ConnectionDescriptor::from_value(args.get("connection").unwrap_or(&Value::Null))
    }

    fn retry_wrapper(&self, reachability: ReachabilityCheck) -> RetryWrapper {
        let statuses = self.statuses.clone();
        RetryWrapper::new(self.pool.clone(), self.logger.clone())
            .with_reachability_check(reachability)
            .with_status_hook(Arc::new(move |status: HostStatus, key: &str| {
                statuses
                    .lock()
                    .unwrap_or_else(|err| err.into_inner())
                    .insert(key.to_string(), status);
            }))
    }

    /// Runs `op` under the retry wrapper on a blocking worker.
    async fn with_retry<T, F>(
        &self,
        descriptor: ConnectionDescriptor,
        policy: RetryPolicy,
        reachability: ReachabilityCheck,
        op: F,
    ) -> Result<T, ToolError>
    where
        T: Send + 'static,
        F: FnMut(&mut dyn RemoteShell, &AttemptContext<'_>) -> Result<T, CommandFailure>
            + Send
            + 'static,
    {
        let wrapper = self.retry_wrapper(reachability);
        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();
        let joined =
            tokio::task::spawn_blocking(move || wrapper.run(&descriptor, &policy, &cancel, op))
                .await;
        let _ = guard.disarm();
        let outcome =
            joined.map_err(|err| ToolError::internal(format!("worker task failed: {}", err)))?;
        outcome.map_err(ToolError::from)
    }

    fn invocation(
        &self,
        args: &Value,
        command: String,
        json_default: bool,
    ) -> Result<CommandInvocation, ToolError> {
        let format_json = self
            .validation
            .ensure_optional_bool(args.get("json"), "json")?
            .unwrap_or(json_default);
        let use_sudo = self
            .validation
            .ensure_optional_bool(args.get("sudo"), "sudo")?
            .unwrap_or(false);
        let auto_sudo = self
            .validation
            .ensure_optional_bool(args.get("auto_sudo"), "auto_sudo")?
            .unwrap_or(false);
        let timeout = self
            .validation
            .ensure_optional_millis(args.get("timeout_ms"), "timeout_ms")?;
        let mut invocation = CommandInvocation::new(command)
            .sudo(use_sudo)
            .auto_sudo(auto_sudo)
            .with_timeout(timeout);
        invocation.format_json = format_json;
        Ok(invocation)
    }

    /// Retry policy from the descriptor plus the call's `timeout_ms` and
    /// overall `deadline_ms` budget.
    fn policy(
        &self,
        args: &Value,
        descriptor: &ConnectionDescriptor,
        timeout: Option<Duration>,
    ) -> Result<RetryPolicy, ToolError> {
        let mut policy = RetryPolicy::from_descriptor(descriptor);
        if let Some(timeout) = timeout {
            policy = policy.with_timeout(timeout);
        }
        if let Some(budget) = self
            .validation
            .ensure_optional_millis(args.get("deadline_ms"), "deadline_ms")?
        {
            policy = policy.with_deadline_in(budget);
        }
        Ok(policy)
    }

    async fn run_command(
        &self,
        descriptor: ConnectionDescriptor,
        policy: RetryPolicy,
        invocation: CommandInvocation,
        reachability: ReachabilityCheck,
    ) -> Result<Value, ToolError> {
        let key = descriptor.key();
        let runner = self.docker.runner().clone();
        let (attempt, result) = self
            .with_retry(descriptor, policy, reachability, move |shell, ctx| {
                let mut invocation = invocation.clone();
                invocation.timeout = invocation.timeout.or(ctx.timeout);
                let result: CommandResult = runner.run(shell, &invocation, ctx.cancel);
                result.into_result().map(|result| (ctx.attempt, result))
            })
            .await?;
        Ok(serde_json::json!({
            "success": true,
            "target": key,
            "attempts": attempt,
            "output": result.raw_text,
            "json": result.json,
            "used_sudo": result.used_sudo,
        }))
    }

    async fn exec(&self, args: &Value) -> Result<Value, ToolError> {
        let descriptor = self.descriptor(args)?;
        let command = self.validation.ensure_string(
            args.get("command").unwrap_or(&Value::Null),
            "command",
            true,
        )?;
        let invocation = self.invocation(args, command, false)?;
        let policy = self.policy(args, &descriptor, invocation.timeout)?;
        self.run_command(descriptor, policy, invocation, echo_reachability())
            .await
    }

    async fn docker_command(&self, args: &Value) -> Result<Value, ToolError> {
        let descriptor = self.descriptor(args)?;
        let command = self.validation.ensure_string(
            args.get("command").unwrap_or(&Value::Null),
            "command",
            true,
        )?;
        let command = if command == "docker" || command.starts_with("docker ") {
            command
        } else {
            format!("docker {}", command)
        };
        let invocation = self.invocation(args, command, true)?;
        let policy = self.policy(args, &descriptor, invocation.timeout)?;
        let reachability = docker_reachability(invocation.use_sudo);
        self.run_command(descriptor, policy, invocation, reachability)
            .await
    }

    fn use_sudo(&self, args: &Value) -> Result<bool, ToolError> {
        Ok(self
            .validation
            .ensure_optional_bool(args.get("sudo"), "sudo")?
            .unwrap_or(false))
    }

    async fn health_for(
        &self,
        descriptor: ConnectionDescriptor,
        policy: RetryPolicy,
        use_sudo: bool,
    ) -> Value {
        let key = descriptor.key();
        let docker = self.docker.clone();
        let outcome = self
            .with_retry(descriptor, policy, echo_reachability(), move |shell, ctx| {
                Ok(docker.health(shell, use_sudo, ctx.cancel))
            })
            .await;
        let report = match outcome {
            Ok(report) => report,
            Err(err) => {
                let mut report = HealthReport::offline("Failed to establish SSH connection");
                report.details = serde_json::json!({ "error": err });
                report
            }
        };
        self.statuses
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .insert(key.clone(), report.status);
        let features = report.api_version.as_deref().map(api_features);
        serde_json::json!({
            "target": key,
            "success": report.status == HostStatus::Online,
            "health": report,
            "api_features": features,
        })
    }

    async fn check_host(&self, args: &Value) -> Result<Value, ToolError> {
        let descriptor = self.descriptor(args)?;
        let use_sudo = self.use_sudo(args)?;
        let policy = self.policy(args, &descriptor, None)?;
        Ok(self.health_for(descriptor, policy, use_sudo).await)
    }

    async fn batch_check(&self, args: &Value) -> Result<Value, ToolError> {
        let hosts = args
            .get("hosts")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        if hosts.is_empty() {
            return Err(ToolError::invalid_params("hosts must be a non-empty array")
                .with_hint("Example: { action: 'batch_check', hosts: [{ host, username, password }] }"));
        }
        if hosts.len() > MAX_BATCH_HOSTS {
            return Err(ToolError::invalid_params(format!(
                "hosts accepts at most {} entries",
                MAX_BATCH_HOSTS
            )));
        }
        let use_sudo = self.use_sudo(args)?;
        let targets = hosts
            .iter()
            .map(|host| {
                let descriptor = ConnectionDescriptor::from_value(host)?;
                let policy = self.policy(args, &descriptor, None)?;
                Ok((descriptor, policy))
            })
            .collect::<Result<Vec<_>, ToolError>>()?;

        let results = futures::future::join_all(
            targets
                .into_iter()
                .map(|(descriptor, policy)| self.health_for(descriptor, policy, use_sudo)),
        )
        .await;

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for result in &results {
            let status = result["health"]["status"].as_str().unwrap_or("offline");
            let status = match status {
                "online" => "online",
                "degraded" => "degraded",
                _ => "offline",
            };
            *counts.entry(status).or_default() += 1;
        }
        self.logger.info(
            "Batch check finished",
            Some(&serde_json::json!({ "hosts": results.len(), "counts": counts })),
        );
        Ok(serde_json::json!({
            "success": counts.get("online").copied().unwrap_or(0) == results.len(),
            "online": counts.get("online").copied().unwrap_or(0),
            "degraded": counts.get("degraded").copied().unwrap_or(0),
            "offline": counts.get("offline").copied().unwrap_or(0),
            "results": results,
        }))
    }

    async fn containers(&self, args: &Value) -> Result<Value, ToolError> {
        let descriptor = self.descriptor(args)?;
        let key = descriptor.key();
        let use_sudo = self.use_sudo(args)?;
        let all = self
            .validation
            .ensure_optional_bool(args.get("all"), "all")?
            .unwrap_or(true);
        let policy = self.policy(args, &descriptor, None)?;
        let docker = self.docker.clone();
        let containers = self
            .with_retry(descriptor, policy, docker_reachability(use_sudo), move |shell, ctx| {
                docker.containers(shell, all, use_sudo, ctx.cancel)
            })
            .await?;
        Ok(serde_json::json!({
            "success": true,
            "target": key,
            "count": containers.len(),
            "containers": containers,
        }))
    }

    async fn logs(&self, args: &Value) -> Result<Value, ToolError> {
        let descriptor = self.descriptor(args)?;
        let key = descriptor.key();
        let use_sudo = self.use_sudo(args)?;
        let container = self.validation.ensure_string(
            args.get("container").unwrap_or(&Value::Null),
            "container",
            true,
        )?;
        let mut options = LogOptions::default();
        if let Some(tail) = self
            .validation
            .ensure_optional_count(args.get("tail"), "tail")?
        {
            options.tail = tail;
        }
        options.timestamps = self
            .validation
            .ensure_optional_bool(args.get("timestamps"), "timestamps")?
            .unwrap_or(false);
        options.since = self
            .validation
            .ensure_optional_string(args.get("since"), "since", true)?;
        options.until = self
            .validation
            .ensure_optional_string(args.get("until"), "until", true)?;

        let policy = self.policy(args, &descriptor, None)?;
        let docker = self.docker.clone();
        let logs = self
            .with_retry(descriptor, policy, docker_reachability(use_sudo), move |shell, ctx| {
                docker.logs(shell, &container, &options, use_sudo, ctx.cancel)
            })
            .await?;
        Ok(serde_json::json!({
            "success": true,
            "target": key,
            "logs": logs,
        }))
    }

    async fn permissions(&self, args: &Value) -> Result<Value, ToolError> {
        let descriptor = self.descriptor(args)?;
        let key = descriptor.key();
        let use_sudo = self.use_sudo(args)?;
        let policy = self.policy(args, &descriptor, None)?;
        let username = descriptor.username.clone();
        let docker = self.docker.clone();
        let (report, socket) = self
            .with_retry(descriptor, policy, echo_reachability(), move |shell, ctx| {
                let report = docker.check_permissions(shell, use_sudo, ctx.cancel);
                let socket = docker.socket_permissions(shell, ctx.cancel);
                Ok((report, socket))
            })
            .await?;
        let fix = (!report.direct_access_allowed && !socket.in_docker_group)
            .then(|| suggest_permission_fix(&username));
        Ok(serde_json::json!({
            "success": !report.no_access,
            "target": key,
            "permissions": report,
            "socket": socket,
            "fix": fix,
        }))
    }

    async fn search(&self, args: &Value) -> Result<Value, ToolError> {
        let descriptor = self.descriptor(args)?;
        let key = descriptor.key();
        let use_sudo = self.use_sudo(args)?;
        let term = self.validation.ensure_string(
            args.get("term").unwrap_or(&Value::Null),
            "term",
            true,
        )?;
        let mut query = SearchQuery::new(term);
        if let Some(filters) = args.get("filters").filter(|v| !v.is_null()) {
            for (name, value) in self.validation.ensure_object(Some(filters), "filters")? {
                let value = match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                query = query.filter(name.clone(), value);
            }
        }
        if let Some(limit) = self
            .validation
            .ensure_optional_count(args.get("limit"), "limit")?
        {
            query = query.limit(limit);
        }

        let policy = self.policy(args, &descriptor, None)?;
        let docker = self.docker.clone();
        let results = self
            .with_retry(descriptor, policy, docker_reachability(use_sudo), move |shell, ctx| {
                docker.search_registry(shell, &query, use_sudo, ctx.cancel)
            })
            .await?;
        Ok(serde_json::json!({
            "success": true,
            "target": key,
            "count": results.len(),
            "results": results,
        }))
    }

    async fn build_info(&self, args: &Value) -> Result<Value, ToolError> {
        let descriptor = self.descriptor(args)?;
        let key = descriptor.key();
        let use_sudo = self.use_sudo(args)?;
        let image = self.validation.ensure_string(
            args.get("image").unwrap_or(&Value::Null),
            "image",
            true,
        )?;
        let policy = self.policy(args, &descriptor, None)?;
        let docker = self.docker.clone();
        let info = self
            .with_retry(descriptor, policy, docker_reachability(use_sudo), move |shell, ctx| {
                docker.build_info(shell, &image, use_sudo, ctx.cancel)
            })
            .await?;
        Ok(serde_json::json!({
            "success": true,
            "target": key,
            "build_info": info,
        }))
    }

    fn pool_status(&self) -> Result<Value, ToolError> {
        let sessions = self.pool.keys();
        let statuses = self
            .statuses
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone();
        Ok(serde_json::json!({
            "success": true,
            "count": sessions.len(),
            "sessions": sessions,
            "statuses": statuses,
        }))
    }

    fn disconnect(&self, args: &Value) -> Result<Value, ToolError> {
        let all = self
            .validation
            .ensure_optional_bool(args.get("all"), "all")?
            .unwrap_or(false);
        if all {
            let closed = self.pool.close_all();
            return Ok(serde_json::json!({ "success": true, "closed": closed }));
        }
        let key = match self
            .validation
            .ensure_optional_string(args.get("key"), "key", true)?
        {
            Some(key) => key,
            None => self.descriptor(args)?.key(),
        };
        let removed = self.pool.remove(&key);
        Ok(serde_json::json!({ "success": true, "key": key, "removed": removed }))
    }
}
