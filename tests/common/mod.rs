#![allow(dead_code)]

use once_cell::sync::Lazy;
use sshpool::errors::ConnectError;
use sshpool::ssh::{
    ConnectionDescriptor, Connector, Credential, ReadStatus, RemoteShell, ShellOutput,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

pub static ENV_LOCK: Lazy<AsyncMutex<()>> = Lazy::new(|| AsyncMutex::new(()));

/// Maps a command line to the text the fake shell prints for it.
pub type Responder = Arc<dyn Fn(&str) -> String + Send + Sync>;

pub fn descriptor(host: &str) -> ConnectionDescriptor {
    let mut descriptor =
        ConnectionDescriptor::new(host, "ops", Credential::Password("secret".to_string()));
    descriptor.retry_delay = Duration::from_millis(1);
    descriptor.command_timeout = Duration::from_millis(500);
    descriptor
}

pub struct FakeShell {
    descriptor: ConnectionDescriptor,
    responder: Responder,
    commands: Arc<Mutex<Vec<String>>>,
    connected: bool,
}

impl RemoteShell for FakeShell {
    fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    fn execute(
        &mut self,
        command: &str,
        _timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> ShellOutput {
        if cancel.is_cancelled() {
            return ShellOutput::new("", ReadStatus::Cancelled, Duration::ZERO);
        }
        if !self.connected {
            return ShellOutput::new("", ReadStatus::Closed, Duration::ZERO);
        }
        self.commands.lock().unwrap().push(command.to_string());
        let text = (self.responder)(command);
        if text == TIMEOUT {
            return ShellOutput::new("", ReadStatus::TimedOut, Duration::from_millis(500));
        }
        ShellOutput::new(text, ReadStatus::Completed, Duration::from_millis(1))
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Responder output that makes the fake shell report a timeout.
pub const TIMEOUT: &str = "\u{0}timeout";

pub struct FakeConnector {
    responder: Responder,
    connects: AtomicU32,
    failures: Mutex<VecDeque<ConnectError>>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl FakeConnector {
    pub fn new(responder: Responder) -> Self {
        Self {
            responder,
            connects: AtomicU32::new(0),
            failures: Mutex::new(VecDeque::new()),
            commands: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A host with a healthy Docker daemon.
    pub fn docker_host() -> Self {
        Self::new(Arc::new(docker_host_output))
    }

    /// The next `connect` calls fail with these errors, in order.
    pub fn failing_with(self, errors: Vec<ConnectError>) -> Self {
        *self.failures.lock().unwrap() = errors.into();
        self
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl Connector for FakeConnector {
    fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn RemoteShell>, ConnectError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(Box::new(FakeShell {
            descriptor: descriptor.clone(),
            responder: self.responder.clone(),
            commands: self.commands.clone(),
            connected: true,
        }))
    }
}

pub const BUILDKIT_OUTPUT: &str = "#1 [internal] load build definition from Dockerfile
#1 transferring dockerfile: 120B done
#1 DONE 0.0s
#4 [1/2] FROM docker.io/library/alpine:latest
#4 DONE 1.2s
#5 [2/2] RUN echo hello > /hello.txt
#5 0.231 hello
#5 DONE 0.3s
#6 exporting to image
#6 DONE 0.1s";

pub fn docker_host_output(command: &str) -> String {
    let command = command.trim_start_matches("sudo ");
    if command.contains("connection_test") {
        return "connection_test".to_string();
    }
    if command.starts_with("mkdir ") || command.starts_with("printf ") {
        return String::new();
    }
    if command.starts_with("ls -l /var/run/docker.sock") {
        return "srw-rw---- 1 root docker 0 Oct 16 09:12 /var/run/docker.sock".to_string();
    }
    if command == "getent group docker" {
        return "docker:x:998:ops".to_string();
    }
    if command == "id" {
        return "uid=1000(ops) gid=1000(ops) groups=1000(ops),27(sudo),998(docker)".to_string();
    }
    if command.starts_with("sleep ") {
        return TIMEOUT.to_string();
    }
    if command.starts_with("echo ") {
        return command
            .trim_start_matches("echo ")
            .trim_matches('\'')
            .to_string();
    }
    if command == "docker --version" {
        return "Docker version 28.0.1, build 068a01e".to_string();
    }
    if command.starts_with("docker version") && command.contains("--format") {
        return r#"{"Client":{"Version":"28.0.1","ApiVersion":"1.48"},"Server":{"Version":"28.0.1","ApiVersion":"1.49"}}"#
            .to_string();
    }
    if command.starts_with("docker info") && command.contains("--format") {
        return r#"{"ServerVersion":"28.0.1","Containers":2,"Images":3,"DriverStatus":[["Backing Filesystem","extfs"]]}"#
            .to_string();
    }
    if command.starts_with("docker container ls") && command.contains("--format") {
        return [
            r#"{"ID":"3f2a","Names":"web","State":"running"}"#,
            r#"{"ID":"9b1c","Names":"db","State":"exited"}"#,
        ]
        .join("\n");
    }
    if command.starts_with("docker ps") || command.starts_with("docker container ls") {
        return [
            "CONTAINER ID   IMAGE          COMMAND   CREATED       STATUS       PORTS   NAMES",
            "3f2a          nginx:1.27     \"nginx\"   2 hours ago   Up 2 hours   80/tcp  web",
            "9b1c          postgres:16    \"pg\"      3 days ago    Exited (0)           db",
        ]
        .join("\n");
    }
    if command.starts_with("docker images") && command.contains("--format") {
        return [
            r#"{"ID":"a1b2c3d4e5f6","Repository":"nginx","Tag":"1.27","Platform":"linux/amd64"}"#,
            r#"{"ID":"0f9e8d7c6b5a","Repository":"scratch-build","Tag":"dev","Platform":""}"#,
        ]
        .join("\n");
    }
    if command.starts_with("docker image inspect") {
        return r#"[{"Id":"sha256:a1b2c3","Created":"2025-05-01T10:00:00Z","Architecture":"amd64","Os":"linux","Size":192000000,"Config":{"Labels":{"com.docker.buildkit.version":"v0.20.0","maintainer":"NGINX"}},"History":[{"created_by":"RUN nginx -t"}]}]"#
            .to_string();
    }
    if command.starts_with("docker buildx build") {
        return BUILDKIT_OUTPUT.to_string();
    }
    if command.starts_with("docker search") {
        return [
            r#"{"Name":"ubuntu","Description":"Ubuntu is a Debian-based Linux operating system","StarCount":17000,"IsOfficial":"[OK]"}"#,
            r#"{"Name":"ubuntu-upstart","Description":"DEPRECATED, as is Upstart (find other proj…","StarCount":115,"IsOfficial":"[OK]"}"#,
        ]
        .join("\n");
    }
    if command.starts_with("docker image ls") || command.starts_with("docker images") {
        return [
            "REPOSITORY   TAG    IMAGE ID       CREATED       SIZE",
            "nginx        1.27   a1b2c3d4e5f6   2 weeks ago   192MB",
        ]
        .join("\n");
    }
    if command.starts_with("docker container inspect") {
        return "Error response from daemon: No such container: nonexistentcontainer12345"
            .to_string();
    }
    if command.starts_with("docker container logs") {
        return "GET /health 200\nerror: upstream timed out\nGET /health 200".to_string();
    }
    if command.starts_with("docker network ls") || command.starts_with("docker volume ls") {
        return "NETWORK ID   NAME   DRIVER   SCOPE".to_string();
    }
    if command.starts_with("docker version") {
        return "Client:\n Version: 28.0.1\n API version: 1.48\n\nServer:\n Engine:\n  Version: 28.0.1\n  API version: 1.49 (minimum version 1.24)"
            .to_string();
    }
    if command.starts_with("docker info") {
        return "Containers: 2\nImages: 3\nServer Version: 28.0.1\nStorage Driver: overlay2"
            .to_string();
    }
    if command.starts_with("docker ") {
        let sub = command.split_whitespace().nth(1).unwrap_or_default();
        return format!("Error: unknown command \"{}\" for \"docker\"", sub);
    }
    format!("bash: {}: command not found", command)
}
