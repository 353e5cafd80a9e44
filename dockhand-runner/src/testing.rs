//! In-memory container engine for tests
//!
//! Keeps containers, images, networks and volumes in maps and records every
//! call as a short string (`"pull alpine:latest"`, `"kill <id> SIGKILL"`).
//! Attached containers run a simulated script: stdin is read to EOF, the
//! configured `ScriptBehaviour` decides output and exit code. Containers
//! started without an attachment run until killed, except health check
//! containers which exit with the configured code.

use async_trait::async_trait;
use dockhand_client::stdcopy::{StreamKind, encode_frame};
use dockhand_client::types::{
    AttachOptions, ContainerConfig, ContainerCreateResponse, ContainerInspect, ContainerState,
    ContainerWaitResponse, CreateContainer, EndpointSettings, ImageConfig, ImageImport,
    ImageInspect, LogsOptions, NetworkContainer, NetworkCreate, NetworkCreateResponse,
    NetworkResource, NetworkSettings, RemoveOptions, SystemInfo, Volume, VolumeCreate,
};
use dockhand_client::{AttachedStreams, ByteStream, ContainerEngine, EngineError, Result};
use dockhand_core::image::with_default_tag;
use dockhand_core::labels::label_key;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const PIPE_CAPACITY: usize = 256 * 1024;
const WAIT_POLL: Duration = Duration::from_millis(5);

/// What a simulated script does
#[derive(Debug, Clone, Default)]
pub struct ScriptBehaviour {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    /// Keep running until killed
    pub hang: bool,
}

impl ScriptBehaviour {
    pub fn exit(stdout: &str, exit_code: i64) -> Self {
        Self {
            stdout: stdout.to_string(),
            exit_code,
            ..Default::default()
        }
    }

    pub fn hang() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }

    /// Understands `echo <text>`, `exit <code>` and `sleep <n>` lines
    pub fn from_script(script: &str) -> Self {
        let mut behaviour = Self::default();
        for line in script.lines().map(str::trim) {
            if let Some(text) = line.strip_prefix("echo ") {
                behaviour.stdout.push_str(text);
                behaviour.stdout.push('\n');
            } else if let Some(code) = line.strip_prefix("exit ") {
                behaviour.exit_code = code.trim().parse().unwrap_or(1);
                break;
            } else if line.starts_with("sleep ") {
                behaviour.hang = true;
                break;
            }
        }
        behaviour
    }
}

type ScriptFn = Arc<dyn Fn(&str) -> ScriptBehaviour + Send + Sync>;

struct FakeContainer {
    id: String,
    name: String,
    create: CreateContainer,
    status: String,
    exit_code: i64,
    stdin: Vec<u8>,
    logs: Vec<u8>,
    ip_address: String,
    networks: HashMap<String, EndpointSettings>,
    pipes: Option<(DuplexStream, DuplexStream)>,
    kill: CancellationToken,
}

#[derive(Default)]
struct State {
    calls: Vec<String>,
    info: SystemInfo,
    images: HashMap<String, ImageInspect>,
    image_configs: HashMap<String, ImageConfig>,
    missing_from_registry: Vec<String>,
    pull_failures: HashMap<String, VecDeque<(u16, String)>>,
    containers: HashMap<String, FakeContainer>,
    created: Vec<CreateContainer>,
    wait_failures: HashMap<String, u32>,
    networks: HashMap<String, NetworkResource>,
    volumes: HashMap<String, Volume>,
    health_exit_code: i64,
    health_output: String,
    service_output: String,
    next_ip: u8,
}

impl State {
    fn record(&mut self, call: String) {
        self.calls.push(call);
    }

    fn find_image(&self, reference: &str) -> Option<&ImageInspect> {
        self.images
            .get(reference)
            .or_else(|| self.images.get(&with_default_tag(reference)))
            .or_else(|| self.images.values().find(|i| i.id == reference))
    }

    fn container_id(&self, id_or_name: &str) -> Option<String> {
        if self.containers.contains_key(id_or_name) {
            return Some(id_or_name.to_string());
        }
        self.containers
            .values()
            .find(|c| c.name == id_or_name.trim_start_matches('/') || c.id.starts_with(id_or_name))
            .map(|c| c.id.clone())
    }

    fn network_id(&self, id_or_name: &str) -> Option<String> {
        if self.networks.contains_key(id_or_name) {
            return Some(id_or_name.to_string());
        }
        self.networks
            .values()
            .find(|n| n.name == id_or_name)
            .map(|n| n.id.clone())
    }

    fn exit(&mut self, id: &str, code: i64) {
        if let Some(container) = self.containers.get_mut(id) {
            if container.status == "running" {
                container.status = "exited".to_string();
                container.exit_code = code;
            }
        }
    }
}

/// Test double for `ContainerEngine`
pub struct FakeEngine {
    state: Arc<Mutex<State>>,
    script: Mutex<ScriptFn>,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn random_id() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn not_found(kind: &str, id: &str) -> EngineError {
    EngineError::api_error(404, format!("No such {}: {}", kind, id))
}

fn image_for(reference: &str, config: Option<ImageConfig>) -> ImageInspect {
    let digest = Uuid::new_v4().simple().to_string();
    let name = reference.split(':').next().unwrap_or(reference);
    ImageInspect {
        id: format!("sha256:{}", random_id()),
        repo_tags: vec![reference.to_string()],
        repo_digests: vec![format!("{}@sha256:{}{}", name, digest, digest)],
        config,
        os: "linux".to_string(),
        architecture: "amd64".to_string(),
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        let state = State {
            info: SystemInfo {
                os_type: "linux".to_string(),
                architecture: "x86_64".to_string(),
                operating_system: "Fake Linux".to_string(),
                server_version: "24.0.0".to_string(),
                kernel_version: "6.1.0".to_string(),
                name: "fake".to_string(),
            },
            next_ip: 2,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            script: Mutex::new(Arc::new(ScriptBehaviour::from_script)),
        }
    }

    pub fn set_info(&self, info: SystemInfo) {
        self.state.lock().unwrap().info = info;
    }

    pub fn set_script_behaviour<F>(&self, behaviour: F)
    where
        F: Fn(&str) -> ScriptBehaviour + Send + Sync + 'static,
    {
        *self.script.lock().unwrap() = Arc::new(behaviour);
    }

    /// Exit code and output of every health check container
    pub fn set_health_check(&self, exit_code: i64, output: &str) {
        let mut state = self.state.lock().unwrap();
        state.health_exit_code = exit_code;
        state.health_output = output.to_string();
    }

    /// Replaces the recorded log frames of a container
    pub fn set_container_logs(&self, id: &str, logs: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        if let Some(container) = state.containers.get_mut(id) {
            container.logs = logs;
        }
    }

    /// Log output of every service container
    pub fn set_service_output(&self, output: &str) {
        self.state.lock().unwrap().service_output = output.to_string();
    }

    // =========================================================================
    // Images
    // =========================================================================

    pub fn add_local_image(&self, reference: &str) -> ImageInspect {
        let mut state = self.state.lock().unwrap();
        let reference = with_default_tag(reference);
        let config = state.image_configs.get(&reference).cloned();
        let image = image_for(&reference, config);
        state.images.insert(reference, image.clone());
        image
    }

    /// Config applied to the image once it is pulled
    pub fn set_image_config(&self, reference: &str, config: ImageConfig) {
        let mut state = self.state.lock().unwrap();
        state.image_configs.insert(with_default_tag(reference), config);
    }

    /// The next pull of `reference` fails with the given status
    pub fn fail_pull(&self, reference: &str, status: u16, message: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .pull_failures
            .entry(reference.to_string())
            .or_default()
            .push_back((status, message.to_string()));
    }

    /// Pulls of `reference` report a missing repository
    pub fn remove_from_registry(&self, reference: &str) {
        let mut state = self.state.lock().unwrap();
        state.missing_from_registry.push(reference.to_string());
    }

    pub fn has_image(&self, reference: &str) -> bool {
        self.state.lock().unwrap().find_image(reference).is_some()
    }

    // =========================================================================
    // Containers
    // =========================================================================

    fn insert_container(&self, name: &str, status: &str, exit_code: i64) -> String {
        let mut state = self.state.lock().unwrap();
        let id = random_id();
        state.containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                name: name.to_string(),
                create: CreateContainer {
                    name: name.to_string(),
                    ..Default::default()
                },
                status: status.to_string(),
                exit_code,
                stdin: Vec::new(),
                logs: Vec::new(),
                ip_address: String::new(),
                networks: HashMap::new(),
                pipes: None,
                kill: CancellationToken::new(),
            },
        );
        id
    }

    pub fn add_created_container(&self, name: &str) -> String {
        self.insert_container(name, "created", 0)
    }

    pub fn add_running_container(&self, name: &str) -> String {
        self.insert_container(name, "running", 0)
    }

    pub fn add_exited_container(&self, name: &str, exit_code: i64) -> String {
        self.insert_container(name, "exited", exit_code)
    }

    pub fn fail_waits(&self, id: &str, count: u32) {
        self.state
            .lock()
            .unwrap()
            .wait_failures
            .insert(id.to_string(), count);
    }

    pub fn is_running(&self, id: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.containers.get(id).is_some_and(|c| c.status == "running")
    }

    pub fn container_exists(&self, id: &str) -> bool {
        self.state.lock().unwrap().containers.contains_key(id)
    }

    /// Everything the container read from stdin
    pub fn container_stdin(&self, id: &str) -> String {
        let state = self.state.lock().unwrap();
        state
            .containers
            .get(id)
            .map(|c| String::from_utf8_lossy(&c.stdin).into_owned())
            .unwrap_or_default()
    }

    /// Names of existing containers carrying `label=value`
    pub fn containers_with_label(&self, label: &str, value: &str) -> Vec<String> {
        let key = label_key(label);
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state
            .containers
            .values()
            .filter(|c| c.create.config.labels.get(&key).is_some_and(|v| v == value))
            .map(|c| c.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }

    /// Every create request, including containers removed since
    pub fn created_containers(&self) -> Vec<CreateContainer> {
        self.state.lock().unwrap().created.clone()
    }

    // =========================================================================
    // Networks and volumes
    // =========================================================================

    pub fn network_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state.networks.values().map(|n| n.name.clone()).collect();
        names.sort();
        names
    }

    pub fn network(&self, name: &str) -> Option<NetworkResource> {
        let state = self.state.lock().unwrap();
        state.network_id(name).and_then(|id| state.networks.get(&id).cloned())
    }

    /// Attaches a container that no job created
    pub fn add_stray_container_to_network(&self, network: &str, name: &str) -> String {
        let id = self.add_running_container(name);
        let mut state = self.state.lock().unwrap();
        if let Some(net_id) = state.network_id(network) {
            if let Some(net) = state.networks.get_mut(&net_id) {
                net.containers.insert(
                    id.clone(),
                    NetworkContainer {
                        name: name.to_string(),
                        ..Default::default()
                    },
                );
            }
        }
        id
    }

    pub fn volume_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state.volumes.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn volume(&self, name: &str) -> Option<Volume> {
        self.state.lock().unwrap().volumes.get(name).cloned()
    }

    // =========================================================================
    // Call log
    // =========================================================================

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, call: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| *c == call)
            .count()
    }

    pub fn count_calls_with_prefix(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn spawn_script(&self, id: String, pipes: (DuplexStream, DuplexStream), kill: CancellationToken) {
        let state = self.state.clone();
        let script = self.script.lock().unwrap().clone();

        tokio::spawn(async move {
            let (mut stdin, mut output) = pipes;
            let mut input = Vec::new();
            tokio::select! {
                _ = stdin.read_to_end(&mut input) => {}
                _ = kill.cancelled() => return,
            }

            if let Some(container) = state.lock().unwrap().containers.get_mut(&id) {
                container.stdin = input.clone();
            }

            let behaviour = script(&String::from_utf8_lossy(&input));
            let mut frames = Vec::new();
            if !behaviour.stdout.is_empty() {
                frames.extend(encode_frame(StreamKind::Stdout, behaviour.stdout.as_bytes()));
            }
            if !behaviour.stderr.is_empty() {
                frames.extend(encode_frame(StreamKind::Stderr, behaviour.stderr.as_bytes()));
            }
            let _ = output.write_all(&frames).await;
            if let Some(container) = state.lock().unwrap().containers.get_mut(&id) {
                container.logs.extend_from_slice(&frames);
            }

            if behaviour.hang {
                kill.cancelled().await;
                return;
            }

            state.lock().unwrap().exit(&id, behaviour.exit_code);
        });
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn info(&self) -> Result<SystemInfo> {
        let mut state = self.state.lock().unwrap();
        state.record("info".to_string());
        Ok(state.info.clone())
    }

    async fn image_inspect(&self, reference: &str) -> Result<ImageInspect> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("inspect image {}", reference));
        state
            .find_image(reference)
            .cloned()
            .ok_or_else(|| not_found("image", reference))
    }

    async fn image_pull(&self, reference: &str, registry_auth: Option<&str>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("pull {}", reference));
        if registry_auth.is_some() {
            state.record(format!("pull {} with auth", reference));
        }

        if let Some((status, message)) = state
            .pull_failures
            .get_mut(reference)
            .and_then(|queue| queue.pop_front())
        {
            return Err(EngineError::api_error(status, message));
        }

        if state.missing_from_registry.iter().any(|r| r == reference) {
            return Err(EngineError::api_error(
                404,
                format!(
                    "pull access denied for {}, repository does not exist or may require 'docker login'",
                    reference
                ),
            ));
        }

        let config = state.image_configs.get(reference).cloned();
        let image = image_for(reference, config);
        state.images.insert(reference.to_string(), image);
        Ok(())
    }

    async fn image_import(&self, mut source: ByteStream, options: ImageImport) -> Result<()> {
        let mut content = Vec::new();
        source.read_to_end(&mut content).await?;

        let reference = format!("{}:{}", options.repository, options.tag);
        let mut state = self.state.lock().unwrap();
        state.record(format!("import {}", reference));
        let image = image_for(&reference, None);
        state.images.insert(reference, image);
        Ok(())
    }

    async fn container_create(&self, create: &CreateContainer) -> Result<ContainerCreateResponse> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("create {}", create.name));

        if state.containers.values().any(|c| c.name == create.name) {
            return Err(EngineError::api_error(
                409,
                format!("Conflict. The container name \"/{}\" is already in use", create.name),
            ));
        }
        if state.find_image(&create.config.image).is_none() {
            return Err(not_found("image", &create.config.image));
        }

        let id = random_id();
        let ip_address = format!("172.17.0.{}", state.next_ip);
        state.next_ip = state.next_ip.wrapping_add(1);

        let mut networks = HashMap::new();
        let mut attach_to: Vec<(String, EndpointSettings)> = create
            .networking_config
            .endpoints_config
            .iter()
            .map(|(name, endpoint)| (name.clone(), endpoint.clone()))
            .collect();
        let mode = &create.host_config.network_mode;
        if !mode.is_empty() && !attach_to.iter().any(|(name, _)| name == mode) {
            attach_to.push((mode.clone(), EndpointSettings::default()));
        }
        for (name, endpoint) in attach_to {
            if let Some(net_id) = state.network_id(&name) {
                if let Some(network) = state.networks.get_mut(&net_id) {
                    network.containers.insert(
                        id.clone(),
                        NetworkContainer {
                            name: create.name.clone(),
                            ipv4_address: format!("{}/16", ip_address),
                            ..Default::default()
                        },
                    );
                }
            }
            networks.insert(
                name,
                EndpointSettings {
                    ip_address: ip_address.clone(),
                    ..endpoint
                },
            );
        }

        state.created.push(create.clone());
        state.containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                name: create.name.clone(),
                create: create.clone(),
                status: "created".to_string(),
                exit_code: 0,
                stdin: Vec::new(),
                logs: Vec::new(),
                ip_address,
                networks,
                pipes: None,
                kill: CancellationToken::new(),
            },
        );

        Ok(ContainerCreateResponse { id, warnings: None })
    }

    async fn container_start(&self, id: &str) -> Result<()> {
        let pipes;
        let kill;
        {
            let mut state = self.state.lock().unwrap();
            state.record(format!("start {}", id));
            let id = state.container_id(id).ok_or_else(|| not_found("container", id))?;
            let health_exit_code = state.health_exit_code;
            let health_output = state.health_output.clone();
            let service_output = state.service_output.clone();

            let Some(container) = state.containers.get_mut(&id) else {
                return Err(not_found("container", &id));
            };
            container.status = "running".to_string();
            pipes = container.pipes.take();
            kill = container.kill.clone();

            if pipes.is_none() {
                let kind = container
                    .create
                    .config
                    .labels
                    .get(&label_key("type"))
                    .cloned()
                    .unwrap_or_default();
                match kind.as_str() {
                    "wait" => {
                        container.logs = encode_frame(StreamKind::Stdout, health_output.as_bytes());
                        container.status = "exited".to_string();
                        container.exit_code = health_exit_code;
                    }
                    "service" => {
                        container.logs = encode_frame(StreamKind::Stdout, service_output.as_bytes());
                    }
                    _ => {}
                }
            }
        }

        if let Some(pipes) = pipes {
            self.spawn_script(id.to_string(), pipes, kill);
        }
        Ok(())
    }

    async fn container_inspect(&self, id: &str) -> Result<ContainerInspect> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("inspect {}", id));
        let id = state.container_id(id).ok_or_else(|| not_found("container", id))?;
        let container = &state.containers[&id];
        let image_config = state
            .find_image(&container.create.config.image)
            .and_then(|i| i.config.clone())
            .unwrap_or_default();

        let ContainerConfig {
            image,
            env,
            cmd,
            entrypoint,
            labels,
            ..
        } = container.create.config.clone();
        let mut full_env = image_config.env.clone().unwrap_or_default();
        full_env.extend(env);

        Ok(ContainerInspect {
            id: container.id.clone(),
            name: format!("/{}", container.name),
            image: image.clone(),
            state: ContainerState {
                status: container.status.clone(),
                running: container.status == "running",
                exit_code: container.exit_code,
                ..Default::default()
            },
            config: Some(ImageConfig {
                env: Some(full_env),
                exposed_ports: image_config.exposed_ports.clone(),
                entrypoint: entrypoint.or(image_config.entrypoint.clone()),
                cmd: cmd.or(image_config.cmd.clone()),
                image,
                labels: Some(labels),
                volumes: None,
            }),
            network_settings: NetworkSettings {
                ip_address: container.ip_address.clone(),
                networks: container.networks.clone(),
            },
        })
    }

    async fn container_attach(&self, id: &str, _options: AttachOptions) -> Result<AttachedStreams> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("attach {}", id));
        let id = state.container_id(id).ok_or_else(|| not_found("container", id))?;

        let (client_input, container_stdin) = tokio::io::duplex(PIPE_CAPACITY);
        let (container_output, client_output) = tokio::io::duplex(PIPE_CAPACITY);
        if let Some(container) = state.containers.get_mut(&id) {
            container.pipes = Some((container_stdin, container_output));
        }

        Ok(AttachedStreams {
            output: Box::new(client_output),
            input: Box::new(client_input),
        })
    }

    async fn container_logs(&self, id: &str, _options: &LogsOptions) -> Result<ByteStream> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("logs {}", id));
        let id = state.container_id(id).ok_or_else(|| not_found("container", id))?;
        let logs = state.containers[&id].logs.clone();
        Ok(Box::new(std::io::Cursor::new(logs)))
    }

    async fn container_wait(&self, id: &str) -> Result<ContainerWaitResponse> {
        {
            let mut state = self.state.lock().unwrap();
            state.record(format!("wait {}", id));
            if let Some(remaining) = state.wait_failures.get_mut(id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(EngineError::api_error(500, "connection reset by peer"));
                }
            }
        }

        loop {
            {
                let state = self.state.lock().unwrap();
                let container = state
                    .container_id(id)
                    .and_then(|id| state.containers.get(&id))
                    .ok_or_else(|| not_found("container", id))?;
                if container.status == "exited" {
                    return Ok(ContainerWaitResponse {
                        status_code: container.exit_code,
                        error: None,
                    });
                }
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }

    async fn container_kill(&self, id: &str, signal: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("kill {} {}", id, signal));
        let id = state.container_id(id).ok_or_else(|| not_found("container", id))?;
        let container = &state.containers[&id];
        if container.status != "running" {
            return Err(EngineError::api_error(
                409,
                format!("Container {} is not running", id),
            ));
        }
        let kill = container.kill.clone();
        state.exit(&id, 137);
        kill.cancel();
        Ok(())
    }

    async fn container_remove(&self, id: &str, options: RemoveOptions) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("remove {}", id));
        let id = state.container_id(id).ok_or_else(|| not_found("container", id))?;
        if state.containers[&id].status == "running" && !options.force {
            return Err(EngineError::api_error(
                409,
                "You cannot remove a running container",
            ));
        }
        if let Some(container) = state.containers.remove(&id) {
            container.kill.cancel();
        }
        for network in state.networks.values_mut() {
            network.containers.remove(&id);
        }
        Ok(())
    }

    async fn network_list(&self) -> Result<Vec<NetworkResource>> {
        let mut state = self.state.lock().unwrap();
        state.record("network list".to_string());
        Ok(state.networks.values().cloned().collect())
    }

    async fn network_create(&self, create: &NetworkCreate) -> Result<NetworkCreateResponse> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("network create {}", create.name));
        if state.network_id(&create.name).is_some() {
            return Err(EngineError::api_error(
                409,
                format!("network with name {} already exists", create.name),
            ));
        }

        let id = random_id();
        state.networks.insert(
            id.clone(),
            NetworkResource {
                id: id.clone(),
                name: create.name.clone(),
                driver: create.driver.clone(),
                enable_ipv6: create.enable_ipv6,
                containers: HashMap::new(),
                labels: create.labels.clone(),
            },
        );
        Ok(NetworkCreateResponse {
            id,
            warning: String::new(),
        })
    }

    async fn network_inspect(&self, id: &str) -> Result<NetworkResource> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("network inspect {}", id));
        let id = state.network_id(id).ok_or_else(|| not_found("network", id))?;
        Ok(state.networks[&id].clone())
    }

    async fn network_disconnect(&self, network: &str, container: &str, _force: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("network disconnect {} {}", network, container));
        let net_id = state
            .network_id(network)
            .ok_or_else(|| not_found("network", network))?;
        let container_id = state.container_id(container).unwrap_or_else(|| container.to_string());
        let removed = state
            .networks
            .get_mut(&net_id)
            .and_then(|n| n.containers.remove(&container_id));
        if removed.is_none() {
            return Err(EngineError::api_error(
                403,
                format!("container {} is not connected to network {}", container, network),
            ));
        }
        Ok(())
    }

    async fn network_remove(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("network remove {}", id));
        let id = state.network_id(id).ok_or_else(|| not_found("network", id))?;
        if !state.networks[&id].containers.is_empty() {
            return Err(EngineError::api_error(
                403,
                format!("error while removing network: network {} has active endpoints", id),
            ));
        }
        state.networks.remove(&id);
        Ok(())
    }

    async fn volume_create(&self, create: &VolumeCreate) -> Result<Volume> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("volume create {}", create.name));
        let volume = state
            .volumes
            .entry(create.name.clone())
            .or_insert_with(|| Volume {
                name: create.name.clone(),
                driver: if create.driver.is_empty() {
                    "local".to_string()
                } else {
                    create.driver.clone()
                },
                mountpoint: format!("/var/lib/docker/volumes/{}/_data", create.name),
                labels: Some(create.labels.clone()),
            });
        Ok(volume.clone())
    }

    async fn volume_remove(&self, name: &str, _force: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("volume remove {}", name));
        state
            .volumes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found("volume", name))
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().unwrap().record("close".to_string());
        Ok(())
    }
}
