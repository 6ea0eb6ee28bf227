use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::client::{Connect, Upstream};
use crate::error::{ErrorCode, LsmError, Result};
use crate::jsonrpc::Method;
use crate::management::Management;
use crate::message::*;
use crate::plugin_runtime::PluginHandler;

/// Methods [`MockBackend`] answers with something other than `NoSupport`.
pub const MOCK_METHODS: &[Method] = &[
    Method::Capabilities,
    Method::JobStatus,
    Method::JobFree,
    Method::Systems,
    Method::Pools,
    Method::Volumes,
    Method::VolumeCreate,
    Method::VolumeDelete,
    Method::Disks,
    Method::Fs,
    Method::FsCreate,
    Method::FsDelete,
    Method::Exports,
    Method::ExportFs,
];

#[derive(Default)]
struct MockState {
    calls: Vec<Method>,
    volumes: Vec<Volume>,
    file_systems: Vec<FileSystem>,
    exports: Vec<NfsExport>,
    next_job: Option<JobId>,
    fail_next: Option<LsmError>,
    closed: bool,
    registered: Option<PluginRegister>,
    timeout_ms: u32,
}

/// In-memory storage backend: one system, one pool, and whatever volumes,
/// file systems and exports get created. Clones share state, so a test can keep a handle while the code
/// under test owns another.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
    jobs: Arc<DashMap<JobId, JobInfo>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn system() -> System {
        System {
            id: "sim-01".into(),
            name: "Mock storage system".into(),
            status: 2,
            status_info: String::new(),
            plugin_data: None,
            fw_version: "1.0".into(),
            mode: -1,
            read_cache_pct: -1,
        }
    }

    pub fn pool() -> Pool {
        Pool {
            id: "POOL-1".into(),
            name: "Pool 1".into(),
            element_type: 0,
            unsupported_actions: 0,
            total_space: 1 << 40,
            free_space: 1 << 39,
            status: 2,
            status_info: String::new(),
            system_id: "sim-01".into(),
            plugin_data: None,
        }
    }

    /// The next job-capable call answers with this job instead of completing.
    pub async fn start_job_next(&self, job_id: impl Into<JobId>) {
        self.state.lock().await.next_job = Some(job_id.into());
    }

    /// The next call of any kind fails with `err`.
    pub async fn fail_next(&self, err: LsmError) {
        self.state.lock().await.fail_next = Some(err);
    }

    pub async fn calls(&self) -> Vec<Method> {
        self.state.lock().await.calls.clone()
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Parameters of the last `plugin_register` when served by the runtime.
    pub async fn registered(&self) -> Option<PluginRegister> {
        self.state.lock().await.registered.clone()
    }

    pub fn has_job(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    /// Records the call and hands back an injected failure, if any.
    async fn enter(&self, method: Method) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(method);
        match state.fail_next.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn take_job(&self) -> Option<JobId> {
        self.state.lock().await.next_job.take()
    }

    /// `done` right away, or the injected job already completed with `item`.
    async fn complete<T>(&self, done: T, item: Option<JobItem>) -> Outcome<T> {
        match self.take_job().await {
            Some(job) => {
                self.jobs.insert(
                    job.clone(),
                    JobInfo {
                        status: JobStatus::Complete,
                        percent: 100,
                        item,
                    },
                );
                Outcome::Job(job)
            }
            None => Outcome::Done(done),
        }
    }
}

fn filter<T>(items: Vec<T>, search: Option<&Search>, field: impl Fn(&T, &str) -> Option<String>) -> Result<Vec<T>> {
    let Some(search) = search else { return Ok(items) };
    let mut out = Vec::new();
    for item in items {
        match field(&item, &search.key) {
            Some(v) if v == search.value => out.push(item),
            Some(_) => {}
            None => {
                return Err(LsmError::new(
                    ErrorCode::UnsupportedSearchKey,
                    format!("unsupported search key '{}'", search.key),
                ));
            }
        }
    }
    Ok(out)
}

#[async_trait]
impl Management for MockBackend {
    async fn capabilities(&mut self, _system: &System) -> Result<Capabilities> {
        self.enter(Method::Capabilities).await?;
        Ok(Capabilities { cap: "01".repeat(8) })
    }

    async fn job_status(&mut self, job_id: &str) -> Result<JobInfo> {
        self.enter(Method::JobStatus).await?;
        self.jobs
            .get(job_id)
            .map(|j| j.value().clone())
            .ok_or_else(|| LsmError::new(ErrorCode::NotFoundJob, format!("job {job_id} not found")))
    }

    async fn job_free(&mut self, job_id: &str) -> Result<()> {
        self.enter(Method::JobFree).await?;
        self.jobs
            .remove(job_id)
            .map(|_| ())
            .ok_or_else(|| LsmError::new(ErrorCode::NotFoundJob, format!("job {job_id} not found")))
    }

    async fn systems(&mut self, search: Option<&Search>) -> Result<Vec<System>> {
        self.enter(Method::Systems).await?;
        filter(vec![Self::system()], search, |s, key| match key {
            "id" => Some(s.id.clone()),
            _ => None,
        })
    }

    async fn pools(&mut self, search: Option<&Search>) -> Result<Vec<Pool>> {
        self.enter(Method::Pools).await?;
        filter(vec![Self::pool()], search, |p, key| match key {
            "id" => Some(p.id.clone()),
            "system_id" => Some(p.system_id.clone()),
            _ => None,
        })
    }

    async fn volumes(&mut self, search: Option<&Search>) -> Result<Vec<Volume>> {
        self.enter(Method::Volumes).await?;
        let volumes = self.state.lock().await.volumes.clone();
        filter(volumes, search, |v, key| match key {
            "id" => Some(v.id.clone()),
            "system_id" => Some(v.system_id.clone()),
            "pool_id" => Some(v.pool_id.clone()),
            _ => None,
        })
    }

    async fn volume_create(
        &mut self,
        pool: &Pool,
        name: &str,
        size_bytes: u64,
        _provisioning: VolumeProvisionType,
    ) -> Result<Outcome<Volume>> {
        self.enter(Method::VolumeCreate).await?;
        let mut state = self.state.lock().await;
        if state.volumes.iter().any(|v| v.name == name) {
            return Err(LsmError::new(
                ErrorCode::NameConflict,
                format!("volume '{name}' already exists"),
            ));
        }
        let volume = Volume {
            id: format!("VOL-{}", state.volumes.len() + 1),
            name: name.into(),
            vpd83: String::new(),
            block_size: 512,
            num_of_blocks: size_bytes.div_ceil(512),
            admin_state: 1,
            system_id: pool.system_id.clone(),
            pool_id: pool.id.clone(),
            plugin_data: None,
        };
        state.volumes.push(volume.clone());

        match state.next_job.take() {
            Some(job) => {
                self.jobs.insert(
                    job.clone(),
                    JobInfo {
                        status: JobStatus::Complete,
                        percent: 100,
                        item: Some(JobItem::Volume(volume)),
                    },
                );
                Ok(Outcome::Job(job))
            }
            None => Ok(Outcome::Done(volume)),
        }
    }

    async fn volume_delete(&mut self, volume: &Volume) -> Result<Outcome<()>> {
        self.enter(Method::VolumeDelete).await?;
        {
            let mut state = self.state.lock().await;
            let before = state.volumes.len();
            state.volumes.retain(|v| v.id != volume.id);
            if state.volumes.len() == before {
                return Err(LsmError::new(
                    ErrorCode::NotFoundVolume,
                    format!("volume {} not found", volume.id),
                ));
            }
        }
        match self.take_job().await {
            Some(job) => {
                self.jobs.insert(
                    job.clone(),
                    JobInfo {
                        status: JobStatus::InProgress,
                        percent: 50,
                        item: None,
                    },
                );
                Ok(Outcome::Job(job))
            }
            None => Ok(Outcome::Done(())),
        }
    }

    async fn disks(&mut self) -> Result<Vec<Disk>> {
        self.enter(Method::Disks).await?;
        Ok(vec![])
    }

    async fn file_systems(&mut self, search: Option<&Search>) -> Result<Vec<FileSystem>> {
        self.enter(Method::Fs).await?;
        let file_systems = self.state.lock().await.file_systems.clone();
        filter(file_systems, search, |f, key| match key {
            "id" => Some(f.id.clone()),
            "pool_id" => Some(f.pool_id.clone()),
            _ => None,
        })
    }

    async fn fs_create(&mut self, pool: &Pool, name: &str, size_bytes: u64) -> Result<Outcome<FileSystem>> {
        self.enter(Method::FsCreate).await?;
        let fs = {
            let mut state = self.state.lock().await;
            if state.file_systems.iter().any(|f| f.name == name) {
                return Err(LsmError::new(
                    ErrorCode::NameConflict,
                    format!("file system '{name}' already exists"),
                ));
            }
            let fs = FileSystem {
                id: format!("FS-{}", state.file_systems.len() + 1),
                name: name.into(),
                total_space: size_bytes,
                free_space: size_bytes,
                pool_id: pool.id.clone(),
                system_id: pool.system_id.clone(),
                plugin_data: None,
            };
            state.file_systems.push(fs.clone());
            fs
        };
        Ok(self.complete(fs.clone(), Some(JobItem::FileSystem(fs))).await)
    }

    async fn fs_delete(&mut self, fs: &FileSystem) -> Result<Outcome<()>> {
        self.enter(Method::FsDelete).await?;
        {
            let mut state = self.state.lock().await;
            let before = state.file_systems.len();
            state.file_systems.retain(|f| f.id != fs.id);
            if state.file_systems.len() == before {
                return Err(LsmError::new(ErrorCode::NotFoundFs, format!("file system {} not found", fs.id)));
            }
        }
        Ok(self.complete((), None).await)
    }

    async fn exports(&mut self, search: Option<&Search>) -> Result<Vec<NfsExport>> {
        self.enter(Method::Exports).await?;
        let exports = self.state.lock().await.exports.clone();
        filter(exports, search, |e, key| match key {
            "id" => Some(e.id.clone()),
            "fs_id" => Some(e.fs_id.clone()),
            _ => None,
        })
    }

    async fn export_fs(
        &mut self,
        fs_id: &str,
        export_path: Option<&str>,
        access: &NfsAccess,
        auth_type: Option<&str>,
        options: Option<&str>,
    ) -> Result<Outcome<NfsExport>> {
        self.enter(Method::ExportFs).await?;
        let export = {
            let mut state = self.state.lock().await;
            if !state.file_systems.iter().any(|f| f.id == fs_id) {
                return Err(LsmError::new(ErrorCode::NotFoundFs, format!("file system {fs_id} not found")));
            }
            let export = NfsExport {
                id: format!("EXP-{}", state.exports.len() + 1),
                fs_id: fs_id.into(),
                export_path: export_path.map_or_else(|| format!("/mnt/{fs_id}"), str::to_string),
                auth: auth_type.unwrap_or("standard").into(),
                root: access.root.clone(),
                rw: access.rw.clone(),
                ro: access.ro.clone(),
                anonuid: access.anon_uid,
                anongid: access.anon_gid,
                options: options.unwrap_or_default().into(),
                plugin_data: None,
            };
            state.exports.push(export.clone());
            export
        };
        // an export job has no item to report
        Ok(self.complete(export, None).await)
    }
}

#[async_trait]
impl Upstream for MockBackend {
    /// Honours [`MockBackend::fail_next`]; a failed close leaves the mock open.
    async fn close(self) -> Result<()> {
        self.enter(Method::PluginUnregister).await?;
        self.state.lock().await.closed = true;
        Ok(())
    }
}

/// Lets the runtime serve the mock, so it can sit behind a real socket.
#[async_trait]
impl PluginHandler for MockBackend {
    async fn register(&mut self, params: PluginRegister) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(Method::PluginRegister);
        state.timeout_ms = params.timeout;
        state.registered = Some(params);
        state.closed = false;
        Ok(())
    }

    async fn unregister(&mut self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(Method::PluginUnregister);
        state.closed = true;
        Ok(())
    }

    fn time_out_set(&mut self, timeout_ms: u32) -> Result<()> {
        match self.state.try_lock() {
            Ok(mut state) => {
                state.timeout_ms = timeout_ms;
                Ok(())
            }
            Err(_) => Err(LsmError::new(ErrorCode::PluginBug, "mock state is busy")),
        }
    }

    fn time_out_get(&self) -> u32 {
        self.state.try_lock().map(|s| s.timeout_ms).unwrap_or_default()
    }

    fn methods(&self) -> &[Method] {
        MOCK_METHODS
    }
}

/// Hands out clones of one [`MockBackend`] and records every connect.
#[derive(Clone, Default)]
pub struct MockConnector {
    backend: MockBackend,
    connects: Arc<Mutex<Vec<(String, u32)>>>,
    refuse: Arc<Mutex<Option<LsmError>>>,
}

impl MockConnector {
    pub fn new(backend: MockBackend) -> Self {
        Self {
            backend,
            ..Default::default()
        }
    }

    pub fn backend(&self) -> &MockBackend {
        &self.backend
    }

    /// `(uri, timeout_ms)` of every successful connect, in order.
    pub async fn connects(&self) -> Vec<(String, u32)> {
        self.connects.lock().await.clone()
    }

    /// The next connect attempt fails with `err`.
    pub async fn refuse_next(&self, err: LsmError) {
        *self.refuse.lock().await = Some(err);
    }
}

#[async_trait]
impl Connect for MockConnector {
    type Conn = MockBackend;

    async fn connect(&self, uri: &str, _password: &str, timeout_ms: u32) -> Result<MockBackend> {
        if let Some(err) = self.refuse.lock().await.take() {
            return Err(err);
        }
        self.connects.lock().await.push((uri.to_string(), timeout_ms));
        Ok(self.backend.clone())
    }
}
