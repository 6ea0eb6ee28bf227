//! Client side of the management IPC protocol.
//!
//! A [`Client`] owns one connection to a running plugin and issues one
//! request at a time. [`Connect`] and [`Upstream`] are the seams an adapter
//! depends on, so it can be driven by a real socket or by a test double.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, info};
use url::Url;

use crate::error::{ErrorCode, LsmError, Result};
use crate::jsonrpc::{Id, Method, Request, Response, read_message, write_message};
use crate::management::Management;
use crate::message::*;

/// Directory holding one listening socket per installed plugin.
pub const DEFAULT_IPC_DIR: &str = "/var/run/lsm/ipc";

/// An open connection that can be closed exactly once.
#[async_trait]
pub trait Upstream: Management {
    async fn close(self) -> Result<()>;
}

/// Opens [`Upstream`] connections.
#[async_trait]
pub trait Connect: Send + Sync + 'static {
    type Conn: Upstream + 'static;

    async fn connect(&self, uri: &str, password: &str, timeout_ms: u32) -> Result<Self::Conn>;
}

// -----------------------------------------------------------------------------
// Unix socket connector
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdsConnector {
    ipc_dir: PathBuf,
}

impl UdsConnector {
    pub fn new(ipc_dir: impl Into<PathBuf>) -> Self {
        Self { ipc_dir: ipc_dir.into() }
    }

    pub fn ipc_dir(&self) -> &Path {
        &self.ipc_dir
    }
}

#[async_trait]
impl Connect for UdsConnector {
    type Conn = Client<UnixStream>;

    async fn connect(&self, uri: &str, password: &str, timeout_ms: u32) -> Result<Self::Conn> {
        Client::connect(&self.ipc_dir, uri, password, timeout_ms).await
    }
}

/// Socket of the plugin serving `uri`: the scheme, minus any `+transport` suffix.
pub fn socket_path(ipc_dir: &Path, uri: &str) -> Result<PathBuf> {
    let parsed = Url::parse(uri).map_err(|e| LsmError::invalid_argument(format!("invalid uri '{uri}': {e}")))?;
    let plugin = parsed.scheme().split('+').next().unwrap_or_default();
    Ok(ipc_dir.join(plugin))
}

// -----------------------------------------------------------------------------
// Client
// -----------------------------------------------------------------------------

pub struct Client<S = UnixStream> {
    stream: S,
    next_id: i64,
    timeout_ms: u32,
}

impl Client<UnixStream> {
    /// Connects to the plugin socket for `uri` and registers with it.
    pub async fn connect(ipc_dir: &Path, uri: &str, password: &str, timeout_ms: u32) -> Result<Self> {
        let path = socket_path(ipc_dir, uri)?;
        if !path.exists() {
            return Err(LsmError::new(
                ErrorCode::PluginNotExist,
                format!("plugin socket {} does not exist", path.display()),
            ));
        }

        let stream = UnixStream::connect(&path).await.map_err(|e| {
            let code = match e.kind() {
                std::io::ErrorKind::PermissionDenied => ErrorCode::PluginSocketPermission,
                _ => ErrorCode::DaemonNotRunning,
            };
            LsmError::new(code, format!("cannot connect to {}: {e}", path.display()))
        })?;
        debug!(socket = %path.display(), "connected to plugin socket");

        let mut client = Client::from_stream(stream);
        client.register(uri, password, timeout_ms).await?;
        Ok(client)
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps an already connected stream. Call [`Client::register`] next.
    pub fn from_stream(stream: S) -> Self {
        Self {
            stream,
            next_id: 1,
            timeout_ms: 0,
        }
    }

    pub async fn register(&mut self, uri: &str, password: &str, timeout_ms: u32) -> Result<()> {
        self.rpc(
            Method::PluginRegister,
            json!({"uri": uri, "password": password, "timeout": timeout_ms}),
        )
        .await?;
        self.timeout_ms = timeout_ms;
        info!(%uri, timeout_ms, "registered with plugin");
        Ok(())
    }

    /// The timeout handed to the plugin at registration or by the last `time_out_set`.
    pub fn timeout(&self) -> u32 {
        self.timeout_ms
    }

    pub async fn plugin_info(&mut self) -> Result<PluginInfo> {
        self.rpc_as(Method::PluginInfo, json!({})).await
    }

    pub async fn time_out_set(&mut self, timeout_ms: u32) -> Result<()> {
        self.rpc(Method::TimeOutSet, json!({"ms": timeout_ms})).await?;
        self.timeout_ms = timeout_ms;
        Ok(())
    }

    pub async fn time_out_get(&mut self) -> Result<u32> {
        self.rpc_as(Method::TimeOutGet, json!({})).await
    }

    async fn rpc(&mut self, method: Method, mut params: Value) -> Result<Value> {
        if let Value::Object(map) = &mut params {
            map.insert("flags".into(), json!(0));
        }
        let id = self.next_id;
        self.next_id += 1;

        write_message(&mut self.stream, &Request::call(Id::Number(id), method, params)).await?;
        let resp: Response = read_message(&mut self.stream).await?.ok_or_else(|| {
            LsmError::new(
                ErrorCode::TransportCommunication,
                format!("plugin closed the connection during '{method}'"),
            )
        })?;
        if resp.id != Id::Number(id) {
            return Err(LsmError::new(
                ErrorCode::TransportCommunication,
                format!("response id {:?} does not match request id {id}", resp.id),
            ));
        }
        resp.into_result()
    }

    async fn rpc_as<T: DeserializeOwned>(&mut self, method: Method, params: Value) -> Result<T> {
        Ok(serde_json::from_value(self.rpc(method, params).await?)?)
    }

    async fn rpc_unit(&mut self, method: Method, params: Value) -> Result<()> {
        self.rpc(method, params).await.map(|_| ())
    }
}

fn search_params(search: Option<&Search>) -> Value {
    json!({
        "search_key": search.map(|s| &s.key),
        "search_value": search.map(|s| &s.value),
    })
}

#[async_trait]
impl<S> Upstream for Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn close(mut self) -> Result<()> {
        self.rpc(Method::PluginUnregister, json!({})).await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[async_trait]
impl<S> Management for Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn capabilities(&mut self, system: &System) -> Result<Capabilities> {
        self.rpc_as(Method::Capabilities, json!({"system": system})).await
    }

    async fn job_status(&mut self, job_id: &str) -> Result<JobInfo> {
        self.rpc_as(Method::JobStatus, json!({"job_id": job_id})).await
    }

    async fn job_free(&mut self, job_id: &str) -> Result<()> {
        self.rpc_unit(Method::JobFree, json!({"job_id": job_id})).await
    }

    async fn systems(&mut self, search: Option<&Search>) -> Result<Vec<System>> {
        // Older plugins reject search arguments on `systems`, so only send them when filtering.
        let params = match search {
            Some(_) => search_params(search),
            None => json!({}),
        };
        self.rpc_as(Method::Systems, params).await
    }

    async fn pools(&mut self, search: Option<&Search>) -> Result<Vec<Pool>> {
        self.rpc_as(Method::Pools, search_params(search)).await
    }

    async fn volumes(&mut self, search: Option<&Search>) -> Result<Vec<Volume>> {
        self.rpc_as(Method::Volumes, search_params(search)).await
    }

    async fn volume_create(
        &mut self,
        pool: &Pool,
        name: &str,
        size_bytes: u64,
        provisioning: VolumeProvisionType,
    ) -> Result<Outcome<Volume>> {
        let v = self
            .rpc(
                Method::VolumeCreate,
                json!({"pool": pool, "volume_name": name, "size_bytes": size_bytes, "provisioning": provisioning}),
            )
            .await?;
        Outcome::from_pair_value(v)
    }

    async fn volume_delete(&mut self, volume: &Volume) -> Result<Outcome<()>> {
        let v = self.rpc(Method::VolumeDelete, json!({"volume": volume})).await?;
        Outcome::from_job_value(v)
    }

    async fn disks(&mut self) -> Result<Vec<Disk>> {
        self.rpc_as(Method::Disks, json!({})).await
    }

    async fn volume_replicate(
        &mut self,
        pool: Option<&Pool>,
        rep_type: VolumeReplicateType,
        source: &Volume,
        name: &str,
    ) -> Result<Outcome<Volume>> {
        let v = self
            .rpc(
                Method::VolumeReplicate,
                json!({"pool": pool, "rep_type": rep_type, "volume_src": source, "name": name}),
            )
            .await?;
        Outcome::from_pair_value(v)
    }

    async fn volume_replicate_range(
        &mut self,
        rep_type: VolumeReplicateType,
        source: &Volume,
        dest: &Volume,
        ranges: &[BlockRange],
    ) -> Result<Outcome<()>> {
        let v = self
            .rpc(
                Method::VolumeReplicateRange,
                json!({"rep_type": rep_type, "volume_src": source, "volume_dest": dest, "ranges": ranges}),
            )
            .await?;
        Outcome::from_job_value(v)
    }

    async fn volume_replicate_range_block_size(&mut self, system: &System) -> Result<u32> {
        self.rpc_as(Method::VolumeReplicateRangeBlockSize, json!({"system": system}))
            .await
    }

    async fn volume_resize(&mut self, volume: &Volume, new_size_bytes: u64) -> Result<Outcome<Volume>> {
        let v = self
            .rpc(
                Method::VolumeResize,
                json!({"volume": volume, "new_size_bytes": new_size_bytes}),
            )
            .await?;
        Outcome::from_pair_value(v)
    }

    async fn volume_enable(&mut self, volume: &Volume) -> Result<()> {
        self.rpc_unit(Method::VolumeEnable, json!({"volume": volume})).await
    }

    async fn volume_disable(&mut self, volume: &Volume) -> Result<()> {
        self.rpc_unit(Method::VolumeDisable, json!({"volume": volume})).await
    }

    async fn volume_mask(&mut self, volume: &Volume, access_group: &AccessGroup) -> Result<()> {
        self.rpc_unit(
            Method::VolumeMask,
            json!({"volume": volume, "access_group": access_group}),
        )
        .await
    }

    async fn volume_unmask(&mut self, volume: &Volume, access_group: &AccessGroup) -> Result<()> {
        self.rpc_unit(
            Method::VolumeUnmask,
            json!({"volume": volume, "access_group": access_group}),
        )
        .await
    }

    async fn volumes_accessible_by_access_group(&mut self, access_group: &AccessGroup) -> Result<Vec<Volume>> {
        self.rpc_as(
            Method::VolumesAccessibleByAccessGroup,
            json!({"access_group": access_group}),
        )
        .await
    }

    async fn access_groups_granted_to_volume(&mut self, volume: &Volume) -> Result<Vec<AccessGroup>> {
        self.rpc_as(Method::AccessGroupsGrantedToVolume, json!({"volume": volume}))
            .await
    }

    async fn volume_child_dependency(&mut self, volume: &Volume) -> Result<bool> {
        self.rpc_as(Method::VolumeChildDependency, json!({"volume": volume})).await
    }

    async fn volume_child_dependency_rm(&mut self, volume: &Volume) -> Result<Outcome<()>> {
        let v = self
            .rpc(Method::VolumeChildDependencyRm, json!({"volume": volume}))
            .await?;
        Outcome::from_job_value(v)
    }

    async fn access_groups(&mut self) -> Result<Vec<AccessGroup>> {
        self.rpc_as(Method::AccessGroups, search_params(None)).await
    }

    async fn access_group_create(
        &mut self,
        name: &str,
        init_id: &str,
        init_type: InitiatorType,
        system: &System,
    ) -> Result<AccessGroup> {
        self.rpc_as(
            Method::AccessGroupCreate,
            json!({"name": name, "init_id": init_id, "init_type": init_type, "system": system}),
        )
        .await
    }

    async fn access_group_delete(&mut self, access_group: &AccessGroup) -> Result<()> {
        self.rpc_unit(Method::AccessGroupDelete, json!({"access_group": access_group}))
            .await
    }

    async fn access_group_initiator_add(
        &mut self,
        access_group: &AccessGroup,
        init_id: &str,
        init_type: InitiatorType,
    ) -> Result<AccessGroup> {
        self.rpc_as(
            Method::AccessGroupInitiatorAdd,
            json!({"access_group": access_group, "init_id": init_id, "init_type": init_type}),
        )
        .await
    }

    async fn access_group_initiator_delete(
        &mut self,
        access_group: &AccessGroup,
        init_id: &str,
        init_type: InitiatorType,
    ) -> Result<AccessGroup> {
        self.rpc_as(
            Method::AccessGroupInitiatorDelete,
            json!({"access_group": access_group, "init_id": init_id, "init_type": init_type}),
        )
        .await
    }

    async fn iscsi_chap_auth(
        &mut self,
        init_id: &str,
        in_user: Option<&str>,
        in_password: Option<&str>,
        out_user: Option<&str>,
        out_password: Option<&str>,
    ) -> Result<()> {
        self.rpc_unit(
            Method::IscsiChapAuth,
            json!({
                "init_id": init_id,
                "in_user": in_user,
                "in_password": in_password,
                "out_user": out_user,
                "out_password": out_password,
            }),
        )
        .await
    }

    async fn target_ports(&mut self) -> Result<Vec<TargetPort>> {
        self.rpc_as(Method::TargetPorts, search_params(None)).await
    }

    async fn volume_ident_led_on(&mut self, volume: &Volume) -> Result<()> {
        self.rpc_unit(Method::VolumeIdentLedOn, json!({"volume": volume})).await
    }

    async fn volume_ident_led_off(&mut self, volume: &Volume) -> Result<()> {
        self.rpc_unit(Method::VolumeIdentLedOff, json!({"volume": volume})).await
    }

    async fn file_systems(&mut self, search: Option<&Search>) -> Result<Vec<FileSystem>> {
        self.rpc_as(Method::Fs, search_params(search)).await
    }

    async fn fs_create(&mut self, pool: &Pool, name: &str, size_bytes: u64) -> Result<Outcome<FileSystem>> {
        let v = self
            .rpc(
                Method::FsCreate,
                json!({"pool": pool, "name": name, "size_bytes": size_bytes}),
            )
            .await?;
        Outcome::from_pair_value(v)
    }

    async fn fs_delete(&mut self, fs: &FileSystem) -> Result<Outcome<()>> {
        let v = self.rpc(Method::FsDelete, json!({"fs": fs})).await?;
        Outcome::from_job_value(v)
    }

    async fn fs_resize(&mut self, fs: &FileSystem, new_size_bytes: u64) -> Result<Outcome<FileSystem>> {
        let v = self
            .rpc(Method::FsResize, json!({"fs": fs, "new_size_bytes": new_size_bytes}))
            .await?;
        Outcome::from_pair_value(v)
    }

    async fn fs_clone(
        &mut self,
        source: &FileSystem,
        dest_name: &str,
        snapshot: Option<&FileSystemSnapShot>,
    ) -> Result<Outcome<FileSystem>> {
        let v = self
            .rpc(
                Method::FsClone,
                json!({"src_fs": source, "dest_fs_name": dest_name, "snapshot": snapshot}),
            )
            .await?;
        Outcome::from_pair_value(v)
    }

    async fn fs_file_clone(
        &mut self,
        fs: &FileSystem,
        src_file_name: &str,
        dest_file_name: &str,
        snapshot: Option<&FileSystemSnapShot>,
    ) -> Result<Outcome<()>> {
        let v = self
            .rpc(
                Method::FsFileClone,
                json!({
                    "fs": fs,
                    "src_file_name": src_file_name,
                    "dest_file_name": dest_file_name,
                    "snapshot": snapshot,
                }),
            )
            .await?;
        Outcome::from_job_value(v)
    }

    async fn fs_snapshot_create(&mut self, fs: &FileSystem, name: &str) -> Result<Outcome<FileSystemSnapShot>> {
        let v = self
            .rpc(Method::FsSnapshotCreate, json!({"fs": fs, "snapshot_name": name}))
            .await?;
        Outcome::from_pair_value(v)
    }

    async fn fs_snapshot_delete(&mut self, fs: &FileSystem, snapshot: &FileSystemSnapShot) -> Result<Outcome<()>> {
        let v = self
            .rpc(Method::FsSnapshotDelete, json!({"fs": fs, "snapshot": snapshot}))
            .await?;
        Outcome::from_job_value(v)
    }

    async fn fs_snapshots(&mut self, fs: &FileSystem) -> Result<Vec<FileSystemSnapShot>> {
        self.rpc_as(Method::FsSnapshots, json!({"fs": fs})).await
    }

    async fn fs_snapshot_restore(
        &mut self,
        fs: &FileSystem,
        snapshot: &FileSystemSnapShot,
        all_files: bool,
        files: &[String],
        restore_files: &[String],
    ) -> Result<Outcome<()>> {
        let v = self
            .rpc(
                Method::FsSnapshotRestore,
                json!({
                    "fs": fs,
                    "snapshot": snapshot,
                    "files": files,
                    "restore_files": restore_files,
                    "all_files": all_files,
                }),
            )
            .await?;
        Outcome::from_job_value(v)
    }

    async fn fs_child_dependency(&mut self, fs: &FileSystem, files: &[String]) -> Result<bool> {
        self.rpc_as(Method::FsChildDependency, json!({"fs": fs, "files": files}))
            .await
    }

    async fn fs_child_dependency_rm(&mut self, fs: &FileSystem, files: &[String]) -> Result<Outcome<()>> {
        let v = self
            .rpc(Method::FsChildDependencyRm, json!({"fs": fs, "files": files}))
            .await?;
        Outcome::from_job_value(v)
    }

    async fn exports(&mut self, search: Option<&Search>) -> Result<Vec<NfsExport>> {
        self.rpc_as(Method::Exports, search_params(search)).await
    }

    async fn export_fs(
        &mut self,
        fs_id: &str,
        export_path: Option<&str>,
        access: &NfsAccess,
        auth_type: Option<&str>,
        options: Option<&str>,
    ) -> Result<Outcome<NfsExport>> {
        let v = self
            .rpc(
                Method::ExportFs,
                json!({
                    "fs_id": fs_id,
                    "export_path": export_path,
                    "root_list": access.root,
                    "rw_list": access.rw,
                    "ro_list": access.ro,
                    "anon_uid": access.anon_uid,
                    "anon_gid": access.anon_gid,
                    "auth_type": auth_type,
                    "options": options,
                }),
            )
            .await?;
        Outcome::from_item_or_job_value(v)
    }

    async fn export_remove(&mut self, export: &NfsExport) -> Result<()> {
        self.rpc_unit(Method::ExportRemove, json!({"export": export})).await
    }

    async fn export_auth(&mut self) -> Result<Vec<String>> {
        self.rpc_as(Method::ExportAuth, json!({})).await
    }

    async fn volume_raid_create(
        &mut self,
        name: &str,
        raid_type: RaidType,
        disks: &[Disk],
        strip_size: u32,
    ) -> Result<Volume> {
        self.rpc_as(
            Method::VolumeRaidCreate,
            json!({"name": name, "raid_type": raid_type, "disks": disks, "strip_size": strip_size}),
        )
        .await
    }

    async fn volume_raid_create_cap_get(&mut self, system: &System) -> Result<SupportedRaidCapability> {
        self.rpc_as(Method::VolumeRaidCreateCapGet, json!({"system": system}))
            .await
    }

    async fn pool_member_info(&mut self, pool: &Pool) -> Result<PoolMemberInfo> {
        self.rpc_as(Method::PoolMemberInfo, json!({"pool": pool})).await
    }

    async fn volume_raid_info(&mut self, volume: &Volume) -> Result<VolumeRaidInfo> {
        self.rpc_as(Method::VolumeRaidInfo, json!({"volume": volume})).await
    }

    async fn batteries(&mut self) -> Result<Vec<Battery>> {
        self.rpc_as(Method::Batteries, search_params(None)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonrpc::{read_message, write_message};
    use tokio::io::DuplexStream;

    /// Answers every request on the other end of a duplex pipe with a canned value.
    fn fake_plugin(mut side: DuplexStream, answers: Vec<Value>) -> tokio::task::JoinHandle<Vec<Request>> {
        tokio::spawn(async move {
            let mut seen = Vec::new();
            for answer in answers {
                let Some(req) = read_message::<_, Request>(&mut side).await.unwrap() else { break };
                let resp = Response::success(req.id.clone(), answer);
                seen.push(req);
                write_message(&mut side, &resp).await.unwrap();
            }
            seen
        })
    }

    #[test]
    fn socket_is_named_after_the_scheme() {
        let dir = Path::new("/run/ipc");
        assert_eq!(socket_path(dir, "sim://").unwrap(), PathBuf::from("/run/ipc/sim"));
        assert_eq!(
            socket_path(dir, "ontap+ssl://admin@host/").unwrap(),
            PathBuf::from("/run/ipc/ontap")
        );
        let err = socket_path(dir, "not a uri").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn missing_socket_is_plugin_not_exist() {
        let dir = tempfile::tempdir().unwrap();
        let err = Client::connect(dir.path(), "nope://", "", 1000).await.err().unwrap();
        assert_eq!(err.code, ErrorCode::PluginNotExist);
    }

    #[tokio::test]
    async fn register_sends_uri_and_timeout_with_flags() {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let plugin = fake_plugin(theirs, vec![Value::Null]);

        let mut client = Client::from_stream(ours);
        client.register("mock://", "", 30_000).await.unwrap();
        assert_eq!(client.timeout(), 30_000);

        let seen = plugin.await.unwrap();
        assert_eq!(seen[0].method, "plugin_register");
        assert_eq!(seen[0].params["uri"], "mock://");
        assert_eq!(seen[0].params["timeout"], 30_000);
        assert_eq!(seen[0].params["flags"], 0);
    }

    #[tokio::test]
    async fn listing_sends_null_search_when_unfiltered() {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let plugin = fake_plugin(theirs, vec![json!([]), json!([]), json!([])]);

        let mut client = Client::from_stream(ours);
        client.pools(None).await.unwrap();
        client.pools(Some(&Search::new("system_id", "sys0"))).await.unwrap();
        client.systems(None).await.unwrap();

        let seen = plugin.await.unwrap();
        assert!(seen[0].params["search_key"].is_null());
        assert_eq!(seen[1].params["search_key"], "system_id");
        assert_eq!(seen[1].params["search_value"], "sys0");
        assert!(seen[2].params.get("search_key").is_none());
    }

    #[tokio::test]
    async fn job_string_becomes_job_outcome() {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let plugin = fake_plugin(theirs, vec![json!("JOB-42")]);

        let mut client = Client::from_stream(ours);
        let export = client
            .export_fs("FS-1", Some("/exports/a"), &NfsAccess::default(), None, None)
            .await
            .unwrap();
        assert_eq!(export, Outcome::Job("JOB-42".into()));

        let seen = plugin.await.unwrap();
        assert_eq!(seen[0].params["anon_uid"], ANON_UID_GID_NA);
        assert!(seen[0].params["auth_type"].is_null());
    }

    #[tokio::test]
    async fn mismatched_response_id_is_a_transport_error() {
        let (ours, mut theirs) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let _req: Request = read_message(&mut theirs).await.unwrap().unwrap();
            write_message(&mut theirs, &Response::success(Id::Number(999), json!([])))
                .await
                .unwrap();
        });

        let mut client = Client::from_stream(ours);
        let err = client.disks().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TransportCommunication);
    }

    #[tokio::test]
    async fn closed_connection_is_a_transport_error() {
        let (ours, theirs) = tokio::io::duplex(1024);
        drop(theirs);
        let mut client = Client::from_stream(ours);
        let err = client.batteries().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TransportCommunication);
    }
}
