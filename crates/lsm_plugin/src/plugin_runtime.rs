//! Runtime that wires the daemon's framed IPC traffic to a user supplied
//! [`PluginHandler`] implementation.
//!
//! Handles:
//!   * Requests → method dispatch → response frame
//!   * Methods the plugin does not declare → `NoSupport`
//!   * Malformed frames and arguments → transport errors, the loop keeps going
//!   * `plugin_unregister` → answered, then the loop ends
//!
//! Usage:
//! ```ignore
//! let stream = plugin_runtime::stream_from_fd(fd)?;
//! plugin_runtime::run(MyPlugin::default(), stream, PluginInfo::new("my plugin", "0.1.0")).await?;
//! ```

use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::error::{ErrorCode, LsmError, Result};
use crate::jsonrpc::{Id, Method, Request, Response, read_frame, write_message};
use crate::management::Management;
use crate::message::*;

// -----------------------------------------------------------------------------
// PluginHandler trait – implement this in your plugin code
// -----------------------------------------------------------------------------

#[async_trait]
pub trait PluginHandler: Management + 'static {
    /// First call on every connection; receives the URI the client used.
    async fn register(&mut self, params: PluginRegister) -> Result<()>;
    /// Last call on every connection.
    async fn unregister(&mut self) -> Result<()>;
    fn time_out_set(&mut self, timeout_ms: u32) -> Result<()>;
    fn time_out_get(&self) -> u32;
    /// The management methods this plugin answers. Lifecycle methods
    /// (register, unregister, info, timeouts) are always answered.
    fn methods(&self) -> &[Method];
}

// -----------------------------------------------------------------------------
// Runtime
// -----------------------------------------------------------------------------

/// Adopts the connected socket the daemon passes by descriptor number.
#[cfg(unix)]
pub fn stream_from_fd(fd: std::os::unix::io::RawFd) -> std::io::Result<tokio::net::UnixStream> {
    use std::os::unix::io::FromRawFd;

    // SAFETY: the daemon hands this descriptor to the plugin process and
    // nothing else in the process owns or closes it.
    let stream = unsafe { std::os::unix::net::UnixStream::from_raw_fd(fd) };
    stream.set_nonblocking(true)?;
    tokio::net::UnixStream::from_std(stream)
}

/// Serves requests on `stream` until EOF or until `plugin_unregister` has
/// been answered.
pub async fn run<P, S>(mut plugin: P, mut stream: S, info: PluginInfo) -> Result<()>
where
    P: PluginHandler,
    S: AsyncRead + AsyncWrite + Unpin,
{
    info!(description = %info.description, version = %info.version, "plugin runtime started");

    while let Some(frame) = read_frame(&mut stream).await? {
        let req = match serde_json::from_slice::<Request>(&frame) {
            Ok(req) => req,
            Err(e) => {
                warn!("dropping malformed request: {e}");
                let err = LsmError::new(ErrorCode::TransportSerialization, format!("malformed request: {e}"));
                write_message(&mut stream, &Response::fail(Id::Null, err)).await?;
                continue;
            }
        };

        let last = req.method == Method::PluginUnregister.as_ref();
        let resp = handle_request(&mut plugin, &info, req).await;
        write_message(&mut stream, &resp).await?;

        if last {
            info!("plugin unregistered, stopping runtime");
            return Ok(());
        }
    }

    info!("daemon closed the connection");
    Ok(())
}

/// Dispatches one request and builds the matching response.
pub async fn handle_request<P: PluginHandler>(plugin: &mut P, info: &PluginInfo, req: Request) -> Response {
    let started = Instant::now();
    debug!(method = %req.method, id = ?req.id, "request");

    let result = match req.method.parse::<Method>() {
        Ok(method) if method.is_lifecycle() || plugin.methods().contains(&method) => {
            dispatch(plugin, info, method, &req.params).await
        }
        Ok(method) => Err(LsmError::no_support(method)),
        Err(_) => Err(LsmError::new(
            ErrorCode::NoSupport,
            format!("unknown method '{}'", req.method),
        )),
    };

    let elapsed = started.elapsed().as_secs_f64() * 1_000.0;
    tracing::event!(
        target: "request",
        tracing::Level::INFO,
        request = %req.method,
        latency_ms = elapsed,
        status = if result.is_ok() { "ok" } else { "error" },
    );

    match result {
        Ok(value) => Response::success(req.id, value),
        Err(err) => {
            warn!(method = %req.method, error = %err, "request failed");
            Response::fail(req.id, err)
        }
    }
}

/// Named arguments of one request.
struct Args<'a> {
    method: Method,
    params: &'a Value,
}

impl Args<'_> {
    /// A missing argument decodes from `null`, so optional arguments may be left out.
    fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let raw = self.params.get(name).cloned().unwrap_or(Value::Null);
        serde_json::from_value(raw).map_err(|e| {
            LsmError::new(
                ErrorCode::TransportInvalidArg,
                format!("{}: invalid argument '{name}': {e}", self.method),
            )
        })
    }

    fn search(&self) -> Result<Option<Search>> {
        let key: Option<String> = self.get("search_key")?;
        let value: Option<String> = self.get("search_value")?;
        match (key, value) {
            (Some(key), Some(value)) => Ok(Some(Search { key, value })),
            (None, None) => Ok(None),
            _ => Err(LsmError::new(
                ErrorCode::TransportInvalidArg,
                format!("{}: search_key and search_value must be given together", self.method),
            )),
        }
    }
}

fn json<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

async fn dispatch<P: PluginHandler>(plugin: &mut P, info: &PluginInfo, method: Method, params: &Value) -> Result<Value> {
    let a = Args { method, params };

    match method {
        // ─────────────── lifecycle ───────────────
        Method::PluginInfo => json(info),
        Method::PluginRegister => {
            let reg: PluginRegister = serde_json::from_value(params.clone()).map_err(|e| {
                LsmError::new(ErrorCode::TransportInvalidArg, format!("{method}: {e}"))
            })?;
            plugin.register(reg).await?;
            Ok(Value::Null)
        }
        Method::PluginUnregister => {
            plugin.unregister().await?;
            Ok(Value::Null)
        }
        Method::TimeOutSet => {
            plugin.time_out_set(a.get("ms")?)?;
            Ok(Value::Null)
        }
        Method::TimeOutGet => json(plugin.time_out_get()),

        // ─────────────── management ───────────────
        Method::Capabilities => json(plugin.capabilities(&a.get::<System>("system")?).await?),
        Method::JobStatus => json(plugin.job_status(&a.get::<String>("job_id")?).await?),
        Method::JobFree => {
            plugin.job_free(&a.get::<String>("job_id")?).await?;
            Ok(Value::Null)
        }
        Method::Systems => json(plugin.systems(a.search()?.as_ref()).await?),
        Method::Pools => json(plugin.pools(a.search()?.as_ref()).await?),

        // ─────────────── block ───────────────
        Method::Volumes => json(plugin.volumes(a.search()?.as_ref()).await?),
        Method::VolumeCreate => plugin
            .volume_create(
                &a.get::<Pool>("pool")?,
                &a.get::<String>("volume_name")?,
                a.get("size_bytes")?,
                a.get("provisioning")?,
            )
            .await?
            .to_pair_value(),
        Method::VolumeDelete => Ok(plugin.volume_delete(&a.get::<Volume>("volume")?).await?.to_job_value()),
        Method::Disks => json(plugin.disks().await?),
        Method::VolumeReplicate => plugin
            .volume_replicate(
                a.get::<Option<Pool>>("pool")?.as_ref(),
                a.get("rep_type")?,
                &a.get::<Volume>("volume_src")?,
                &a.get::<String>("name")?,
            )
            .await?
            .to_pair_value(),
        Method::VolumeReplicateRange => Ok(plugin
            .volume_replicate_range(
                a.get("rep_type")?,
                &a.get::<Volume>("volume_src")?,
                &a.get::<Volume>("volume_dest")?,
                &a.get::<Vec<BlockRange>>("ranges")?,
            )
            .await?
            .to_job_value()),
        Method::VolumeReplicateRangeBlockSize => {
            json(plugin.volume_replicate_range_block_size(&a.get::<System>("system")?).await?)
        }
        Method::VolumeResize => plugin
            .volume_resize(&a.get::<Volume>("volume")?, a.get("new_size_bytes")?)
            .await?
            .to_pair_value(),
        Method::VolumeEnable => {
            plugin.volume_enable(&a.get::<Volume>("volume")?).await?;
            Ok(Value::Null)
        }
        Method::VolumeDisable => {
            plugin.volume_disable(&a.get::<Volume>("volume")?).await?;
            Ok(Value::Null)
        }
        Method::VolumeMask => {
            plugin
                .volume_mask(&a.get::<Volume>("volume")?, &a.get::<AccessGroup>("access_group")?)
                .await?;
            Ok(Value::Null)
        }
        Method::VolumeUnmask => {
            plugin
                .volume_unmask(&a.get::<Volume>("volume")?, &a.get::<AccessGroup>("access_group")?)
                .await?;
            Ok(Value::Null)
        }
        Method::VolumesAccessibleByAccessGroup => json(
            plugin
                .volumes_accessible_by_access_group(&a.get::<AccessGroup>("access_group")?)
                .await?,
        ),
        Method::AccessGroupsGrantedToVolume => {
            json(plugin.access_groups_granted_to_volume(&a.get::<Volume>("volume")?).await?)
        }
        Method::VolumeChildDependency => json(plugin.volume_child_dependency(&a.get::<Volume>("volume")?).await?),
        Method::VolumeChildDependencyRm => Ok(plugin
            .volume_child_dependency_rm(&a.get::<Volume>("volume")?)
            .await?
            .to_job_value()),
        Method::AccessGroups => json(plugin.access_groups().await?),
        Method::AccessGroupCreate => json(
            plugin
                .access_group_create(
                    &a.get::<String>("name")?,
                    &a.get::<String>("init_id")?,
                    a.get("init_type")?,
                    &a.get::<System>("system")?,
                )
                .await?,
        ),
        Method::AccessGroupDelete => {
            plugin.access_group_delete(&a.get::<AccessGroup>("access_group")?).await?;
            Ok(Value::Null)
        }
        Method::AccessGroupInitiatorAdd => json(
            plugin
                .access_group_initiator_add(
                    &a.get::<AccessGroup>("access_group")?,
                    &a.get::<String>("init_id")?,
                    a.get("init_type")?,
                )
                .await?,
        ),
        Method::AccessGroupInitiatorDelete => json(
            plugin
                .access_group_initiator_delete(
                    &a.get::<AccessGroup>("access_group")?,
                    &a.get::<String>("init_id")?,
                    a.get("init_type")?,
                )
                .await?,
        ),
        Method::IscsiChapAuth => {
            let in_user: Option<String> = a.get("in_user")?;
            let in_password: Option<String> = a.get("in_password")?;
            let out_user: Option<String> = a.get("out_user")?;
            let out_password: Option<String> = a.get("out_password")?;
            plugin
                .iscsi_chap_auth(
                    &a.get::<String>("init_id")?,
                    in_user.as_deref(),
                    in_password.as_deref(),
                    out_user.as_deref(),
                    out_password.as_deref(),
                )
                .await?;
            Ok(Value::Null)
        }
        Method::TargetPorts => json(plugin.target_ports().await?),
        Method::VolumeIdentLedOn => {
            plugin.volume_ident_led_on(&a.get::<Volume>("volume")?).await?;
            Ok(Value::Null)
        }
        Method::VolumeIdentLedOff => {
            plugin.volume_ident_led_off(&a.get::<Volume>("volume")?).await?;
            Ok(Value::Null)
        }

        // ─────────────── file systems ───────────────
        Method::Fs => json(plugin.file_systems(a.search()?.as_ref()).await?),
        Method::FsCreate => plugin
            .fs_create(&a.get::<Pool>("pool")?, &a.get::<String>("name")?, a.get("size_bytes")?)
            .await?
            .to_pair_value(),
        Method::FsDelete => Ok(plugin.fs_delete(&a.get::<FileSystem>("fs")?).await?.to_job_value()),
        Method::FsResize => plugin
            .fs_resize(&a.get::<FileSystem>("fs")?, a.get("new_size_bytes")?)
            .await?
            .to_pair_value(),
        Method::FsClone => plugin
            .fs_clone(
                &a.get::<FileSystem>("src_fs")?,
                &a.get::<String>("dest_fs_name")?,
                a.get::<Option<FileSystemSnapShot>>("snapshot")?.as_ref(),
            )
            .await?
            .to_pair_value(),
        Method::FsFileClone => Ok(plugin
            .fs_file_clone(
                &a.get::<FileSystem>("fs")?,
                &a.get::<String>("src_file_name")?,
                &a.get::<String>("dest_file_name")?,
                a.get::<Option<FileSystemSnapShot>>("snapshot")?.as_ref(),
            )
            .await?
            .to_job_value()),
        Method::FsSnapshotCreate => plugin
            .fs_snapshot_create(&a.get::<FileSystem>("fs")?, &a.get::<String>("snapshot_name")?)
            .await?
            .to_pair_value(),
        Method::FsSnapshotDelete => Ok(plugin
            .fs_snapshot_delete(&a.get::<FileSystem>("fs")?, &a.get::<FileSystemSnapShot>("snapshot")?)
            .await?
            .to_job_value()),
        Method::FsSnapshots => json(plugin.fs_snapshots(&a.get::<FileSystem>("fs")?).await?),
        Method::FsSnapshotRestore => Ok(plugin
            .fs_snapshot_restore(
                &a.get::<FileSystem>("fs")?,
                &a.get::<FileSystemSnapShot>("snapshot")?,
                a.get("all_files")?,
                &a.get::<Option<Vec<String>>>("files")?.unwrap_or_default(),
                &a.get::<Option<Vec<String>>>("restore_files")?.unwrap_or_default(),
            )
            .await?
            .to_job_value()),
        Method::FsChildDependency => json(
            plugin
                .fs_child_dependency(
                    &a.get::<FileSystem>("fs")?,
                    &a.get::<Option<Vec<String>>>("files")?.unwrap_or_default(),
                )
                .await?,
        ),
        Method::FsChildDependencyRm => Ok(plugin
            .fs_child_dependency_rm(
                &a.get::<FileSystem>("fs")?,
                &a.get::<Option<Vec<String>>>("files")?.unwrap_or_default(),
            )
            .await?
            .to_job_value()),

        // ─────────────── nfs ───────────────
        Method::Exports => json(plugin.exports(a.search()?.as_ref()).await?),
        Method::ExportFs => {
            let access = NfsAccess {
                root: a.get::<Option<Vec<String>>>("root_list")?.unwrap_or_default(),
                rw: a.get::<Option<Vec<String>>>("rw_list")?.unwrap_or_default(),
                ro: a.get::<Option<Vec<String>>>("ro_list")?.unwrap_or_default(),
                anon_uid: a.get::<Option<i64>>("anon_uid")?.unwrap_or(ANON_UID_GID_NA),
                anon_gid: a.get::<Option<i64>>("anon_gid")?.unwrap_or(ANON_UID_GID_NA),
            };
            let export_path: Option<String> = a.get("export_path")?;
            let auth_type: Option<String> = a.get("auth_type")?;
            let options: Option<String> = a.get("options")?;
            plugin
                .export_fs(
                    &a.get::<String>("fs_id")?,
                    export_path.as_deref(),
                    &access,
                    auth_type.as_deref(),
                    options.as_deref(),
                )
                .await?
                .to_item_or_job_value()
        }
        Method::ExportRemove => {
            plugin.export_remove(&a.get::<NfsExport>("export")?).await?;
            Ok(Value::Null)
        }
        Method::ExportAuth => json(plugin.export_auth().await?),

        // ─────────────── hba / raid ───────────────
        Method::VolumeRaidCreate => json(
            plugin
                .volume_raid_create(
                    &a.get::<String>("name")?,
                    a.get("raid_type")?,
                    &a.get::<Vec<Disk>>("disks")?,
                    a.get("strip_size")?,
                )
                .await?,
        ),
        Method::VolumeRaidCreateCapGet => json(plugin.volume_raid_create_cap_get(&a.get::<System>("system")?).await?),
        Method::PoolMemberInfo => json(plugin.pool_member_info(&a.get::<Pool>("pool")?).await?),
        Method::VolumeRaidInfo => json(plugin.volume_raid_info(&a.get::<Volume>("volume")?).await?),
        Method::Batteries => json(plugin.batteries().await?),
    }
}
