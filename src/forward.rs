//! The forwarding plugin.
//!
//! `ForwardPlugin` owns at most one upstream connection. Registration
//! resolves the backend named in the URI and connects to it; every
//! management call afterwards is re-issued on that connection and its
//! answer (result, job or error) is handed back untouched.

use async_trait::async_trait;
use lsm_plugin::client::{Connect, Upstream};
use lsm_plugin::error::{LsmError, Result};
use lsm_plugin::jsonrpc::Method;
use lsm_plugin::management::Management;
use lsm_plugin::message::*;
use lsm_plugin::plugin_runtime::PluginHandler;
use strum::IntoEnumIterator;
use tracing::{info, warn};

use crate::resolver::resolve_backend;

pub const DESCRIPTION: &str = "rust forwarding plugin";

pub fn plugin_info() -> PluginInfo {
    PluginInfo::new(DESCRIPTION, env!("CARGO_PKG_VERSION"))
}

pub struct ForwardPlugin<C: Connect> {
    connector: C,
    upstream: Option<C::Conn>,
    timeout_ms: u32,
    methods: Vec<Method>,
}

impl<C: Connect> ForwardPlugin<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            upstream: None,
            timeout_ms: 0,
            methods: Method::iter().filter(|m| !m.is_lifecycle()).collect(),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.upstream.is_some()
    }

    fn upstream(&mut self) -> Result<&mut C::Conn> {
        self.upstream.as_mut().ok_or_else(LsmError::not_registered)
    }
}

#[async_trait]
impl<C: Connect> PluginHandler for ForwardPlugin<C> {
    async fn register(&mut self, params: PluginRegister) -> Result<()> {
        let backend = resolve_backend(&params.uri)?;

        if let Some(previous) = self.upstream.take() {
            if let Err(e) = previous.close().await {
                warn!(error = %e, "closing previous upstream connection failed");
            }
        }

        let conn = self.connector.connect(&backend, "", params.timeout).await?;
        self.upstream = Some(conn);
        self.timeout_ms = params.timeout;
        info!(uri = %params.uri, %backend, timeout_ms = params.timeout, "forwarding registered");
        Ok(())
    }

    async fn unregister(&mut self) -> Result<()> {
        let conn = self.upstream.take().ok_or_else(LsmError::not_registered)?;
        conn.close().await?;
        info!("forwarding unregistered");
        Ok(())
    }

    fn time_out_set(&mut self, timeout_ms: u32) -> Result<()> {
        info!(timeout_ms, "timeout set");
        self.timeout_ms = timeout_ms;
        Ok(())
    }

    fn time_out_get(&self) -> u32 {
        self.timeout_ms
    }

    fn methods(&self) -> &[Method] {
        &self.methods
    }
}

#[async_trait]
impl<C: Connect> Management for ForwardPlugin<C> {
    async fn capabilities(&mut self, system: &System) -> Result<Capabilities> {
        self.upstream()?.capabilities(system).await
    }
    async fn job_status(&mut self, job_id: &str) -> Result<JobInfo> {
        self.upstream()?.job_status(job_id).await
    }
    async fn job_free(&mut self, job_id: &str) -> Result<()> {
        self.upstream()?.job_free(job_id).await
    }
    async fn systems(&mut self, search: Option<&Search>) -> Result<Vec<System>> {
        self.upstream()?.systems(search).await
    }
    async fn pools(&mut self, search: Option<&Search>) -> Result<Vec<Pool>> {
        self.upstream()?.pools(search).await
    }

    // ─────────────── block ───────────────
    async fn volumes(&mut self, search: Option<&Search>) -> Result<Vec<Volume>> {
        self.upstream()?.volumes(search).await
    }
    async fn volume_create(
        &mut self,
        pool: &Pool,
        name: &str,
        size_bytes: u64,
        provisioning: VolumeProvisionType,
    ) -> Result<Outcome<Volume>> {
        self.upstream()?
            .volume_create(pool, name, size_bytes, provisioning)
            .await
    }
    async fn volume_delete(&mut self, volume: &Volume) -> Result<Outcome<()>> {
        self.upstream()?.volume_delete(volume).await
    }
    async fn disks(&mut self) -> Result<Vec<Disk>> {
        self.upstream()?.disks().await
    }
    async fn volume_replicate(
        &mut self,
        pool: Option<&Pool>,
        rep_type: VolumeReplicateType,
        source: &Volume,
        name: &str,
    ) -> Result<Outcome<Volume>> {
        self.upstream()?
            .volume_replicate(pool, rep_type, source, name)
            .await
    }
    async fn volume_replicate_range(
        &mut self,
        rep_type: VolumeReplicateType,
        source: &Volume,
        dest: &Volume,
        ranges: &[BlockRange],
    ) -> Result<Outcome<()>> {
        self.upstream()?
            .volume_replicate_range(rep_type, source, dest, ranges)
            .await
    }
    async fn volume_replicate_range_block_size(&mut self, system: &System) -> Result<u32> {
        self.upstream()?.volume_replicate_range_block_size(system).await
    }
    async fn volume_resize(&mut self, volume: &Volume, new_size_bytes: u64) -> Result<Outcome<Volume>> {
        self.upstream()?.volume_resize(volume, new_size_bytes).await
    }
    async fn volume_enable(&mut self, volume: &Volume) -> Result<()> {
        self.upstream()?.volume_enable(volume).await
    }
    async fn volume_disable(&mut self, volume: &Volume) -> Result<()> {
        self.upstream()?.volume_disable(volume).await
    }
    async fn volume_mask(&mut self, volume: &Volume, access_group: &AccessGroup) -> Result<()> {
        self.upstream()?.volume_mask(volume, access_group).await
    }
    async fn volume_unmask(&mut self, volume: &Volume, access_group: &AccessGroup) -> Result<()> {
        self.upstream()?.volume_unmask(volume, access_group).await
    }
    async fn volumes_accessible_by_access_group(&mut self, access_group: &AccessGroup) -> Result<Vec<Volume>> {
        self.upstream()?
            .volumes_accessible_by_access_group(access_group)
            .await
    }
    async fn access_groups_granted_to_volume(&mut self, volume: &Volume) -> Result<Vec<AccessGroup>> {
        self.upstream()?.access_groups_granted_to_volume(volume).await
    }
    async fn volume_child_dependency(&mut self, volume: &Volume) -> Result<bool> {
        self.upstream()?.volume_child_dependency(volume).await
    }
    async fn volume_child_dependency_rm(&mut self, volume: &Volume) -> Result<Outcome<()>> {
        self.upstream()?.volume_child_dependency_rm(volume).await
    }
    async fn access_groups(&mut self) -> Result<Vec<AccessGroup>> {
        self.upstream()?.access_groups().await
    }
    async fn access_group_create(
        &mut self,
        name: &str,
        init_id: &str,
        init_type: InitiatorType,
        system: &System,
    ) -> Result<AccessGroup> {
        self.upstream()?
            .access_group_create(name, init_id, init_type, system)
            .await
    }
    async fn access_group_delete(&mut self, access_group: &AccessGroup) -> Result<()> {
        self.upstream()?.access_group_delete(access_group).await
    }
    async fn access_group_initiator_add(
        &mut self,
        access_group: &AccessGroup,
        init_id: &str,
        init_type: InitiatorType,
    ) -> Result<AccessGroup> {
        self.upstream()?
            .access_group_initiator_add(access_group, init_id, init_type)
            .await
    }
    async fn access_group_initiator_delete(
        &mut self,
        access_group: &AccessGroup,
        init_id: &str,
        init_type: InitiatorType,
    ) -> Result<AccessGroup> {
        self.upstream()?
            .access_group_initiator_delete(access_group, init_id, init_type)
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
        self.upstream()?
            .iscsi_chap_auth(init_id, in_user, in_password, out_user, out_password)
            .await
    }
    async fn target_ports(&mut self) -> Result<Vec<TargetPort>> {
        self.upstream()?.target_ports().await
    }
    async fn volume_ident_led_on(&mut self, volume: &Volume) -> Result<()> {
        self.upstream()?.volume_ident_led_on(volume).await
    }
    async fn volume_ident_led_off(&mut self, volume: &Volume) -> Result<()> {
        self.upstream()?.volume_ident_led_off(volume).await
    }

    // ─────────────── file systems ───────────────
    async fn file_systems(&mut self, search: Option<&Search>) -> Result<Vec<FileSystem>> {
        self.upstream()?.file_systems(search).await
    }
    async fn fs_create(&mut self, pool: &Pool, name: &str, size_bytes: u64) -> Result<Outcome<FileSystem>> {
        self.upstream()?.fs_create(pool, name, size_bytes).await
    }
    async fn fs_delete(&mut self, fs: &FileSystem) -> Result<Outcome<()>> {
        self.upstream()?.fs_delete(fs).await
    }
    async fn fs_resize(&mut self, fs: &FileSystem, new_size_bytes: u64) -> Result<Outcome<FileSystem>> {
        self.upstream()?.fs_resize(fs, new_size_bytes).await
    }
    async fn fs_clone(
        &mut self,
        source: &FileSystem,
        dest_name: &str,
        snapshot: Option<&FileSystemSnapShot>,
    ) -> Result<Outcome<FileSystem>> {
        self.upstream()?.fs_clone(source, dest_name, snapshot).await
    }
    async fn fs_file_clone(
        &mut self,
        fs: &FileSystem,
        src_file_name: &str,
        dest_file_name: &str,
        snapshot: Option<&FileSystemSnapShot>,
    ) -> Result<Outcome<()>> {
        self.upstream()?
            .fs_file_clone(fs, src_file_name, dest_file_name, snapshot)
            .await
    }
    async fn fs_snapshot_create(&mut self, fs: &FileSystem, name: &str) -> Result<Outcome<FileSystemSnapShot>> {
        self.upstream()?.fs_snapshot_create(fs, name).await
    }
    async fn fs_snapshot_delete(&mut self, fs: &FileSystem, snapshot: &FileSystemSnapShot) -> Result<Outcome<()>> {
        self.upstream()?.fs_snapshot_delete(fs, snapshot).await
    }
    async fn fs_snapshots(&mut self, fs: &FileSystem) -> Result<Vec<FileSystemSnapShot>> {
        self.upstream()?.fs_snapshots(fs).await
    }
    async fn fs_snapshot_restore(
        &mut self,
        fs: &FileSystem,
        snapshot: &FileSystemSnapShot,
        all_files: bool,
        files: &[String],
        restore_files: &[String],
    ) -> Result<Outcome<()>> {
        self.upstream()?
            .fs_snapshot_restore(fs, snapshot, all_files, files, restore_files)
            .await
    }
    async fn fs_child_dependency(&mut self, fs: &FileSystem, files: &[String]) -> Result<bool> {
        self.upstream()?.fs_child_dependency(fs, files).await
    }
    async fn fs_child_dependency_rm(&mut self, fs: &FileSystem, files: &[String]) -> Result<Outcome<()>> {
        self.upstream()?.fs_child_dependency_rm(fs, files).await
    }

    // ─────────────── nfs ───────────────
    async fn exports(&mut self, search: Option<&Search>) -> Result<Vec<NfsExport>> {
        self.upstream()?.exports(search).await
    }
    async fn export_fs(
        &mut self,
        fs_id: &str,
        export_path: Option<&str>,
        access: &NfsAccess,
        auth_type: Option<&str>,
        options: Option<&str>,
    ) -> Result<Outcome<NfsExport>> {
        self.upstream()?
            .export_fs(fs_id, export_path, access, auth_type, options)
            .await
    }
    async fn export_remove(&mut self, export: &NfsExport) -> Result<()> {
        self.upstream()?.export_remove(export).await
    }
    async fn export_auth(&mut self) -> Result<Vec<String>> {
        self.upstream()?.export_auth().await
    }

    // ─────────────── hba / raid ───────────────
    async fn volume_raid_create(
        &mut self,
        name: &str,
        raid_type: RaidType,
        disks: &[Disk],
        strip_size: u32,
    ) -> Result<Volume> {
        self.upstream()?
            .volume_raid_create(name, raid_type, disks, strip_size)
            .await
    }
    async fn volume_raid_create_cap_get(&mut self, system: &System) -> Result<SupportedRaidCapability> {
        self.upstream()?.volume_raid_create_cap_get(system).await
    }
    async fn pool_member_info(&mut self, pool: &Pool) -> Result<PoolMemberInfo> {
        self.upstream()?.pool_member_info(pool).await
    }
    async fn volume_raid_info(&mut self, volume: &Volume) -> Result<VolumeRaidInfo> {
        self.upstream()?.volume_raid_info(volume).await
    }
    async fn batteries(&mut self) -> Result<Vec<Battery>> {
        self.upstream()?.batteries().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsm_plugin::error::ErrorCode;
    use lsm_plugin::plugin_test_util::{MockBackend, MockConnector};

    fn register(uri: &str, timeout: u32) -> PluginRegister {
        PluginRegister {
            uri: uri.into(),
            password: String::new(),
            timeout,
            flags: 0,
        }
    }

    async fn registered() -> (ForwardPlugin<MockConnector>, MockConnector) {
        let connector = MockConnector::new(MockBackend::new());
        let mut plugin = ForwardPlugin::new(connector.clone());
        plugin.register(register("tank://?forward=mock", 30_000)).await.unwrap();
        (plugin, connector)
    }

    #[test]
    fn every_management_method_is_declared() {
        let plugin = ForwardPlugin::new(MockConnector::default());
        assert_eq!(plugin.methods().len(), Method::iter().count() - 5);
        assert!(plugin.methods().contains(&Method::Fs));
        assert!(plugin.methods().contains(&Method::Batteries));
        assert!(!plugin.methods().contains(&Method::PluginRegister));
    }

    #[tokio::test]
    async fn register_connects_to_the_resolved_backend() {
        let (plugin, connector) = registered().await;
        assert!(plugin.is_registered());
        assert_eq!(plugin.time_out_get(), 30_000);
        assert_eq!(connector.connects().await, vec![("mock://".to_string(), 30_000)]);
    }

    #[tokio::test]
    async fn malformed_uri_never_connects() {
        let connector = MockConnector::default();
        let mut plugin = ForwardPlugin::new(connector.clone());
        let err = plugin.register(register("tank://?backend=mock", 1)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
        assert!(err.message.contains("backend=mock"));
        assert!(!plugin.is_registered());
        assert!(connector.connects().await.is_empty());
    }

    #[tokio::test]
    async fn connect_failure_is_returned_verbatim() {
        let connector = MockConnector::default();
        connector
            .refuse_next(LsmError::new(ErrorCode::PluginNotExist, "no such plugin"))
            .await;
        let mut plugin = ForwardPlugin::new(connector);
        let err = plugin.register(register("tank://?forward=gone", 1)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::PluginNotExist);
        assert_eq!(err.message, "no such plugin");
        assert!(!plugin.is_registered());
    }

    #[tokio::test]
    async fn reregistering_closes_the_old_connection() {
        let (mut plugin, connector) = registered().await;
        plugin.register(register("tank://?forward=other", 5)).await.unwrap();
        assert!(connector.backend().is_closed().await);
        assert_eq!(connector.connects().await.len(), 2);
        assert_eq!(plugin.time_out_get(), 5);
    }

    #[tokio::test]
    async fn unregister_closes_and_returns_to_unregistered() {
        let (mut plugin, connector) = registered().await;
        plugin.unregister().await.unwrap();
        assert!(!plugin.is_registered());
        assert!(connector.backend().is_closed().await);

        let err = plugin.unregister().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::LibBug);
        let err = plugin.disks().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::LibBug);
    }

    #[tokio::test]
    async fn close_error_is_returned_verbatim() {
        let (mut plugin, connector) = registered().await;
        connector
            .backend()
            .fail_next(LsmError::new(ErrorCode::TransportCommunication, "broken pipe"))
            .await;

        let err = plugin.unregister().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TransportCommunication);
        assert_eq!(err.message, "broken pipe");

        // the handle is gone either way
        assert!(!plugin.is_registered());
        assert!(!connector.backend().is_closed().await);
        assert_eq!(plugin.unregister().await.unwrap_err().code, ErrorCode::LibBug);
    }

    #[tokio::test]
    async fn timeout_is_local_and_needs_no_connection() {
        let connector = MockConnector::default();
        let mut plugin = ForwardPlugin::new(connector.clone());
        for v in [0, 1, 30_000, u32::MAX] {
            plugin.time_out_set(v).unwrap();
            assert_eq!(plugin.time_out_get(), v);
        }
        assert!(connector.connects().await.is_empty());
        assert!(connector.backend().calls().await.is_empty());
    }

    #[tokio::test]
    async fn search_is_forwarded_unchanged() {
        let (mut plugin, _connector) = registered().await;
        let pool = MockBackend::pool();
        plugin
            .volume_create(&pool, "v1", 4096, VolumeProvisionType::Thin)
            .await
            .unwrap();

        assert_eq!(plugin.volumes(None).await.unwrap().len(), 1);
        let hit = plugin.volumes(Some(&Search::new("pool_id", "POOL-1"))).await.unwrap();
        assert_eq!(hit.len(), 1);
        let miss = plugin.volumes(Some(&Search::new("pool_id", "POOL-9"))).await.unwrap();
        assert!(miss.is_empty());
    }

    #[tokio::test]
    async fn outcome_is_passed_through() {
        let (mut plugin, connector) = registered().await;
        let pool = MockBackend::pool();

        let done = plugin
            .volume_create(&pool, "v1", 1_048_576, VolumeProvisionType::Thin)
            .await
            .unwrap();
        assert!(done.job_id().is_none());
        assert_eq!(done.done().unwrap().size_bytes(), 1_048_576);

        connector.backend().start_job_next("JOB-1").await;
        let job = plugin
            .volume_create(&pool, "v2", 1_048_576, VolumeProvisionType::Thin)
            .await
            .unwrap();
        assert_eq!(job, Outcome::Job("JOB-1".into()));
    }

    #[tokio::test]
    async fn upstream_errors_are_not_rewritten() {
        let (mut plugin, connector) = registered().await;
        let err = LsmError::new(ErrorCode::NotFoundJob, "job J-9 not found")
            .with_data(serde_json::json!({"job": "J-9"}));
        connector.backend().fail_next(err.clone()).await;

        let got = plugin.job_free("J-9").await.unwrap_err();
        assert_eq!(got.code, err.code);
        assert_eq!(got.message, err.message);
        assert_eq!(got.data, err.data);

        // unimplemented upstream calls surface the backend's NoSupport
        let got = plugin.batteries().await.unwrap_err();
        assert_eq!(got.code, ErrorCode::NoSupport);
    }
}
