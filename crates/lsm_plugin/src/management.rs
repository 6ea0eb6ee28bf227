//! The storage management capability interface.
//!
//! `Management` lists every storage operation a plugin can serve. The plugin
//! runtime dispatches decoded requests onto it, the IPC [`Client`] implements
//! it by sending requests to a running plugin, and adapters implement it by
//! delegating to something else. Every operation defaults to `NoSupport`, so
//! an implementation only has to provide what it actually serves.
//!
//! [`Client`]: crate::client::Client

use async_trait::async_trait;

use crate::error::{LsmError, Result};
use crate::jsonrpc::Method;
use crate::message::*;

#[async_trait]
pub trait Management: Send {
    // -------------------------------------------------------------------------
    // Management
    // -------------------------------------------------------------------------
    async fn capabilities(&mut self, _system: &System) -> Result<Capabilities> {
        Err(LsmError::no_support(Method::Capabilities))
    }
    /// Status, progress and (once complete) the produced record of a job.
    async fn job_status(&mut self, _job_id: &str) -> Result<JobInfo> {
        Err(LsmError::no_support(Method::JobStatus))
    }
    async fn job_free(&mut self, _job_id: &str) -> Result<()> {
        Err(LsmError::no_support(Method::JobFree))
    }
    async fn systems(&mut self, _search: Option<&Search>) -> Result<Vec<System>> {
        Err(LsmError::no_support(Method::Systems))
    }
    async fn pools(&mut self, _search: Option<&Search>) -> Result<Vec<Pool>> {
        Err(LsmError::no_support(Method::Pools))
    }

    // -------------------------------------------------------------------------
    // Block
    // -------------------------------------------------------------------------
    async fn volumes(&mut self, _search: Option<&Search>) -> Result<Vec<Volume>> {
        Err(LsmError::no_support(Method::Volumes))
    }
    async fn volume_create(
        &mut self,
        _pool: &Pool,
        _name: &str,
        _size_bytes: u64,
        _provisioning: VolumeProvisionType,
    ) -> Result<Outcome<Volume>> {
        Err(LsmError::no_support(Method::VolumeCreate))
    }
    async fn volume_delete(&mut self, _volume: &Volume) -> Result<Outcome<()>> {
        Err(LsmError::no_support(Method::VolumeDelete))
    }
    async fn disks(&mut self) -> Result<Vec<Disk>> {
        Err(LsmError::no_support(Method::Disks))
    }
    async fn volume_replicate(
        &mut self,
        _pool: Option<&Pool>,
        _rep_type: VolumeReplicateType,
        _source: &Volume,
        _name: &str,
    ) -> Result<Outcome<Volume>> {
        Err(LsmError::no_support(Method::VolumeReplicate))
    }
    async fn volume_replicate_range(
        &mut self,
        _rep_type: VolumeReplicateType,
        _source: &Volume,
        _dest: &Volume,
        _ranges: &[BlockRange],
    ) -> Result<Outcome<()>> {
        Err(LsmError::no_support(Method::VolumeReplicateRange))
    }
    async fn volume_replicate_range_block_size(&mut self, _system: &System) -> Result<u32> {
        Err(LsmError::no_support(Method::VolumeReplicateRangeBlockSize))
    }
    async fn volume_resize(&mut self, _volume: &Volume, _new_size_bytes: u64) -> Result<Outcome<Volume>> {
        Err(LsmError::no_support(Method::VolumeResize))
    }
    async fn volume_enable(&mut self, _volume: &Volume) -> Result<()> {
        Err(LsmError::no_support(Method::VolumeEnable))
    }
    async fn volume_disable(&mut self, _volume: &Volume) -> Result<()> {
        Err(LsmError::no_support(Method::VolumeDisable))
    }
    async fn volume_mask(&mut self, _volume: &Volume, _access_group: &AccessGroup) -> Result<()> {
        Err(LsmError::no_support(Method::VolumeMask))
    }
    async fn volume_unmask(&mut self, _volume: &Volume, _access_group: &AccessGroup) -> Result<()> {
        Err(LsmError::no_support(Method::VolumeUnmask))
    }
    async fn volumes_accessible_by_access_group(&mut self, _access_group: &AccessGroup) -> Result<Vec<Volume>> {
        Err(LsmError::no_support(Method::VolumesAccessibleByAccessGroup))
    }
    async fn access_groups_granted_to_volume(&mut self, _volume: &Volume) -> Result<Vec<AccessGroup>> {
        Err(LsmError::no_support(Method::AccessGroupsGrantedToVolume))
    }
    async fn volume_child_dependency(&mut self, _volume: &Volume) -> Result<bool> {
        Err(LsmError::no_support(Method::VolumeChildDependency))
    }
    async fn volume_child_dependency_rm(&mut self, _volume: &Volume) -> Result<Outcome<()>> {
        Err(LsmError::no_support(Method::VolumeChildDependencyRm))
    }
    async fn access_groups(&mut self) -> Result<Vec<AccessGroup>> {
        Err(LsmError::no_support(Method::AccessGroups))
    }
    async fn access_group_create(
        &mut self,
        _name: &str,
        _init_id: &str,
        _init_type: InitiatorType,
        _system: &System,
    ) -> Result<AccessGroup> {
        Err(LsmError::no_support(Method::AccessGroupCreate))
    }
    async fn access_group_delete(&mut self, _access_group: &AccessGroup) -> Result<()> {
        Err(LsmError::no_support(Method::AccessGroupDelete))
    }
    async fn access_group_initiator_add(
        &mut self,
        _access_group: &AccessGroup,
        _init_id: &str,
        _init_type: InitiatorType,
    ) -> Result<AccessGroup> {
        Err(LsmError::no_support(Method::AccessGroupInitiatorAdd))
    }
    async fn access_group_initiator_delete(
        &mut self,
        _access_group: &AccessGroup,
        _init_id: &str,
        _init_type: InitiatorType,
    ) -> Result<AccessGroup> {
        Err(LsmError::no_support(Method::AccessGroupInitiatorDelete))
    }
    /// Sets the iSCSI CHAP credentials for an initiator.
    async fn iscsi_chap_auth(
        &mut self,
        _init_id: &str,
        _in_user: Option<&str>,
        _in_password: Option<&str>,
        _out_user: Option<&str>,
        _out_password: Option<&str>,
    ) -> Result<()> {
        Err(LsmError::no_support(Method::IscsiChapAuth))
    }
    async fn target_ports(&mut self) -> Result<Vec<TargetPort>> {
        Err(LsmError::no_support(Method::TargetPorts))
    }
    async fn volume_ident_led_on(&mut self, _volume: &Volume) -> Result<()> {
        Err(LsmError::no_support(Method::VolumeIdentLedOn))
    }
    async fn volume_ident_led_off(&mut self, _volume: &Volume) -> Result<()> {
        Err(LsmError::no_support(Method::VolumeIdentLedOff))
    }

    // -------------------------------------------------------------------------
    // File systems
    // -------------------------------------------------------------------------
    async fn file_systems(&mut self, _search: Option<&Search>) -> Result<Vec<FileSystem>> {
        Err(LsmError::no_support(Method::Fs))
    }
    async fn fs_create(&mut self, _pool: &Pool, _name: &str, _size_bytes: u64) -> Result<Outcome<FileSystem>> {
        Err(LsmError::no_support(Method::FsCreate))
    }
    async fn fs_delete(&mut self, _fs: &FileSystem) -> Result<Outcome<()>> {
        Err(LsmError::no_support(Method::FsDelete))
    }
    async fn fs_resize(&mut self, _fs: &FileSystem, _new_size_bytes: u64) -> Result<Outcome<FileSystem>> {
        Err(LsmError::no_support(Method::FsResize))
    }
    async fn fs_clone(
        &mut self,
        _source: &FileSystem,
        _dest_name: &str,
        _snapshot: Option<&FileSystemSnapShot>,
    ) -> Result<Outcome<FileSystem>> {
        Err(LsmError::no_support(Method::FsClone))
    }
    async fn fs_file_clone(
        &mut self,
        _fs: &FileSystem,
        _src_file_name: &str,
        _dest_file_name: &str,
        _snapshot: Option<&FileSystemSnapShot>,
    ) -> Result<Outcome<()>> {
        Err(LsmError::no_support(Method::FsFileClone))
    }
    async fn fs_snapshot_create(&mut self, _fs: &FileSystem, _name: &str) -> Result<Outcome<FileSystemSnapShot>> {
        Err(LsmError::no_support(Method::FsSnapshotCreate))
    }
    async fn fs_snapshot_delete(&mut self, _fs: &FileSystem, _snapshot: &FileSystemSnapShot) -> Result<Outcome<()>> {
        Err(LsmError::no_support(Method::FsSnapshotDelete))
    }
    async fn fs_snapshots(&mut self, _fs: &FileSystem) -> Result<Vec<FileSystemSnapShot>> {
        Err(LsmError::no_support(Method::FsSnapshots))
    }
    async fn fs_snapshot_restore(
        &mut self,
        _fs: &FileSystem,
        _snapshot: &FileSystemSnapShot,
        _all_files: bool,
        _files: &[String],
        _restore_files: &[String],
    ) -> Result<Outcome<()>> {
        Err(LsmError::no_support(Method::FsSnapshotRestore))
    }
    async fn fs_child_dependency(&mut self, _fs: &FileSystem, _files: &[String]) -> Result<bool> {
        Err(LsmError::no_support(Method::FsChildDependency))
    }
    async fn fs_child_dependency_rm(&mut self, _fs: &FileSystem, _files: &[String]) -> Result<Outcome<()>> {
        Err(LsmError::no_support(Method::FsChildDependencyRm))
    }

    // -------------------------------------------------------------------------
    // NFS
    // -------------------------------------------------------------------------
    async fn exports(&mut self, _search: Option<&Search>) -> Result<Vec<NfsExport>> {
        Err(LsmError::no_support(Method::Exports))
    }
    async fn export_fs(
        &mut self,
        _fs_id: &str,
        _export_path: Option<&str>,
        _access: &NfsAccess,
        _auth_type: Option<&str>,
        _options: Option<&str>,
    ) -> Result<Outcome<NfsExport>> {
        Err(LsmError::no_support(Method::ExportFs))
    }
    async fn export_remove(&mut self, _export: &NfsExport) -> Result<()> {
        Err(LsmError::no_support(Method::ExportRemove))
    }
    async fn export_auth(&mut self) -> Result<Vec<String>> {
        Err(LsmError::no_support(Method::ExportAuth))
    }

    // -------------------------------------------------------------------------
    // HBA / RAID
    // -------------------------------------------------------------------------
    async fn volume_raid_create(
        &mut self,
        _name: &str,
        _raid_type: RaidType,
        _disks: &[Disk],
        _strip_size: u32,
    ) -> Result<Volume> {
        Err(LsmError::no_support(Method::VolumeRaidCreate))
    }
    async fn volume_raid_create_cap_get(&mut self, _system: &System) -> Result<SupportedRaidCapability> {
        Err(LsmError::no_support(Method::VolumeRaidCreateCapGet))
    }
    async fn pool_member_info(&mut self, _pool: &Pool) -> Result<PoolMemberInfo> {
        Err(LsmError::no_support(Method::PoolMemberInfo))
    }
    async fn volume_raid_info(&mut self, _volume: &Volume) -> Result<VolumeRaidInfo> {
        Err(LsmError::no_support(Method::VolumeRaidInfo))
    }
    async fn batteries(&mut self) -> Result<Vec<Battery>> {
        Err(LsmError::no_support(Method::Batteries))
    }
}
