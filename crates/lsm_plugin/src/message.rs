//! Domain records exchanged with management plugins.
//!
//! Records that travel as objects carry a `class` discriminator on the
//! wire; records that travel as positional arrays (pool member info, RAID
//! info, job status) convert through tuples.

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Value, json};

use crate::error::{ErrorCode, LsmError};

pub type JobId = String;

macro_rules! int_enum {
    ($(#[$meta:meta])* $name:ident, unknown = $unknown:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "i64", into = "i64")]
        pub enum $name {
            $($variant),+
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                match v {
                    $($value => $name::$variant,)+
                    _ => $name::$unknown,
                }
            }
        }

        impl From<$name> for i64 {
            fn from(v: $name) -> Self {
                match v {
                    $($name::$variant => $value,)+
                }
            }
        }
    };
}

int_enum!(
    JobStatus, unknown = Error {
        InProgress = 1,
        Complete = 2,
        Error = 3,
    }
);

int_enum!(
    VolumeProvisionType, unknown = Unknown {
        Unknown = -1,
        Thin = 1,
        Full = 2,
        Default = 3,
    }
);

int_enum!(
    VolumeReplicateType, unknown = Unknown {
        Unknown = -1,
        Clone = 2,
        Copy = 3,
        MirrorSync = 4,
        MirrorAsync = 5,
    }
);

int_enum!(
    InitiatorType, unknown = Unknown {
        Unknown = 0,
        Other = 1,
        Wwpn = 2,
        IscsiIqn = 5,
        Mixed = 7,
    }
);

int_enum!(
    RaidType, unknown = Unknown {
        Unknown = -1,
        Raid0 = 0,
        Raid1 = 1,
        Raid3 = 3,
        Raid4 = 4,
        Raid5 = 5,
        Raid6 = 6,
        Raid10 = 10,
        Raid15 = 15,
        Raid16 = 16,
        Jbod = 20,
        Mixed = 21,
        Other = 22,
        Raid50 = 50,
        Raid51 = 51,
        Raid60 = 60,
        Raid61 = 61,
    }
);

int_enum!(
    /// What a pool is assembled from.
    MemberType, unknown = Unknown {
        Unknown = 0,
        Other = 1,
        Disk = 2,
        Pool = 3,
    }
);

// -----------------------------------------------------------------------------
// Object records
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class")]
pub struct System {
    pub id: String,
    pub name: String,
    pub status: u32,
    #[serde(default)]
    pub status_info: String,
    #[serde(default)]
    pub plugin_data: Option<String>,
    #[serde(default)]
    pub fw_version: String,
    #[serde(default = "minus_one")]
    pub mode: i32,
    #[serde(default = "minus_one")]
    pub read_cache_pct: i32,
}

fn minus_one() -> i32 {
    -1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class")]
pub struct Pool {
    pub id: String,
    pub name: String,
    pub element_type: u64,
    pub unsupported_actions: u64,
    pub total_space: u64,
    pub free_space: u64,
    pub status: u64,
    #[serde(default)]
    pub status_info: String,
    pub system_id: String,
    #[serde(default)]
    pub plugin_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class")]
pub struct Volume {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub vpd83: String,
    pub block_size: u64,
    pub num_of_blocks: u64,
    pub admin_state: i32,
    pub system_id: String,
    pub pool_id: String,
    #[serde(default)]
    pub plugin_data: Option<String>,
}

impl Volume {
    pub fn size_bytes(&self) -> u64 {
        self.block_size.saturating_mul(self.num_of_blocks)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class")]
pub struct Disk {
    pub id: String,
    pub name: String,
    pub disk_type: i32,
    pub block_size: u64,
    pub num_of_blocks: u64,
    pub status: u64,
    pub system_id: String,
    #[serde(default)]
    pub plugin_data: Option<String>,
    #[serde(default)]
    pub vpd83: String,
    #[serde(default)]
    pub location: String,
    #[serde(default = "minus_one")]
    pub rpm: i32,
    #[serde(default = "minus_one")]
    pub link_type: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class")]
pub struct FileSystem {
    pub id: String,
    pub name: String,
    pub total_space: u64,
    pub free_space: u64,
    pub pool_id: String,
    pub system_id: String,
    #[serde(default)]
    pub plugin_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", rename = "FsSnapshot")]
pub struct FileSystemSnapShot {
    pub id: String,
    pub name: String,
    /// Creation time, seconds since the epoch.
    pub ts: u64,
    #[serde(default)]
    pub plugin_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class")]
pub struct NfsExport {
    pub id: String,
    pub fs_id: String,
    pub export_path: String,
    pub auth: String,
    pub root: Vec<String>,
    pub rw: Vec<String>,
    pub ro: Vec<String>,
    pub anonuid: i64,
    pub anongid: i64,
    pub options: String,
    #[serde(default)]
    pub plugin_data: Option<String>,
}

/// Host access lists for a new NFS export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NfsAccess {
    pub root: Vec<String>,
    pub rw: Vec<String>,
    pub ro: Vec<String>,
    pub anon_uid: i64,
    pub anon_gid: i64,
}

/// Value meaning "no anonymous uid/gid mapping".
pub const ANON_UID_GID_NA: i64 = -1;

impl Default for NfsAccess {
    fn default() -> Self {
        Self {
            root: vec![],
            rw: vec![],
            ro: vec![],
            anon_uid: ANON_UID_GID_NA,
            anon_gid: ANON_UID_GID_NA,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class")]
pub struct AccessGroup {
    pub id: String,
    pub name: String,
    pub init_ids: Vec<String>,
    pub init_type: InitiatorType,
    pub system_id: String,
    #[serde(default)]
    pub plugin_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class")]
pub struct TargetPort {
    pub id: String,
    pub port_type: i32,
    pub service_address: String,
    pub network_address: String,
    pub physical_address: String,
    pub physical_name: String,
    pub system_id: String,
    #[serde(default)]
    pub plugin_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class")]
pub struct Battery {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub battery_type: i32,
    pub status: u64,
    pub system_id: String,
    #[serde(default)]
    pub plugin_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class")]
pub struct BlockRange {
    pub src_block: u64,
    pub dst_block: u64,
    pub block_count: u64,
}

/// Capability bitmap as reported by a plugin: two hex digits per capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class")]
pub struct Capabilities {
    pub cap: String,
}

// -----------------------------------------------------------------------------
// Positional records
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(RaidType, MemberType, Vec<String>)", into = "(RaidType, MemberType, Vec<String>)")]
pub struct PoolMemberInfo {
    pub raid_type: RaidType,
    pub member_type: MemberType,
    pub member_ids: Vec<String>,
}

impl From<(RaidType, MemberType, Vec<String>)> for PoolMemberInfo {
    fn from((raid_type, member_type, member_ids): (RaidType, MemberType, Vec<String>)) -> Self {
        Self {
            raid_type,
            member_type,
            member_ids,
        }
    }
}

impl From<PoolMemberInfo> for (RaidType, MemberType, Vec<String>) {
    fn from(p: PoolMemberInfo) -> Self {
        (p.raid_type, p.member_type, p.member_ids)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(RaidType, u32, u32, u32, u32)", into = "(RaidType, u32, u32, u32, u32)")]
pub struct VolumeRaidInfo {
    pub raid_type: RaidType,
    pub strip_size: u32,
    pub disk_count: u32,
    pub min_io_size: u32,
    pub opt_io_size: u32,
}

impl From<(RaidType, u32, u32, u32, u32)> for VolumeRaidInfo {
    fn from((raid_type, strip_size, disk_count, min_io_size, opt_io_size): (RaidType, u32, u32, u32, u32)) -> Self {
        Self {
            raid_type,
            strip_size,
            disk_count,
            min_io_size,
            opt_io_size,
        }
    }
}

impl From<VolumeRaidInfo> for (RaidType, u32, u32, u32, u32) {
    fn from(r: VolumeRaidInfo) -> Self {
        (r.raid_type, r.strip_size, r.disk_count, r.min_io_size, r.opt_io_size)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(Vec<RaidType>, Vec<u32>)", into = "(Vec<RaidType>, Vec<u32>)")]
pub struct SupportedRaidCapability {
    pub raid_types: Vec<RaidType>,
    pub strip_sizes: Vec<u32>,
}

impl From<(Vec<RaidType>, Vec<u32>)> for SupportedRaidCapability {
    fn from((raid_types, strip_sizes): (Vec<RaidType>, Vec<u32>)) -> Self {
        Self { raid_types, strip_sizes }
    }
}

impl From<SupportedRaidCapability> for (Vec<RaidType>, Vec<u32>) {
    fn from(c: SupportedRaidCapability) -> Self {
        (c.raid_types, c.strip_sizes)
    }
}

// -----------------------------------------------------------------------------
// Jobs
// -----------------------------------------------------------------------------

/// The record a finished job produced. Which variant depends on the
/// operation that started the job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobItem {
    Volume(Volume),
    FileSystem(FileSystem),
    FsSnapshot(FileSystemSnapShot),
    AccessGroup(AccessGroup),
}

const JOB_ITEM_CLASSES: &[&str] = &["Volume", "FileSystem", "FsSnapshot", "AccessGroup"];

impl Serialize for JobItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            JobItem::Volume(v) => v.serialize(serializer),
            JobItem::FileSystem(fs) => fs.serialize(serializer),
            JobItem::FsSnapshot(ss) => ss.serialize(serializer),
            JobItem::AccessGroup(ag) => ag.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for JobItem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let class = value
            .get("class")
            .and_then(Value::as_str)
            .ok_or_else(|| <D::Error as de::Error>::missing_field("class"))?
            .to_owned();
        let item = match class.as_str() {
            "Volume" => serde_json::from_value(value).map(JobItem::Volume),
            "FileSystem" => serde_json::from_value(value).map(JobItem::FileSystem),
            "FsSnapshot" => serde_json::from_value(value).map(JobItem::FsSnapshot),
            "AccessGroup" => serde_json::from_value(value).map(JobItem::AccessGroup),
            other => return Err(<D::Error as de::Error>::unknown_variant(other, JOB_ITEM_CLASSES)),
        };
        item.map_err(<D::Error as de::Error>::custom)
    }
}

/// Progress of an asynchronous operation. Travels as `[status, percent, item]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(JobStatus, u8, Option<JobItem>)", into = "(JobStatus, u8, Option<JobItem>)")]
pub struct JobInfo {
    pub status: JobStatus,
    pub percent: u8,
    pub item: Option<JobItem>,
}

impl From<(JobStatus, u8, Option<JobItem>)> for JobInfo {
    fn from((status, percent, item): (JobStatus, u8, Option<JobItem>)) -> Self {
        Self { status, percent, item }
    }
}

impl From<JobInfo> for (JobStatus, u8, Option<JobItem>) {
    fn from(j: JobInfo) -> Self {
        (j.status, j.percent, j.item)
    }
}

/// Either the finished result or the handle of the job producing it.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Done(T),
    Job(JobId),
}

impl<T> Outcome<T> {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Outcome::Job(id) => Some(id),
            Outcome::Done(_) => None,
        }
    }

    pub fn done(self) -> Option<T> {
        match self {
            Outcome::Done(v) => Some(v),
            Outcome::Job(_) => None,
        }
    }
}

impl<T: Serialize> Outcome<T> {
    /// `[job, null]` or `[null, item]`.
    pub fn to_pair_value(&self) -> Result<Value, LsmError> {
        Ok(match self {
            Outcome::Job(id) => json!([id, null]),
            Outcome::Done(item) => json!([null, serde_json::to_value(item)?]),
        })
    }

    /// The bare item object, or the job id string.
    pub fn to_item_or_job_value(&self) -> Result<Value, LsmError> {
        Ok(match self {
            Outcome::Job(id) => Value::String(id.clone()),
            Outcome::Done(item) => serde_json::to_value(item)?,
        })
    }
}

impl<T: DeserializeOwned> Outcome<T> {
    pub fn from_pair_value(value: Value) -> Result<Self, LsmError> {
        let (job, item): (Option<JobId>, Option<Value>) = serde_json::from_value(value)?;
        match (job, item) {
            (Some(id), _) => Ok(Outcome::Job(id)),
            (None, Some(item)) if !item.is_null() => Ok(Outcome::Done(serde_json::from_value(item)?)),
            _ => Err(LsmError::new(
                ErrorCode::PluginBug,
                "plugin returned neither a job nor a result",
            )),
        }
    }

    pub fn from_item_or_job_value(value: Value) -> Result<Self, LsmError> {
        match value {
            Value::String(id) => Ok(Outcome::Job(id)),
            Value::Null => Err(LsmError::new(
                ErrorCode::PluginBug,
                "plugin returned neither a job nor a result",
            )),
            item => Ok(Outcome::Done(serde_json::from_value(item)?)),
        }
    }
}

impl Outcome<()> {
    /// Job-only operations answer with the job id or `null`.
    pub fn to_job_value(&self) -> Value {
        match self {
            Outcome::Job(id) => Value::String(id.clone()),
            Outcome::Done(()) => Value::Null,
        }
    }

    pub fn from_job_value(value: Value) -> Result<Self, LsmError> {
        match value {
            Value::String(id) => Ok(Outcome::Job(id)),
            Value::Null => Ok(Outcome::Done(())),
            other => Err(LsmError::new(
                ErrorCode::PluginBug,
                format!("expected a job id or null, got {other}"),
            )),
        }
    }
}

// -----------------------------------------------------------------------------
// Requests
// -----------------------------------------------------------------------------

/// A `(key, value)` filter for listing operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Search {
    pub key: String,
    pub value: String,
}

impl Search {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Parameters of `plugin_register`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginRegister {
    pub uri: String,
    #[serde(default)]
    pub password: String,
    /// Milliseconds.
    pub timeout: u32,
    #[serde(default)]
    pub flags: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct PluginInfo {
    pub description: String,
    pub version: String,
}

impl PluginInfo {
    pub fn new(description: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            version: version.into(),
        }
    }
}

impl From<(String, String)> for PluginInfo {
    fn from((description, version): (String, String)) -> Self {
        Self { description, version }
    }
}

impl From<PluginInfo> for (String, String) {
    fn from(p: PluginInfo) -> Self {
        (p.description, p.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume() -> Volume {
        Volume {
            id: "VOL-1".into(),
            name: "v1".into(),
            vpd83: "600508b1001c".into(),
            block_size: 512,
            num_of_blocks: 2048,
            admin_state: 1,
            system_id: "sys0".into(),
            pool_id: "POOL-1".into(),
            plugin_data: None,
        }
    }

    #[test]
    fn records_carry_their_class() {
        let v = serde_json::to_value(volume()).unwrap();
        assert_eq!(v["class"], "Volume");
        assert_eq!(v["num_of_blocks"], 2048);

        let ss = FileSystemSnapShot {
            id: "SS-1".into(),
            name: "nightly".into(),
            ts: 1_700_000_000,
            plugin_data: None,
        };
        assert_eq!(serde_json::to_value(ss).unwrap()["class"], "FsSnapshot");
    }

    #[test]
    fn job_item_dispatches_on_class() {
        let raw = json!([2, 100, serde_json::to_value(volume()).unwrap()]);
        let info: JobInfo = serde_json::from_value(raw).unwrap();
        assert_eq!(info.status, JobStatus::Complete);
        assert_eq!(info.percent, 100);
        assert_eq!(info.item, Some(JobItem::Volume(volume())));

        let raw = json!([1, 40, null]);
        let info: JobInfo = serde_json::from_value(raw).unwrap();
        assert_eq!(info.status, JobStatus::InProgress);
        assert!(info.item.is_none());

        let raw = json!([2, 100, {"class": "Disk", "id": "d"}]);
        assert!(serde_json::from_value::<JobInfo>(raw).is_err());
    }

    #[test]
    fn job_item_serialises_without_duplicate_class() {
        let item = JobItem::Volume(volume());
        let s = serde_json::to_string(&item).unwrap();
        assert_eq!(s.matches("\"class\"").count(), 1);
    }

    #[test]
    fn pair_outcomes() {
        let done: Outcome<Volume> = Outcome::from_pair_value(json!([null, volume()])).unwrap();
        assert_eq!(done, Outcome::Done(volume()));

        let job: Outcome<Volume> = Outcome::from_pair_value(json!(["JOB-1", null])).unwrap();
        assert_eq!(job.job_id(), Some("JOB-1"));

        let err = Outcome::<Volume>::from_pair_value(json!([null, null])).unwrap_err();
        assert_eq!(err.code, ErrorCode::PluginBug);

        assert_eq!(Outcome::<Volume>::Job("J".into()).to_pair_value().unwrap(), json!(["J", null]));
    }

    #[test]
    fn job_only_outcomes() {
        assert_eq!(Outcome::from_job_value(Value::Null).unwrap(), Outcome::Done(()));
        assert_eq!(Outcome::from_job_value(json!("JOB-9")).unwrap(), Outcome::Job("JOB-9".into()));
        assert!(Outcome::from_job_value(json!(5)).is_err());
    }

    #[test]
    fn unknown_enum_values_fold_to_unknown() {
        assert_eq!(RaidType::from(999), RaidType::Unknown);
        assert_eq!(i64::from(VolumeProvisionType::Thin), 1);
        let t: InitiatorType = serde_json::from_value(json!(5)).unwrap();
        assert_eq!(t, InitiatorType::IscsiIqn);
    }

    #[test]
    fn volume_size_saturates_on_bogus_geometry() {
        let mut volume: Volume = serde_json::from_value(json!({
            "class": "Volume", "id": "V1", "name": "v", "block_size": 512,
            "num_of_blocks": 8, "admin_state": 1, "system_id": "s", "pool_id": "p"
        }))
        .unwrap();
        assert_eq!(volume.size_bytes(), 4096);
        volume.num_of_blocks = u64::MAX;
        assert_eq!(volume.size_bytes(), u64::MAX);
    }
}
