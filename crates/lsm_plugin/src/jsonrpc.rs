use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ErrorCode, LsmError, Result};

/// Core message types and framing for the management IPC protocol.
///
/// Every message on the socket is a frame: a 10 character, zero padded,
/// decimal payload length followed by the JSON payload itself.
///
/// ```ignore
/// use lsm_plugin::jsonrpc::{Id, Method, Request};
///
/// let req = Request::call(Id::Number(1), Method::Volumes, serde_json::json!({"flags": 0}));
/// write_message(&mut stream, &req).await?;
/// ```
pub const HEADER_LEN: usize = 10;

/// Upper bound for a single frame; anything larger is treated as a corrupt header.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// `id` MAY be a string, number or null. We support all forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Number(i64),
    String(String),
    Null,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default = "null_id")]
    pub id: Id,
}

fn null_id() -> Id {
    Id::Null
}

/// Exactly one of `result` or `error` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(default = "null_id")]
    pub id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<LsmError>,
}

impl Request {
    pub fn call(id: Id, method: Method, params: Value) -> Self {
        Self {
            method: method.to_string(),
            params,
            id,
        }
    }
}

impl Response {
    /// A successful result; `null` is a legitimate result and is still sent.
    pub fn success(id: Id, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn fail(id: Id, error: LsmError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Every operation a management plugin can be asked to perform, by wire name.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr, Display, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Method {
    // Lifecycle
    PluginInfo,
    PluginRegister,
    PluginUnregister,
    TimeOutSet,
    TimeOutGet,

    // Management
    Capabilities,
    JobStatus,
    JobFree,
    Systems,
    Pools,

    // Block (SAN)
    Volumes,
    VolumeCreate,
    VolumeDelete,
    Disks,
    VolumeReplicate,
    VolumeReplicateRange,
    VolumeReplicateRangeBlockSize,
    VolumeResize,
    VolumeEnable,
    VolumeDisable,
    VolumeMask,
    VolumeUnmask,
    VolumesAccessibleByAccessGroup,
    AccessGroupsGrantedToVolume,
    VolumeChildDependency,
    VolumeChildDependencyRm,
    AccessGroups,
    AccessGroupCreate,
    AccessGroupDelete,
    AccessGroupInitiatorAdd,
    AccessGroupInitiatorDelete,
    IscsiChapAuth,
    TargetPorts,
    VolumeIdentLedOn,
    VolumeIdentLedOff,

    // File systems
    Fs,
    FsCreate,
    FsDelete,
    FsResize,
    FsClone,
    FsFileClone,
    FsSnapshotCreate,
    FsSnapshotDelete,
    FsSnapshots,
    FsSnapshotRestore,
    FsChildDependency,
    FsChildDependencyRm,

    // NFS
    Exports,
    ExportFs,
    ExportRemove,
    ExportAuth,

    // HBA / RAID
    VolumeRaidCreate,
    VolumeRaidCreateCapGet,
    PoolMemberInfo,
    VolumeRaidInfo,
    Batteries,
}

impl Method {
    /// Methods every plugin answers regardless of what it declares.
    pub const fn is_lifecycle(self) -> bool {
        matches!(
            self,
            Method::PluginInfo
                | Method::PluginRegister
                | Method::PluginUnregister
                | Method::TimeOutSet
                | Method::TimeOutGet
        )
    }
}

// -----------------------------------------------------------------------------
// Framing
// -----------------------------------------------------------------------------

/// Reads one frame. Returns `Ok(None)` when the peer closed the stream
/// before a new header started.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = std::str::from_utf8(&header)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| {
            LsmError::new(
                ErrorCode::TransportSerialization,
                format!("invalid frame header {:?}", String::from_utf8_lossy(&header)),
            )
        })?;
    if len > MAX_FRAME_LEN {
        return Err(LsmError::new(
            ErrorCode::TransportSerialization,
            format!("frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}"),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(LsmError::new(
            ErrorCode::TransportSerialization,
            format!("frame of {} bytes exceeds limit of {MAX_FRAME_LEN}", payload.len()),
        ));
    }
    let header = format!("{:0width$}", payload.len(), width = HEADER_LEN);
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    match read_frame(reader).await? {
        Some(payload) => Ok(Some(serde_json::from_slice(&payload)?)),
        None => Ok(None),
    }
}

pub async fn write_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(msg)?;
    write_frame(writer, &payload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strum::IntoEnumIterator;

    #[tokio::test]
    async fn frame_header_is_ten_zero_padded_digits() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let req = Request::call(Id::Number(7), Method::Volumes, json!({"flags": 0}));
        write_message(&mut a, &req).await.unwrap();
        drop(a);

        let mut raw = Vec::new();
        b.read_to_end(&mut raw).await.unwrap();
        let header = std::str::from_utf8(&raw[..HEADER_LEN]).unwrap();
        assert_eq!(header.parse::<usize>().unwrap(), raw.len() - HEADER_LEN);
        assert!(header.starts_with('0'));
        let body: Value = serde_json::from_slice(&raw[HEADER_LEN..]).unwrap();
        assert_eq!(body["method"], "volumes");
        assert_eq!(body["id"], 7);
    }

    #[tokio::test]
    async fn eof_before_header_is_not_an_error() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn garbage_header_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(b"abcdefghij{}").await.unwrap();
        let err = read_frame(&mut b).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TransportSerialization);
    }

    #[test]
    fn null_result_is_still_sent() {
        let resp = Response::success(Id::Number(1), Value::Null);
        let s = serde_json::to_string(&resp).unwrap();
        assert_eq!(s, r#"{"id":1,"result":null}"#);
    }

    #[test]
    fn error_response_into_result() {
        let resp: Response = serde_json::from_value(json!({
            "id": 3,
            "error": {"code": 153, "message": "nope"}
        }))
        .unwrap();
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, ErrorCode::NoSupport);
    }

    #[test]
    fn method_names_match_the_wire() {
        assert_eq!(Method::Fs.as_ref(), "fs");
        assert_eq!(Method::TimeOutSet.to_string(), "time_out_set");
        assert_eq!(
            "volume_replicate_range_block_size".parse::<Method>().unwrap(),
            Method::VolumeReplicateRangeBlockSize
        );
        assert_eq!("iscsi_chap_auth".parse::<Method>().unwrap(), Method::IscsiChapAuth);
        assert!("no_such_method".parse::<Method>().is_err());
        for m in Method::iter() {
            assert_eq!(m.as_ref().parse::<Method>().unwrap(), m);
        }
    }
}
