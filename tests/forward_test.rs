// End-to-end: daemon-side client → runtime(ForwardPlugin) → backend.
use lsm_forward::forward::{DESCRIPTION, ForwardPlugin, plugin_info};
use lsm_plugin::client::{Client, UdsConnector};
use lsm_plugin::error::ErrorCode;
use lsm_plugin::jsonrpc::Method;
use lsm_plugin::management::Management;
use lsm_plugin::message::{JobItem, JobStatus, NfsAccess, Outcome, PluginInfo, Search, VolumeProvisionType};
use lsm_plugin::plugin_runtime;
use lsm_plugin::plugin_test_util::{MockBackend, MockConnector};
use tokio::io::DuplexStream;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

const SIZE: u64 = 1_048_576;

/// Serves a `ForwardPlugin` over an in-memory pipe and hands back the daemon's end.
fn serve_forward(connector: MockConnector) -> (Client<DuplexStream>, JoinHandle<lsm_plugin::error::Result<()>>) {
    let (daemon, plugin_side) = tokio::io::duplex(256 * 1024);
    let server = tokio::spawn(plugin_runtime::run(
        ForwardPlugin::new(connector),
        plugin_side,
        plugin_info(),
    ));
    (Client::from_stream(daemon), server)
}

#[tokio::test]
async fn volume_create_result_or_job_and_job_status() {
    let backend = MockBackend::new();
    let connector = MockConnector::new(backend.clone());
    let (mut daemon, _server) = serve_forward(connector.clone());

    daemon.register("tank://?forward=mock", "", 30_000).await.unwrap();
    assert_eq!(connector.connects().await, vec![("mock://".to_string(), 30_000)]);

    let pool = MockBackend::pool();
    let done = daemon
        .volume_create(&pool, "v1", SIZE, VolumeProvisionType::Thin)
        .await
        .unwrap();
    let volume = match done {
        Outcome::Done(v) => v,
        Outcome::Job(id) => panic!("expected a volume, got job {id}"),
    };
    assert_eq!(volume.name, "v1");
    assert_eq!(volume.size_bytes(), SIZE);

    backend.start_job_next("JOB-1").await;
    let job = daemon
        .volume_create(&pool, "v1-async", SIZE, VolumeProvisionType::Thin)
        .await
        .unwrap();
    assert_eq!(job, Outcome::Job("JOB-1".into()));

    let status = daemon.job_status("JOB-1").await.unwrap();
    assert_eq!(status.status, JobStatus::Complete);
    assert_eq!(status.percent, 100);
    match status.item {
        Some(JobItem::Volume(v)) => assert_eq!(v.name, "v1-async"),
        other => panic!("unexpected job item {other:?}"),
    }

    daemon.job_free("JOB-1").await.unwrap();
    assert!(!backend.has_job("JOB-1"));
}

#[tokio::test]
async fn every_wire_shape_carries_a_result_or_a_job() {
    let backend = MockBackend::new();
    let (mut daemon, _server) = serve_forward(MockConnector::new(backend.clone()));
    daemon.register("tank://?forward=mock", "", 30_000).await.unwrap();
    let pool = MockBackend::pool();

    // [job, item]
    let fs = daemon.fs_create(&pool, "fs1", SIZE).await.unwrap().done().unwrap();
    assert_eq!(fs.name, "fs1");
    assert_eq!(fs.pool_id, "POOL-1");
    backend.start_job_next("JOB-FS").await;
    let job = daemon.fs_create(&pool, "fs2", SIZE).await.unwrap();
    assert_eq!(job, Outcome::Job("JOB-FS".into()));
    match daemon.job_status("JOB-FS").await.unwrap().item {
        Some(JobItem::FileSystem(f)) => assert_eq!(f.name, "fs2"),
        other => panic!("unexpected job item {other:?}"),
    }

    // item or job string
    let access = NfsAccess {
        rw: vec!["host-a".into()],
        ..Default::default()
    };
    let export = daemon
        .export_fs(&fs.id, Some("/export/fs1"), &access, None, None)
        .await
        .unwrap()
        .done()
        .unwrap();
    assert_eq!(export.export_path, "/export/fs1");
    assert_eq!(export.rw, vec!["host-a".to_string()]);
    backend.start_job_next("JOB-EXP").await;
    let job = daemon.export_fs(&fs.id, None, &access, None, None).await.unwrap();
    assert_eq!(job.job_id(), Some("JOB-EXP"));
    assert_eq!(daemon.exports(None).await.unwrap().len(), 2);

    // job or null
    assert_eq!(daemon.fs_delete(&fs).await.unwrap(), Outcome::Done(()));
    let fs2 = daemon
        .file_systems(Some(&Search::new("pool_id", "POOL-1")))
        .await
        .unwrap()
        .pop()
        .unwrap();
    backend.start_job_next("JOB-RM").await;
    assert_eq!(daemon.fs_delete(&fs2).await.unwrap(), Outcome::Job("JOB-RM".into()));
    assert!(daemon.file_systems(None).await.unwrap().is_empty());

    let status = daemon.job_status("JOB-RM").await.unwrap();
    assert_eq!(status.status, JobStatus::Complete);
    assert!(status.item.is_none());
}

#[tokio::test]
async fn registration_without_forward_key_fails_before_connecting() {
    let connector = MockConnector::default();
    let (mut daemon, _server) = serve_forward(connector.clone());

    let err = daemon.register("tank://?backend=mock", "", 1_000).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidArgument);
    assert!(err.message.contains("backend=mock"));
    assert!(connector.connects().await.is_empty());

    // still unregistered: forwarded calls are refused
    let err = daemon.disks().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::LibBug);
}

#[tokio::test]
async fn lifecycle_calls_stay_local() {
    let backend = MockBackend::new();
    let (mut daemon, server) = serve_forward(MockConnector::new(backend.clone()));

    let info = daemon.plugin_info().await.unwrap();
    assert_eq!(info, PluginInfo::new(DESCRIPTION, env!("CARGO_PKG_VERSION")));

    daemon.time_out_set(7_500).await.unwrap();
    assert_eq!(daemon.time_out_get().await.unwrap(), 7_500);
    assert!(backend.calls().await.is_empty());

    daemon.register("tank://?forward=mock", "", 100).await.unwrap();
    assert_eq!(daemon.time_out_get().await.unwrap(), 100);
    daemon.time_out_set(250).await.unwrap();
    assert_eq!(daemon.time_out_get().await.unwrap(), 250);

    lsm_plugin::client::Upstream::close(daemon).await.unwrap();
    assert!(backend.is_closed().await);
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn upstream_errors_and_no_support_travel_back() {
    let backend = MockBackend::new();
    let (mut daemon, _server) = serve_forward(MockConnector::new(backend.clone()));
    daemon.register("tank://?forward=mock", "", 100).await.unwrap();

    let err = daemon.job_status("JOB-404").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFoundJob);
    assert_eq!(err.message, "job JOB-404 not found");

    let err = daemon.batteries().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NoSupport);

    let err = daemon
        .pools(Some(&Search::new("colour", "green")))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::UnsupportedSearchKey);
}

#[tokio::test]
async fn forwards_over_a_real_plugin_socket() {
    let dir = tempfile::tempdir().unwrap();
    let listener = UnixListener::bind(dir.path().join("mock")).unwrap();

    // the backend plugin, as the daemon would have started it
    let backend = MockBackend::new();
    let served = backend.clone();
    let upstream = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        plugin_runtime::run(served, stream, PluginInfo::new("mock backend", "0.0.1")).await
    });

    let (daemon_side, plugin_side) = tokio::io::duplex(256 * 1024);
    let forward = tokio::spawn(plugin_runtime::run(
        ForwardPlugin::new(UdsConnector::new(dir.path())),
        plugin_side,
        plugin_info(),
    ));
    let mut daemon = Client::from_stream(daemon_side);

    daemon.register("tank://?forward=mock", "", 4_000).await.unwrap();
    let reg = backend.registered().await.unwrap();
    assert_eq!(reg.uri, "mock://");
    assert_eq!(reg.password, "");
    assert_eq!(reg.timeout, 4_000);

    let systems = daemon.systems(None).await.unwrap();
    assert_eq!(systems[0].id, "sim-01");

    let pool = MockBackend::pool();
    daemon
        .volume_create(&pool, "v1", SIZE, VolumeProvisionType::Full)
        .await
        .unwrap();
    let found = daemon
        .volumes(Some(&Search::new("pool_id", "POOL-1")))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);

    backend.start_job_next("JOB-DEL").await;
    let deleted = daemon.volume_delete(&found[0]).await.unwrap();
    assert_eq!(deleted.job_id(), Some("JOB-DEL"));

    lsm_plugin::client::Upstream::close(daemon).await.unwrap();
    forward.await.unwrap().unwrap();
    upstream.await.unwrap().unwrap();

    assert!(backend.is_closed().await);
    assert_eq!(backend.calls().await.last(), Some(&Method::PluginUnregister));
}
