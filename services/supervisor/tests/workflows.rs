//! Fleet workflows against mock engines and scripted devices.

use std::sync::Arc;

use convoy_protocol::{CommandStatus, MessageCode, NullReporter};
use convoy_supervisor::device::{Script, ScriptedConnector};
use convoy_supervisor::engine::{ContainerState, MockConnector, MockEngine};
use convoy_supervisor::fleet::NodeTarget;
use convoy_supervisor::probe::StaticProber;
use convoy_supervisor::reboot::ScriptedRebooter;
use convoy_supervisor::selector::Selection;
use convoy_supervisor::workflows::{
    self, RebootOutcome, ReconnectOptions, ReconnectOutcome, TalkOutcome,
};
use convoy_supervisor::{Fleet, FleetConfig, FleetContext};
use convoy_testing::RecordingReporter;
use serde_json::json;

const CONFIG: &str = r#"
image: cam:latest
settle_delay: 0.0
command_timeout: 0.3
nodes:
  gfa1: { host: 10.0.0.1, port: 19995, category: gfa }
  gfa2: { host: 10.0.0.2, port: 19995, category: gfa }
  gfa3: { host: 10.0.0.3, port: 19995, category: gfa }
volumes:
  data: { driver: local, opts: { type: nfs, device: ":/data" } }
"#;

struct Harness {
    ctx: FleetContext,
    prober: Arc<StaticProber>,
    engines: Arc<MockConnector>,
    devices: Arc<ScriptedConnector>,
    rebooter: Arc<ScriptedRebooter>,
    broadcasts: Arc<RecordingReporter>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(CONFIG)
    }

    fn with_config(yaml: &str) -> Self {
        let config = FleetConfig::from_yaml(yaml).unwrap();
        let prober = Arc::new(StaticProber::new());
        let engines = Arc::new(MockConnector::new());
        let devices = Arc::new(ScriptedConnector::new());
        let rebooter = Arc::new(ScriptedRebooter::new());
        let ctx = FleetContext::new(config, prober.clone(), engines.clone(), devices.clone())
            .with_rebooter(rebooter.clone());
        Self {
            ctx,
            prober,
            engines,
            devices,
            rebooter,
            broadcasts: Arc::new(RecordingReporter::new()),
        }
    }

    fn fleet(&self) -> Fleet {
        Fleet::from_config(&self.ctx.config, self.broadcasts.clone())
    }

    fn engine(&self, n: u8) -> Arc<MockEngine> {
        self.engines.engine(&format!("tcp://10.0.0.{}:2375", n))
    }
}

fn host(n: u8) -> String {
    format!("10.0.0.{}", n)
}

// =============================================================================
// Reconnect
// =============================================================================

#[tokio::test]
async fn test_reconnect_skips_unreachable_node() {
    let h = Harness::new();
    h.prober.set_reachable(&host(2), false);
    let mut fleet = h.fleet();
    let sink = RecordingReporter::new();

    let report = workflows::reconnect(
        &mut fleet,
        &h.ctx,
        &sink,
        &Selection::all(),
        ReconnectOptions {
            force: true,
            evict_image_conflicts: false,
        },
    )
    .await;

    assert_eq!(report.connected(), vec!["gfa1", "gfa3"]);
    assert!(matches!(
        report.outcomes["gfa2"],
        ReconnectOutcome::Failed(ref reason) if reason.contains("gfa2")
    ));
    assert!(sink.has_warning_containing("gfa2"));

    for n in [1, 3] {
        let running = h.engine(n).running();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].name, format!("device-gfa{}", n));
        assert_eq!(h.devices.connections(&host(n)), 1);
    }
    assert!(h.engine(2).runs().is_empty());

    assert!(fleet.get("gfa1").unwrap().device.is_connected());
    assert!(!fleet.get("gfa2").unwrap().device.is_connected());
    assert!(sink.texts(MessageCode::Info).iter().any(|t| t.starts_with("Waiting")));
}

#[tokio::test]
async fn test_reconnect_run_spec() {
    let h = Harness::new();
    let mut fleet = h.fleet();

    workflows::reconnect(
        &mut fleet,
        &h.ctx,
        &NullReporter,
        &Selection::names("gfa1"),
        ReconnectOptions::default(),
    )
    .await;

    let runs = h.engine(1).runs();
    assert_eq!(runs.len(), 1);
    let run = &runs[0];
    assert_eq!(run.image, "cam:latest");
    assert_eq!(run.network_mode, "host");
    assert!(run.auto_remove);
    assert!(run.privileged);
    assert!(run.env.contains(&"DEVICE_NAME=gfa1".to_string()));
    assert_eq!(run.mounts.len(), 1);
    assert_eq!(run.mounts[0].volume, "data");
    assert_eq!(run.mounts[0].target, "/data");
    assert_eq!(run.ports[0].port, 19995);

    assert!(h.engine(2).runs().is_empty());
}

#[tokio::test]
async fn test_reconnect_twice_keeps_one_container() {
    let h = Harness::new();
    let mut fleet = h.fleet();
    let selection = Selection::names("gfa1");

    for _ in 0..2 {
        let report = workflows::reconnect(
            &mut fleet,
            &h.ctx,
            &NullReporter,
            &selection,
            ReconnectOptions::default(),
        )
        .await;
        assert_eq!(report.connected(), vec!["gfa1"]);
    }

    let engine = h.engine(1);
    assert_eq!(engine.running().len(), 1);
    assert_eq!(engine.volumes_created(), 1);
    assert_eq!(fleet.get("gfa1").unwrap().device.ids_in_use(), 0);
}

#[tokio::test]
async fn test_reconnect_force_recreates_volumes() {
    let h = Harness::new();
    let mut fleet = h.fleet();
    let options = ReconnectOptions {
        force: true,
        evict_image_conflicts: false,
    };

    for _ in 0..2 {
        workflows::reconnect(&mut fleet, &h.ctx, &NullReporter, &Selection::names("gfa1"), options)
            .await;
    }

    assert_eq!(h.engine(1).volumes_created(), 2);
    assert_eq!(h.engine(1).running().len(), 1);
}

#[tokio::test]
async fn test_reconnect_evicts_image_conflicts() {
    let h = Harness::new();
    h.engine(1)
        .add_container("stray", "cam:old", ContainerState::Running);
    let mut fleet = h.fleet();
    let sink = RecordingReporter::new();

    workflows::reconnect(
        &mut fleet,
        &h.ctx,
        &sink,
        &Selection::names("gfa1"),
        ReconnectOptions {
            force: false,
            evict_image_conflicts: true,
        },
    )
    .await;

    assert_eq!(h.engine(1).removed_containers(), vec!["stray".to_string()]);
    assert!(sink.has_warning_containing("stray"));
}

#[tokio::test]
async fn test_reconnect_device_refused() {
    let h = Harness::new();
    h.devices.refuse(&host(3), true);
    let mut fleet = h.fleet();
    let sink = RecordingReporter::new();

    let report = workflows::reconnect(
        &mut fleet,
        &h.ctx,
        &sink,
        &Selection::category("gfa"),
        ReconnectOptions::default(),
    )
    .await;

    assert!(matches!(
        report.outcomes["gfa3"],
        ReconnectOutcome::DeviceUnavailable(_)
    ));
    assert_eq!(report.connected(), vec!["gfa1", "gfa2"]);
    assert_eq!(h.engine(3).running().len(), 1);
}

// =============================================================================
// Broadcast
// =============================================================================

#[tokio::test]
async fn test_broadcast_isolates_failing_nodes() {
    let h = Harness::new();
    h.devices.script(&host(2), Script::hang_up());
    h.devices.refuse(&host(3), true);
    let mut fleet = h.fleet();
    let sink = Arc::new(RecordingReporter::new());

    let report = workflows::broadcast(
        &mut fleet,
        &h.ctx,
        sink.clone(),
        &Selection::all(),
        "status",
    )
    .await;

    assert!(matches!(
        report.outcomes["gfa1"],
        TalkOutcome::Finished {
            status: CommandStatus::Done,
            ..
        }
    ));
    assert!(matches!(
        report.outcomes["gfa2"],
        TalkOutcome::Finished {
            status: CommandStatus::Failed,
            ..
        }
    ));
    assert!(matches!(report.outcomes["gfa3"], TalkOutcome::Unavailable(_)));

    assert!(sink.has_warning_containing("gfa2"));
    assert!(sink.has_warning_containing("gfa3"));
    assert_eq!(h.devices.received(&host(1)), vec!["1 status".to_string()]);

    for member in ["gfa1", "gfa2", "gfa3"] {
        assert_eq!(fleet.get(member).unwrap().device.ids_in_use(), 0);
    }
}

#[tokio::test]
async fn test_broadcast_write_failure_isolated_to_node() {
    let h = Harness::new();
    h.devices.script(&host(1), Script::reject_writes());
    h.devices.script(
        &host(2),
        Script::replies("gfa2", vec![(':', json!({"text": "ok"}))]),
    );
    let mut fleet = h.fleet();
    let sink = Arc::new(RecordingReporter::new());

    let report = workflows::broadcast(
        &mut fleet,
        &h.ctx,
        sink.clone(),
        &Selection::names("gfa1,gfa2"),
        "status",
    )
    .await;

    assert!(matches!(report.outcomes["gfa1"], TalkOutcome::Unavailable(_)));
    match &report.outcomes["gfa2"] {
        TalkOutcome::Finished { status, replies } => {
            assert_eq!(*status, CommandStatus::Done);
            assert_eq!(replies.len(), 1);
        }
        other => panic!("unexpected outcome for gfa2: {:?}", other),
    }

    assert!(sink.has_warning_containing("gfa1"));
    assert!(!sink.has_warning_containing("gfa2"));
    assert!(h.devices.received(&host(1)).is_empty());

    for member in ["gfa1", "gfa2"] {
        assert_eq!(fleet.get(member).unwrap().device.ids_in_use(), 0);
    }
}

#[tokio::test]
async fn test_broadcast_aggregates_filenames() {
    let h = Harness::new();
    for n in [1, 2] {
        h.devices.script(
            &host(n),
            Script::replies(
                format!("gfa{}", n),
                vec![
                    ('>', json!({})),
                    ('i', json!({"filename": format!("/data/gfa{}-0001.fits", n)})),
                    (':', json!({})),
                ],
            ),
        );
    }
    let mut fleet = h.fleet();
    let sink = Arc::new(RecordingReporter::new());

    let report = workflows::broadcast(
        &mut fleet,
        &h.ctx,
        sink.clone(),
        &Selection::names("gfa1,gfa2"),
        "expose 1.0",
    )
    .await;

    let expected = vec![json!("/data/gfa1-0001.fits"), json!("/data/gfa2-0001.fits")];
    assert_eq!(report.filenames, expected);
    assert_eq!(sink.keyword_values("filenames"), vec![expected]);
    assert_eq!(sink.keyword_values("filename").len(), 2);
    assert_eq!(report.outcomes.len(), 2);
}

#[tokio::test]
async fn test_broadcast_without_filenames_emits_no_aggregate() {
    let h = Harness::new();
    let mut fleet = h.fleet();
    let sink = Arc::new(RecordingReporter::new());

    let report = workflows::broadcast(&mut fleet, &h.ctx, sink.clone(), &Selection::all(), "ping").await;

    assert!(report.filenames.is_empty());
    assert!(sink.keyword_values("filenames").is_empty());
    assert_eq!(report.outcomes.len(), 3);
}

#[tokio::test]
async fn test_broadcast_timeout_abandons_command() {
    let h = Harness::new();
    h.devices.script(&host(1), Script::silent());
    let mut fleet = h.fleet();
    let sink = Arc::new(RecordingReporter::new());

    let report = workflows::broadcast(
        &mut fleet,
        &h.ctx,
        sink.clone(),
        &Selection::names("gfa1"),
        "expose 100",
    )
    .await;

    assert!(matches!(
        report.outcomes["gfa1"],
        TalkOutcome::Finished {
            status: CommandStatus::Failed,
            ..
        }
    ));
    assert!(sink.has_warning_containing("timed out"));

    let device = &fleet.get("gfa1").unwrap().device;
    assert!(device.is_connected());
    assert_eq!(device.in_flight(), 0);
    assert_eq!(device.ids_in_use(), 0);
}

#[tokio::test]
async fn test_broadcast_skips_disabled_nodes() {
    let h = Harness::new();
    let mut fleet = h.fleet();
    fleet.disable(&h.ctx.config, &NodeTarget::Names("gfa2".into()), &NullReporter);

    let report = workflows::broadcast(
        &mut fleet,
        &h.ctx,
        Arc::new(NullReporter),
        &Selection::all(),
        "status",
    )
    .await;

    assert_eq!(
        report.outcomes.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["gfa1", "gfa3"]
    );
    assert!(h.devices.received(&host(2)).is_empty());
}

#[tokio::test]
async fn test_unsolicited_device_message_is_broadcast() {
    let h = Harness::new();
    let mut fleet = h.fleet();

    workflows::broadcast(&mut fleet, &h.ctx, Arc::new(NullReporter), &Selection::names("gfa1"), "status")
        .await;
    h.devices.push(&host(1), convoy_testing::device_reply("gfa1", 0, 'w', json!({"temperature": -10.5})));

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    while h.broadcasts.broadcasts().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let broadcasts = h.broadcasts.broadcasts();
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(broadcasts[0].get("temperature").unwrap(), &[json!("gfa1"), json!(-10.5)]);
}

// =============================================================================
// Status and start-up
// =============================================================================

#[tokio::test]
async fn test_start_opens_sessions_for_running_containers() {
    let h = Harness::new();
    h.engine(1)
        .add_container("device-gfa1", "cam:latest", ContainerState::Running);
    h.prober.set_reachable(&host(3), false);
    let mut fleet = h.fleet();
    let sink = RecordingReporter::new();

    fleet.start(&h.ctx, &sink).await;

    assert!(fleet.get("gfa1").unwrap().device.is_connected());
    assert!(!fleet.get("gfa2").unwrap().device.is_connected());
    assert!(!fleet.get("gfa3").unwrap().device.is_connected());
    assert!(sink.has_warning_containing("gfa3"));
}

#[tokio::test]
async fn test_status_reports_enabled_nodes() {
    let h = Harness::with_config(&format!("{}enabled_nodes: [gfa1, gfa2]\n", CONFIG));
    h.engine(1)
        .add_container("device-gfa1", "cam:latest", ContainerState::Running);
    h.engine(1).add_volume("data", ":/data");
    let mut fleet = h.fleet();
    fleet.start(&h.ctx, &NullReporter).await;
    let sink = RecordingReporter::new();

    let statuses = workflows::status(&mut fleet, &h.ctx, &sink).await;

    assert_eq!(
        sink.keyword_values("enabledNodes"),
        vec![vec![json!("gfa1"), json!("gfa2")]]
    );
    assert_eq!(statuses.len(), 2);
    assert_eq!(sink.keyword_values("node").len(), 2);

    let gfa1 = &statuses[0];
    assert_eq!(gfa1.name, "gfa1");
    assert!(gfa1.reachable && gfa1.engine_live);
    assert!(gfa1.container.is_some());
    assert_eq!(gfa1.volumes.get("data"), Some(&true));

    let gfa2 = &statuses[1];
    assert!(gfa2.container.is_none());
    assert_eq!(gfa2.volumes.get("data"), Some(&false));
    assert!(sink.has_warning_containing("gfa2: no containers running"));
}

#[tokio::test]
async fn test_enable_adds_configured_node() {
    let h = Harness::with_config(&format!("{}enabled_nodes: [gfa1]\n", CONFIG));
    let mut fleet = h.fleet();
    assert_eq!(fleet.len(), 1);

    fleet.enable(&h.ctx.config, &NodeTarget::Names("gfa3".into()), &NullReporter);

    let report = workflows::broadcast(
        &mut fleet,
        &h.ctx,
        Arc::new(NullReporter),
        &Selection::all(),
        "status",
    )
    .await;
    assert_eq!(report.outcomes.len(), 2);
    assert!(report.outcomes.contains_key("gfa3"));
}

// =============================================================================
// Reboot
// =============================================================================

#[tokio::test]
async fn test_reboot_isolates_failed_node() {
    let h = Harness::new();
    h.engine(1)
        .add_container("device-gfa1", "cam:latest", ContainerState::Running);
    h.rebooter.set_exit_code(&host(2), Some(1));
    h.rebooter.set_exit_code(&host(3), Some(255));
    let mut fleet = h.fleet();
    fleet.start(&h.ctx, &NullReporter).await;
    assert!(fleet.get("gfa1").unwrap().device.is_connected());
    let sink = RecordingReporter::new();

    let report = workflows::reboot(&mut fleet, &h.ctx, &sink, &Selection::all()).await;

    assert_eq!(report.outcomes["gfa1"], RebootOutcome::Restarting);
    assert_eq!(
        report.outcomes["gfa2"],
        RebootOutcome::Failed("exit code 1".to_string())
    );
    assert_eq!(report.outcomes["gfa3"], RebootOutcome::Restarting);

    let mut calls = h.rebooter.calls();
    calls.sort();
    assert_eq!(calls, vec![host(1), host(2), host(3)]);

    assert!(!fleet.get("gfa1").unwrap().device.is_connected());
    let infos = sink.texts(MessageCode::Info);
    assert!(infos.contains(&"Restarting 10.0.0.1.".to_string()));
    assert!(infos.contains(&"Restarting 10.0.0.3.".to_string()));
    assert!(sink.has_warning_containing("gfa2: failed rebooting 10.0.0.2"));
    assert!(!sink.has_warning_containing("gfa1: failed"));
    assert!(!sink.has_warning_containing("gfa3: failed"));

    // Status follows the reboots.
    assert_eq!(report.statuses.len(), 3);
    assert_eq!(sink.keyword_values("enabledNodes").len(), 1);
}

#[tokio::test]
async fn test_reboot_uses_configured_user() {
    let h = Harness::with_config(
        r#"
image: cam:latest
settle_delay: 0.0
nodes:
  gfa1: { host: 10.0.0.1, port: 19995, category: gfa, user: sdss }
  gfa2: { host: 10.0.0.2, port: 19995, category: gfa }
"#,
    );
    h.rebooter.set_exit_code("sdss@10.0.0.1", None);
    let mut fleet = h.fleet();
    let sink = RecordingReporter::new();

    let report = workflows::reboot(&mut fleet, &h.ctx, &sink, &Selection::names("gfa1")).await;

    assert_eq!(h.rebooter.calls(), vec!["sdss@10.0.0.1".to_string()]);
    assert_eq!(
        report.outcomes["gfa1"],
        RebootOutcome::Failed("killed by signal".to_string())
    );
    assert!(!report.outcomes.contains_key("gfa2"));
    assert!(sink.has_warning_containing("gfa1"));
}
