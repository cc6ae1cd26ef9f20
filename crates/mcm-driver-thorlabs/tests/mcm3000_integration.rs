//! End-to-end tests against the simulated controller.

use mcm_driver_thorlabs::mock::{MockBehavior, MockHandle, MockMcm3000};
use mcm_driver_thorlabs::protocol::Command;
use mcm_driver_thorlabs::{
    AxisConfig, ErrorKind, McmError, Mcm3000Config, Mcm3000Driver, StageModel,
};
use std::time::Duration;
use tokio::time::Instant;

/// Timeouts must fire at the bound: never before it, and not noticeably after.
fn assert_elapsed(start: Instant, expected: Duration) {
    let elapsed = start.elapsed();
    assert!(
        elapsed >= expected && elapsed <= expected + Duration::from_millis(5),
        "elapsed {:?}, expected {:?}",
        elapsed,
        expected
    );
}

fn three_axis_config() -> Mcm3000Config {
    Mcm3000Config::new("mock")
        .with_axis(AxisConfig::new(1, StageModel::Zfm2020))
        .with_axis(AxisConfig::new(2, StageModel::Mmp2Xy))
        .with_axis(AxisConfig::new(3, StageModel::PlsXy).reversed(true))
}

async fn connect(device: MockMcm3000) -> (Mcm3000Driver, MockHandle) {
    connect_with(&three_axis_config(), device).await
}

async fn connect_with(config: &Mcm3000Config, device: MockMcm3000) -> (Mcm3000Driver, MockHandle) {
    let (stream, handle) = device.spawn();
    let mcm = Mcm3000Driver::connect_with_stream(config, stream)
        .await
        .unwrap();
    (mcm, handle)
}

#[tokio::test]
async fn test_position_after_move_within_one_count() {
    let (mcm, _handle) = connect(MockMcm3000::new().with_motion_step(5000)).await;

    for axis in 1..=3u8 {
        for target in [1234.5, -800.25, 0.0, 12_000.0] {
            let legal = mcm.move_to(axis, target).await.unwrap();
            let settings = mcm.settings(axis).unwrap();
            let pos = mcm.position(axis).await.unwrap();

            assert!(
                (pos.um - legal).abs() <= settings.um_per_count + 1e-9,
                "axis {} target {}: got {} um, expected {}",
                axis,
                target,
                pos.um,
                legal
            );
            assert!((legal - target).abs() <= settings.um_per_count / 2.0 + 1e-9);
        }
    }
}

#[tokio::test]
async fn test_out_of_range_move_writes_nothing() {
    let (mcm, handle) = connect(MockMcm3000::new()).await;
    handle.clear_frames();

    for (axis, target) in [(1u8, 12_700.5), (2, -25_401.0), (3, f64::INFINITY), (1, f64::NAN)] {
        let err = mcm.move_to(axis, target).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Range, "axis {} target {}", axis, target);
    }
    let err = mcm.start_move(2, 30_000.0).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);

    // Round-trip a query so anything written earlier has reached the device.
    mcm.position(1).await.unwrap();
    assert_eq!(
        handle.commands(),
        vec![Command::RequestEncoderCount { channel: 0 }]
    );
}

#[tokio::test]
async fn test_relative_move_out_of_range_from_current_position() {
    let (mcm, handle) = connect(MockMcm3000::new()).await;
    mcm.move_to(1, 12_000.0).await.unwrap();

    let err = mcm.move_by(1, 1_000.0).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
    assert_eq!(handle.position(1), 56_693);
}

#[tokio::test]
async fn test_relative_move_picks_up_external_motion() {
    let (mcm, handle) = connect(MockMcm3000::new()).await;

    handle.set_position(2, 100);
    let legal = mcm.move_by(2, 10.0).await.unwrap();
    assert_eq!(legal, 60.0);
    assert_eq!(handle.position(2), 120);
}

#[tokio::test(start_paused = true)]
async fn test_silent_device_times_out_after_read_timeout() {
    let config = three_axis_config().with_timeout(Duration::from_millis(750));
    let (mcm, handle) = connect_with(&config, MockMcm3000::new()).await;
    handle.set_behavior(MockBehavior::Silent);

    let start = Instant::now();
    let err = mcm.position(1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_elapsed(start, Duration::from_millis(750));
}

#[tokio::test(start_paused = true)]
async fn test_silent_device_times_out_move_after_move_timeout() {
    let config = three_axis_config()
        .with_timeout(Duration::from_secs(10))
        .with_move_timeout(Duration::from_secs(2));
    let (mcm, handle) = connect_with(&config, MockMcm3000::new()).await;
    handle.set_behavior(MockBehavior::Silent);

    let start = Instant::now();
    let err = mcm.move_to(2, 100.0).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_elapsed(start, Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_read_timeout_shorter_than_move_timeout_is_reported() {
    let config = three_axis_config()
        .with_timeout(Duration::from_millis(750))
        .with_move_timeout(Duration::from_secs(5));
    let (mcm, handle) = connect_with(&config, MockMcm3000::new()).await;
    handle.set_behavior(MockBehavior::Silent);

    let start = Instant::now();
    let err = mcm.move_to(1, 100.0).await.unwrap_err();
    assert_elapsed(start, Duration::from_millis(750));
    assert!(
        matches!(err, McmError::Timeout { timeout, .. } if timeout == Duration::from_millis(750)),
        "{}",
        err
    );
}

#[tokio::test(start_paused = true)]
async fn test_zero_on_silent_device_times_out_after_read_timeout() {
    let config = three_axis_config().with_timeout(Duration::from_millis(600));
    let (mcm, handle) = connect_with(&config, MockMcm3000::new().with_position(2, 900)).await;
    handle.set_behavior(MockBehavior::Silent);

    let start = Instant::now();
    let err = mcm.zero(2).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_elapsed(start, Duration::from_millis(600));
    assert_eq!(handle.position(2), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_axis_times_out_and_clears_pending() {
    let config = three_axis_config().with_move_timeout(Duration::from_secs(3));
    let (mcm, handle) = connect_with(&config, MockMcm3000::new().with_motion_step(0)).await;

    let start = Instant::now();
    let err = mcm.move_to(1, 500.0).await.unwrap_err();
    assert!(err.is_timeout());
    assert_elapsed(start, Duration::from_secs(3));

    // The stalled target is forgotten; later waits return immediately.
    mcm.wait_settled(1).await.unwrap();
    assert_eq!(handle.position(1), 0);
}

#[tokio::test(start_paused = true)]
async fn test_home_timeout() {
    let mut config = three_axis_config();
    config.home_timeout = Duration::from_secs(4);
    let (mcm, handle) = connect_with(&config, MockMcm3000::new().with_motion_step(0)).await;
    handle.set_position(3, 5000);

    let start = Instant::now();
    assert!(mcm.home(3).await.unwrap_err().is_timeout());
    assert_elapsed(start, Duration::from_secs(4));
}

#[tokio::test]
async fn test_home_refused_when_limits_exclude_zero() {
    let config = Mcm3000Config::new("mock").with_axis(AxisConfig {
        min_um: Some(100.0),
        max_um: Some(1000.0),
        ..AxisConfig::new(1, StageModel::Zfm2020)
    });
    let (mcm, handle) = connect_with(&config, MockMcm3000::new().with_position(1, 2000)).await;
    handle.clear_frames();

    let err = mcm.home(1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
    assert_eq!(handle.position(1), 2000);
    assert!(handle.commands().is_empty());
}

#[tokio::test]
async fn test_close_then_any_operation_fails_with_connection() {
    let (mcm, _handle) = connect(MockMcm3000::new()).await;

    mcm.close().await.unwrap();
    mcm.close().await.unwrap();
    assert!(mcm.is_closed().await);

    assert_eq!(mcm.position(1).await.unwrap_err().kind(), ErrorKind::Connection);
    assert_eq!(mcm.move_to(1, 10.0).await.unwrap_err().kind(), ErrorKind::Connection);
    assert_eq!(mcm.move_by(2, 1.0).await.unwrap_err().kind(), ErrorKind::Connection);
    assert_eq!(mcm.home(3).await.unwrap_err().kind(), ErrorKind::Connection);
    assert_eq!(mcm.zero(3).await.unwrap_err().kind(), ErrorKind::Connection);
    assert_eq!(mcm.wait_settled(1).await.unwrap_err().kind(), ErrorKind::Connection);
    assert_eq!(mcm.start_move(1, 5.0).await.unwrap_err().kind(), ErrorKind::Connection);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_replies_are_protocol_errors() {
    let (mcm, handle) = connect(MockMcm3000::new().with_position(1, 77)).await;

    for behavior in [
        MockBehavior::Truncated,
        MockBehavior::ExtraBytes,
        MockBehavior::BadHeader,
        MockBehavior::WrongChannel,
    ] {
        handle.set_behavior(behavior);
        let err = mcm.position(1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol, "{:?}: {}", behavior, err);
    }

    handle.set_behavior(MockBehavior::Normal);
    assert_eq!(mcm.position(1).await.unwrap().counts, 77);
}

#[tokio::test]
async fn test_repeated_home_converges_to_zero() {
    let (mcm, handle) = connect(MockMcm3000::new().with_motion_step(300)).await;

    mcm.move_to(2, 1500.0).await.unwrap();
    for _ in 0..3 {
        mcm.home(2).await.unwrap();
        assert!(mcm.position(2).await.unwrap().counts.abs() <= 1);
    }
    assert_eq!(handle.position(2), 0);
}

#[tokio::test]
async fn test_move_without_wait_is_finished_by_next_command() {
    let mut config = three_axis_config();
    config.wait_for_moves = false;
    let (mcm, handle) = connect_with(&config, MockMcm3000::new().with_motion_step(100)).await;

    mcm.move_to(1, 200.0).await.unwrap();
    mcm.move_to(1, -200.0).await.unwrap();
    assert_eq!(handle.position(1), 945);

    mcm.wait_settled(1).await.unwrap();
    assert_eq!(handle.position(1), -945);
}

#[tokio::test(start_paused = true)]
async fn test_connect_to_silent_device_is_connection_error() {
    let (stream, _handle) = MockMcm3000::new()
        .with_behavior(MockBehavior::Silent)
        .spawn();
    let config = three_axis_config().with_timeout(Duration::from_millis(500));

    let start = Instant::now();
    let err = Mcm3000Driver::connect_with_stream(&config, stream)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_elapsed(start, Duration::from_millis(500));
}

#[tokio::test]
async fn test_connect_to_missing_port_is_connection_error() {
    let config = Mcm3000Config::new("/dev/does-not-exist-mcm3000")
        .with_axis(AxisConfig::new(1, StageModel::Zfm2020));
    let err = Mcm3000Driver::connect(&config).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn test_invalid_config_is_rejected_before_opening() {
    let config = Mcm3000Config::new("/dev/does-not-exist-mcm3000");
    let err = Mcm3000Driver::connect(&config).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn test_concurrent_queries_are_serialized() {
    let (mcm, _handle) = connect(MockMcm3000::new().with_position(1, 11).with_position(3, 33)).await;
    let mcm = std::sync::Arc::new(mcm);

    let mut tasks = Vec::new();
    for i in 0..20u8 {
        let mcm = std::sync::Arc::clone(&mcm);
        let axis = if i % 2 == 0 { 1 } else { 3 };
        tasks.push(tokio::spawn(async move { (axis, mcm.position(axis).await) }));
    }
    for task in tasks {
        let (axis, pos) = task.await.unwrap();
        let expected = if axis == 1 { 11 } else { 33 };
        assert_eq!(pos.unwrap().counts, expected);
    }
}
