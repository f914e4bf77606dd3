use core::cell::RefCell;

use embassy_sync::{blocking_mutex::raw::NoopRawMutex, watch::Watch};
use embassy_time::{Duration, Instant};
use embedded_hal::i2c::ErrorKind;
use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTrans};
use encoder_core::utils::connection::topics::{SamplePublisher, SampleSource, WheelSample, WheelTopic};
use encoder_core::utils::controllers::i2c::{DeviceError, DriverState, EncoderDriver, IDENTITY_MARKER};
use encoder_core::utils::controllers::{DriverCommand, DriverConfig, EncoderController};
use encoder_core::utils::math::codec::SpeedLayout;

/// Default I2C address of the encoder board.
pub const ENCODER_ADDRESS: u8 = 0x02;
const IDENTITY_REG: u8 = 0x00;
const DATA_REG: u8 = 0x01;

/// Create a write_read transaction for the given I2C address/payloads.
pub fn write_read(
    addr: u8,
    write: Vec<u8>,
    read: Vec<u8>,
) -> I2cTrans {
    I2cTrans::write_read(addr, write, read)
}
/// Identity register read returning `id`.
pub fn identity(
    addr: u8,
    id: u8,
) -> I2cTrans {
    write_read(addr, vec![IDENTITY_REG], vec![id])
}
/// Data register read returning `frame`.
pub fn data(
    addr: u8,
    frame: Vec<u8>,
) -> I2cTrans {
    write_read(addr, vec![DATA_REG], frame)
}
/// Data register read that fails on the bus.
pub fn data_error(addr: u8) -> I2cTrans {
    write_read(addr, vec![DATA_REG], vec![0; 12]).with_error(ErrorKind::Other)
}

/// Records every publish as `(side, sample)` in a shared log.
struct Recorder<'a> {
    side: usize,
    log: &'a RefCell<Vec<(usize, WheelSample)>>,
}

impl SamplePublisher for Recorder<'_> {
    fn publish(
        &mut self,
        sample: WheelSample,
    ) {
        self.log.borrow_mut().push((self.side, sample));
    }
}

fn recorders(log: &RefCell<Vec<(usize, WheelSample)>>) -> [Recorder<'_>; 2] {
    [Recorder { side: 0, log }, Recorder { side: 1, log }]
}

fn frame(
    left: i32,
    left_speed: u8,
    right: i32,
    right_speed: u8,
) -> Vec<u8> {
    let mut f = Vec::with_capacity(12);
    f.extend_from_slice(&left.to_be_bytes());
    f.extend_from_slice(&[0x00, left_speed]);
    f.extend_from_slice(&right.to_be_bytes());
    f.extend_from_slice(&[0x00, right_speed]);
    f
}

#[test]
fn test_probe_accepts_identity_marker() {
    let expectations = [identity(ENCODER_ADDRESS, IDENTITY_MARKER)];
    let i2c_bus = RefCell::new(I2cMock::new(&expectations));
    let log = RefCell::new(Vec::new());
    let mut driver = EncoderDriver::new(&i2c_bus, DriverConfig::default(), recorders(&log));

    driver.probe().unwrap();
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_probe_rejects_other_identity() {
    let expectations = [identity(ENCODER_ADDRESS, b'M')];
    let i2c_bus = RefCell::new(I2cMock::new(&expectations));
    let log = RefCell::new(Vec::new());
    let mut driver = EncoderDriver::new(&i2c_bus, DriverConfig::default(), recorders(&log));

    match driver.probe() {
        Err(DeviceError::IdentityMismatch { found }) => assert_eq!(found, b'M'),
        other => panic!("unexpected probe result: {:?}", other),
    }
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_probe_bus_error() {
    let expectations = [identity(ENCODER_ADDRESS, IDENTITY_MARKER).with_error(ErrorKind::Other)];
    let i2c_bus = RefCell::new(I2cMock::new(&expectations));
    let log = RefCell::new(Vec::new());
    let mut driver = EncoderDriver::new(&i2c_bus, DriverConfig::default(), recorders(&log));

    assert!(matches!(driver.probe(), Err(DeviceError::Bus(ErrorKind::Other))));
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_init_starts_polling() {
    let expectations = [identity(ENCODER_ADDRESS, IDENTITY_MARKER)];
    let i2c_bus = RefCell::new(I2cMock::new(&expectations));
    let log = RefCell::new(Vec::new());
    let mut driver = EncoderDriver::new(&i2c_bus, DriverConfig::default(), recorders(&log));

    assert_eq!(driver.state(), DriverState::Uninitialized);
    let first = driver.init().unwrap();
    assert_eq!(first, Duration::from_micros(50_000));
    assert_eq!(driver.state(), DriverState::Polling);
    assert!(driver.samples().iter().all(|s| s.pulses_per_rev == 2));
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_init_failure_does_not_poll() {
    let expectations = [identity(ENCODER_ADDRESS, 0xFF)];
    let i2c_bus = RefCell::new(I2cMock::new(&expectations));
    let log = RefCell::new(Vec::new());
    let mut driver = EncoderDriver::new(&i2c_bus, DriverConfig::default(), recorders(&log));

    assert!(driver.init().is_err());
    assert_eq!(driver.state(), DriverState::Uninitialized);
    // No bus traffic and nothing to schedule.
    assert_eq!(driver.run_cycle(Instant::from_micros(0)), None);
    assert!(log.borrow().is_empty());
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_collect_publishes_left_then_right() {
    let expectations = [
        identity(ENCODER_ADDRESS, IDENTITY_MARKER),
        data(ENCODER_ADDRESS, frame(100, 2, 50, 1)),
    ];
    let i2c_bus = RefCell::new(I2cMock::new(&expectations));
    let log = RefCell::new(Vec::new());
    let mut driver = EncoderDriver::new(&i2c_bus, DriverConfig::default(), recorders(&log));

    driver.init().unwrap();
    driver.collect(Instant::from_micros(1_234)).unwrap();

    let log = log.borrow();
    assert_eq!(log.len(), 2);
    assert_eq!(
        log[0],
        (
            0,
            WheelSample {
                timestamp: 1_234,
                encoder_position: 100,
                speed: 2,
                pulses_per_rev: 2,
            }
        )
    );
    assert_eq!(
        log[1],
        (
            1,
            WheelSample {
                timestamp: 1_234,
                encoder_position: 50,
                speed: 1,
                pulses_per_rev: 2,
            }
        )
    );
    assert_eq!(driver.counters().published, 1);
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_consecutive_failures_are_counted_without_publishing() {
    let mut expectations = vec![identity(ENCODER_ADDRESS, IDENTITY_MARKER)];
    expectations.extend((0..5).map(|_| data_error(ENCODER_ADDRESS)));
    let i2c_bus = RefCell::new(I2cMock::new(&expectations));
    let log = RefCell::new(Vec::new());
    let mut driver = EncoderDriver::new(&i2c_bus, DriverConfig::default(), recorders(&log));

    driver.init().unwrap();
    for cycle in 0..5u64 {
        let next = driver.run_cycle(Instant::from_micros(cycle * 50_000));
        // Errors never stop the schedule.
        assert_eq!(next, Some(Duration::from_micros(50_000)));
    }

    assert_eq!(driver.comms_errors(), 5);
    assert_eq!(driver.counters().reads, 5);
    assert!(log.borrow().is_empty());
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_failed_collect_keeps_previous_samples() {
    let expectations = [
        identity(ENCODER_ADDRESS, IDENTITY_MARKER),
        data(ENCODER_ADDRESS, frame(7, 1, 8, 1)),
        data_error(ENCODER_ADDRESS),
    ];
    let i2c_bus = RefCell::new(I2cMock::new(&expectations));
    let log = RefCell::new(Vec::new());
    let mut driver = EncoderDriver::new(&i2c_bus, DriverConfig::default(), recorders(&log));

    driver.init().unwrap();
    driver.collect(Instant::from_micros(10)).unwrap();
    assert!(driver.collect(Instant::from_micros(20)).is_err());

    assert_eq!(driver.samples()[0].encoder_position, 7);
    assert_eq!(driver.samples()[0].timestamp, 10);
    assert_eq!(log.borrow().len(), 2);
    assert_eq!(driver.comms_errors(), 1);
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_stop_ends_schedule() {
    let expectations = [
        identity(ENCODER_ADDRESS, IDENTITY_MARKER),
        data(ENCODER_ADDRESS, frame(1, 0, 1, 0)),
    ];
    let i2c_bus = RefCell::new(I2cMock::new(&expectations));
    let log = RefCell::new(Vec::new());
    let mut driver = EncoderDriver::new(&i2c_bus, DriverConfig::default(), recorders(&log));

    driver.init().unwrap();
    assert!(driver.run_cycle(Instant::from_micros(0)).is_some());
    driver.stop();
    assert_eq!(driver.state(), DriverState::Stopped);
    assert_eq!(driver.run_cycle(Instant::from_micros(50_000)), None);
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_configured_address_and_speed_layout() {
    let config = DriverConfig {
        address: 0x05,
        pulses_per_rev: 360,
        speed_layout: SpeedLayout::BigEndian16,
        ..DriverConfig::default()
    };
    let mut raw = frame(-1, 0xFE, 0, 0x01);
    raw[4] = 0xFF;
    let expectations = [identity(0x05, IDENTITY_MARKER), data(0x05, raw)];
    let i2c_bus = RefCell::new(I2cMock::new(&expectations));
    let log = RefCell::new(Vec::new());
    let mut driver = EncoderDriver::new(&i2c_bus, config, recorders(&log));

    driver.init().unwrap();
    driver.collect(Instant::from_micros(0)).unwrap();

    let left = driver.samples()[0];
    assert_eq!(left.encoder_position, -1);
    assert_eq!(left.speed, -2);
    assert_eq!(left.pulses_per_rev, 360);
    assert_eq!(driver.status().address, 0x05);
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_controller_maps_instances_to_topics() {
    let expectations = [
        identity(0x02, IDENTITY_MARKER),
        identity(0x03, IDENTITY_MARKER),
        data(0x02, frame(10, 0, 11, 0)),
        data(0x03, frame(20, 0, 21, 0)),
    ];
    let i2c_bus = RefCell::new(I2cMock::new(&expectations));
    let topics: [WheelTopic<NoopRawMutex>; 4] = [Watch::new(), Watch::new(), Watch::new(), Watch::new()];
    let mut receivers: Vec<_> = topics.iter().map(|t| t.receiver().unwrap()).collect();

    let configs = [DriverConfig::at(0x02), DriverConfig::at(0x03)];
    let mut ctrl = EncoderController::new(&i2c_bus, &configs, &topics);
    assert_eq!(ctrl.len(), 2);

    let t0 = Instant::from_micros(0);
    assert_eq!(ctrl.start(t0), 2);
    let due = Instant::from_micros(50_000);
    assert_eq!(ctrl.next_due(0), Some(due));

    // Nothing is due before the first interval elapses.
    assert_eq!(ctrl.poll_due(Instant::from_micros(10)), Some(due));

    let next = ctrl.poll_due(due);
    assert_eq!(next, Some(Instant::from_micros(100_000)));

    let positions: Vec<i32> = receivers
        .iter_mut()
        .map(|rx| rx.try_latest().unwrap().encoder_position)
        .collect();
    assert_eq!(positions, vec![10, 11, 20, 21]);
    drop(ctrl);
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_controller_skips_boards_that_fail_probe() {
    let expectations = [
        identity(0x02, b'X'),
        identity(0x03, IDENTITY_MARKER),
        data(0x03, frame(5, 0, 6, 0)),
    ];
    let i2c_bus = RefCell::new(I2cMock::new(&expectations));
    let topics: [WheelTopic<NoopRawMutex>; 4] = [Watch::new(), Watch::new(), Watch::new(), Watch::new()];
    let mut left_of_first = topics[0].receiver().unwrap();

    let configs = [DriverConfig::at(0x02), DriverConfig::at(0x03)];
    let mut ctrl = EncoderController::new(&i2c_bus, &configs, &topics);

    assert_eq!(ctrl.start(Instant::from_micros(0)), 1);
    assert_eq!(ctrl.next_due(0), None);
    ctrl.poll_due(Instant::from_micros(50_000));

    assert!(left_of_first.try_latest().is_none());
    let status = ctrl.status();
    assert_eq!(status[0].state, DriverState::Uninitialized);
    assert_eq!(status[1].state, DriverState::Polling);
    assert_eq!(status[1].counters.published, 1);
    drop(ctrl);
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_controller_stop_command() {
    let expectations = [identity(0x02, IDENTITY_MARKER)];
    let i2c_bus = RefCell::new(I2cMock::new(&expectations));
    let topics: [WheelTopic<NoopRawMutex>; 2] = [Watch::new(), Watch::new()];

    let mut ctrl = EncoderController::new(&i2c_bus, &[DriverConfig::default()], &topics);
    ctrl.execute_command(DriverCommand::Start, Instant::from_micros(0));
    ctrl.execute_command(DriverCommand::Stop, Instant::from_micros(1));

    assert_eq!(ctrl.poll_due(Instant::from_micros(1_000_000)), None);
    assert_eq!(ctrl.driver(0).map(|d| d.state()), Some(DriverState::Stopped));
    drop(ctrl);
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_controller_ignores_configs_without_topics() {
    let expectations: [I2cTrans; 0] = [];
    let i2c_bus = RefCell::new(I2cMock::new(&expectations));
    let topics: [WheelTopic<NoopRawMutex>; 2] = [Watch::new(), Watch::new()];

    let configs = [DriverConfig::at(0x02), DriverConfig::at(0x03)];
    let ctrl = EncoderController::new(&i2c_bus, &configs, &topics);
    assert_eq!(ctrl.len(), 1);
    drop(ctrl);
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_driver_command_json() {
    let cmd: DriverCommand = serde_json::from_str(r#"{"dc":"status"}"#).unwrap();
    assert_eq!(cmd, DriverCommand::Status);
    assert_eq!(serde_json::to_string(&DriverCommand::Start).unwrap(), r#"{"dc":"start"}"#);
}

#[test]
fn test_driver_config_defaults_from_partial_json() {
    let config: DriverConfig = serde_json::from_str(r#"{"address": 3}"#).unwrap();
    assert_eq!(config, DriverConfig::at(3));
    assert_eq!(config.poll_interval(), Duration::from_micros(50_000));
    assert_eq!(config.pulses_per_rev, 2);
}
