//! End-to-end probe runs against the simulated sensor.

use std::time::Duration;

use as7265x_tester::config::ProbeSettings;
use as7265x_tester::peripheral::as7265x::{
    virt, DeviceId, Phase, PhysicalRegister, ProtocolError, SimulatedAs7265x, SimulatedResetPin,
    VirtualRegisterChannel,
};
use as7265x_tester::probe::{checks, Diagnostic, ProbeError, ProbeLog, ProbeState, SensorProbe, Verdict};
use as7265x_tester::reset::GpioReset;
use as7265x_tester::transport::Fixture;

fn probe(sim: &SimulatedAs7265x) -> SensorProbe<SimulatedAs7265x, GpioReset<SimulatedResetPin>> {
    let settings = ProbeSettings::default();
    SensorProbe::new(
        VirtualRegisterChannel::new(sim.clone(), settings.poll_budget()),
        GpioReset::new(sim.reset_pin(), settings.reset_hold(), settings.reset_settle()),
        settings,
    )
}

#[tokio::test(start_paused = true)]
async fn identity_passes_on_genuine_sensor() {
    let sim = SimulatedAs7265x::new();
    let mut probe = probe(&sim);
    let mut log = ProbeLog::new();

    probe.run(&mut log).await.unwrap();

    let device_type = log.check(checks::DEVICE_TYPE);
    let hw_version = log.check(checks::HW_VERSION);
    assert_eq!(device_type[0].verdict, Verdict::Pass);
    assert_eq!(device_type[0].value, Some(0x40));
    assert_eq!(hw_version[0].verdict, Verdict::Pass);
    assert_eq!(hw_version[0].value, Some(0x41));
}

#[tokio::test(start_paused = true)]
async fn wrong_hardware_version_fails_identity() {
    let sim = SimulatedAs7265x::new();
    sim.set_register(virt::HW_VERSION, 0x42);
    let mut probe = probe(&sim);
    let mut log = ProbeLog::new();

    let err = probe.run(&mut log).await.unwrap_err();

    match err {
        ProbeError::UnexpectedValue {
            register,
            expected,
            actual,
        } => {
            assert_eq!(register, virt::HW_VERSION);
            assert_eq!(expected, 0x41);
            assert_eq!(actual, 0x42);
        }
        other => panic!("expected UnexpectedValue, got {:?}", other),
    }

    let event = log.check(checks::HW_VERSION)[0];
    assert_eq!(event.verdict, Verdict::Fail);
    assert_eq!(event.diagnostic, Some(Diagnostic::WrongVersion));
    assert_eq!(probe.state(), ProbeState::Failed);
    assert!(log.check(checks::TEMPERATURE).is_empty());
}

#[tokio::test(start_paused = true)]
async fn silent_sensor_halts_at_first_read() {
    let sim = SimulatedAs7265x::new();
    sim.stall_rx(true);
    let mut probe = probe(&sim);
    let mut log = ProbeLog::new();

    let err = probe.run(&mut log).await.unwrap_err();

    assert!(matches!(
        err,
        ProbeError::Protocol(ProtocolError::Timeout {
            phase: Phase::AwaitRxReady,
            ..
        })
    ));
    let failure = log.check(checks::DEVICE_TYPE)[0];
    assert_eq!(failure.phase, ProbeState::CheckingIdentity);
    assert_eq!(failure.diagnostic, Some(Diagnostic::NoResponse));

    // Nothing after the DEVICE_TYPE request reached the sensor
    assert_eq!(
        sim.writes_to(PhysicalRegister::Write),
        vec![virt::DEVICE_TYPE.read_frame()]
    );
    assert!(log.check(checks::HW_VERSION).is_empty());
    assert!(log.check(checks::FIRMWARE).is_empty());
    assert!(log.check(checks::SELECT).is_empty());
    assert_eq!(probe.state(), ProbeState::Failed);
}

#[tokio::test(start_paused = true)]
async fn all_dies_at_room_temperature_pass() {
    let sim = SimulatedAs7265x::new();
    for device in [DeviceId::Nir, DeviceId::Visible, DeviceId::Uv] {
        sim.set_temperature(device, 25);
    }
    let mut probe = probe(&sim);
    let mut log = ProbeLog::new();

    probe.run(&mut log).await.unwrap();

    let temps = log.check(checks::TEMPERATURE);
    assert_eq!(temps.len(), 3);
    for (event, device) in temps.iter().zip([DeviceId::Nir, DeviceId::Visible, DeviceId::Uv]) {
        assert_eq!(event.verdict, Verdict::Pass);
        assert_eq!(event.value, Some(25));
        assert_eq!(event.device, Some(device));
    }
    assert_eq!(probe.state(), ProbeState::Passed);
    assert_eq!(sim.overruns(), 0);
    assert_eq!(sim.underruns(), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_sensor_still_passes() {
    let sim = SimulatedAs7265x::new();
    sim.set_busy_polls(3);
    let mut probe = probe(&sim);
    let mut log = ProbeLog::new();

    probe.run(&mut log).await.unwrap();

    assert_eq!(probe.state(), ProbeState::Passed);
    assert_eq!(sim.overruns(), 0);
}

#[tokio::test(start_paused = true)]
async fn simulated_fixture_runs_probe() {
    let sim = SimulatedAs7265x::new();
    let settings = ProbeSettings {
        reset_hold_ms: 10,
        reset_settle_ms: 10,
        ..ProbeSettings::default()
    };
    let fixture = Fixture::simulated(&sim, &settings);
    let mut probe = SensorProbe::new(
        VirtualRegisterChannel::new(fixture.bus, settings.poll_budget()),
        fixture.reset,
        settings,
    );
    let mut log = ProbeLog::new();

    let start = tokio::time::Instant::now();
    probe.run(&mut log).await.unwrap();

    // Reset pulse plus three settle delays at minimum
    assert!(start.elapsed() >= Duration::from_millis(20 + 3 * 200));
    assert_eq!(log.events().last().unwrap().check, checks::OVERALL);
}
