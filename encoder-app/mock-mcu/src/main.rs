use clap::Parser;
use core::cell::RefCell;
use embassy_executor::{Executor, Spawner};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::watch::Receiver;
use embassy_time::{Duration, Instant};
use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};
use encoder_core::mk_static;
use encoder_core::utils::connection::relay::AggregateSink;
use encoder_core::utils::controllers::{DriverCommand, DriverConfig, MAX_INSTANCES};
use encoder_core::utils::math::codec::SpeedLayout;
use encoder_core::utils::{EncoderController, TelemetryRelay, WheelDistance, WheelSample, DRIVER_CHANNEL, WHEEL_TOPICS};
use heapless::Vec;
use static_cell::StaticCell;
use std::io::BufRead;
use tracing::{error, info, warn};

#[derive(Parser, Clone)]
#[clap(version = "1.0")]
struct Opts
{
    /// I2C address of an encoder board, in hex (repeat for more boards)
    #[clap(long = "address", value_parser = parse_hex, default_value = "0x02")]
    addresses: std::vec::Vec<u8>,
    /// delay between two data register reads (us)
    #[clap(long, default_value_t = 50_000)]
    poll_us: u64,
    /// encoder pulses per wheel revolution
    #[clap(long, default_value_t = 2)]
    ppr: u32,
    /// wheel distance emission period (ms)
    #[clap(long, default_value_t = 100)]
    relay_ms: u64,
    /// decode both speed bytes instead of the low byte only
    #[clap(long)]
    speed_16bit: bool,
    /// make every Nth data read fail on the bus (0 = never)
    #[clap(long, default_value_t = 0)]
    fail_every: u32,
}

fn parse_hex(s: &str) -> Result<u8, std::num::ParseIntError> {
    u8::from_str_radix(s.trim_start_matches("0x"), 16)
}

/// One simulated encoder board; both wheels turn at a constant rate.
struct SimulatedBoard {
    address: u8,
    left: i32,
    right: i32,
}

impl SimulatedBoard {
    const LEFT_SPEED: u8 = 3;
    const RIGHT_SPEED: u8 = 2;

    fn frame(&mut self) -> [u8; 12] {
        self.left = self.left.wrapping_add(i32::from(Self::LEFT_SPEED));
        self.right = self.right.wrapping_add(i32::from(Self::RIGHT_SPEED));

        let mut frame = [0u8; 12];
        frame[0..4].copy_from_slice(&self.left.to_be_bytes());
        frame[5] = Self::LEFT_SPEED;
        frame[6..10].copy_from_slice(&self.right.to_be_bytes());
        frame[11] = Self::RIGHT_SPEED;
        frame
    }
}

/// I2C bus with simulated encoder boards attached.
struct SimulatedBus {
    boards: std::vec::Vec<SimulatedBoard>,
    data_reads: u32,
    fail_every: u32,
}

impl ErrorType for SimulatedBus {
    type Error = ErrorKind;
}

impl I2c for SimulatedBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let board = self
            .boards
            .iter_mut()
            .find(|b| b.address == address)
            .ok_or(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address))?;

        let mut register = None;
        for op in operations.iter_mut() {
            match op {
                Operation::Write(bytes) => register = bytes.first().copied(),
                Operation::Read(buffer) => match (register, buffer.len()) {
                    (Some(0x00), 1) => buffer[0] = b'N',
                    (Some(0x01), 12) => {
                        self.data_reads += 1;
                        if self.fail_every != 0 && self.data_reads % self.fail_every == 0 {
                            return Err(ErrorKind::ArbitrationLoss);
                        }
                        buffer.copy_from_slice(&board.frame());
                    }
                    _ => return Err(ErrorKind::Other),
                },
            }
        }
        Ok(())
    }
}

/// Prints every wheel distance message as a JSON line.
struct LogSink;

impl AggregateSink for LogSink {
    type Error = serde_json::Error;

    fn send(
        &mut self,
        message: &WheelDistance,
    ) -> Result<(), Self::Error> {
        let line = serde_json::to_string(message)?;
        info!(target: "wheel_distance", "{}", line);
        Ok(())
    }
}

type WheelReceiver = Receiver<'static, CriticalSectionRawMutex, WheelSample, 1>;

#[embassy_executor::task]
async fn driver_task(mut ctrl: EncoderController<'static, SimulatedBus, CriticalSectionRawMutex>) -> ! {
    ctrl.driver_ch().await
}

#[embassy_executor::task]
async fn relay_task(
    relay: TelemetryRelay<WheelReceiver>,
    tick: Duration,
) -> ! {
    relay.run(LogSink, tick).await
}

/// Forward `{"dc": "start" | "stop" | "status"}` lines from stdin to the driver.
fn command_reader() {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<DriverCommand>(&line) {
            Ok(cmd) => {
                if DRIVER_CHANNEL.try_send(cmd).is_err() {
                    warn!("driver busy, dropping command {:?}", cmd);
                }
            }
            Err(error) => error!(?error, "invalid driver command"),
        }
    }
}

#[embassy_executor::task]
async fn main_task(
    spawner: Spawner,
    opts: Opts,
) {
    let speed_layout = if opts.speed_16bit {
        SpeedLayout::BigEndian16
    } else {
        SpeedLayout::LowByte
    };

    let mut configs: Vec<DriverConfig, MAX_INSTANCES> = Vec::new();
    for &address in opts.addresses.iter() {
        let config = DriverConfig {
            address,
            poll_interval_us: opts.poll_us,
            pulses_per_rev: opts.ppr,
            speed_layout,
            ..DriverConfig::default()
        };
        if configs.push(config).is_err() {
            warn!("ignoring encoder at 0x{:02X}, at most {} boards", address, MAX_INSTANCES);
        }
    }

    // Simulated bus with one board per requested address
    let bus = SimulatedBus {
        boards: configs
            .iter()
            .map(|c| SimulatedBoard {
                address: c.address,
                left: 0,
                right: 0,
            })
            .collect(),
        data_reads: 0,
        fail_every: opts.fail_every,
    };
    let i2c_bus: &'static RefCell<SimulatedBus> = mk_static!(RefCell<SimulatedBus>, RefCell::new(bus));

    let mut ctrl = EncoderController::new(i2c_bus, &configs, &WHEEL_TOPICS);
    let started = ctrl.start(Instant::now());
    info!(started, total = ctrl.len(), "encoder boards started");

    let mut relay = TelemetryRelay::new();
    for topic in WHEEL_TOPICS.iter().take(2 * ctrl.len()) {
        match topic.receiver() {
            Some(rx) => {
                if let Err(e) = relay.subscribe(rx) {
                    error!("relay subscription failed: {}", e);
                }
            }
            None => error!("wheel topic already has a subscriber"),
        }
    }

    spawner.spawn(driver_task(ctrl)).unwrap();
    spawner
        .spawn(relay_task(relay, Duration::from_millis(opts.relay_ms)))
        .unwrap();

    info!("Reading driver commands from stdin");
    std::thread::spawn(command_reader);
}

static EXECUTOR: StaticCell<Executor> = StaticCell::new();

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let opts: Opts = Opts::parse();
    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        spawner.spawn(main_task(spawner, opts)).unwrap();
    });
}
