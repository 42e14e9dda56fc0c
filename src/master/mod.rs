/*!
    implement a bit-banged I2C master in `std` environment, for reaching the identification memories of EEM modules behind cascaded I2C switches.

    The central resource is the [Master] struct which owns the pin adapter (any [Transport]) and hands out a [Session] for the time the bus is acquired.

    layers of access:

    - [Session] bit and byte level methods are the raw bus conditions, use [Session::transfer] to bracket them in start/stop
    - [Session] transaction methods (`write_single`, `read_many`, `poll` ...) are the usual register accesses of I2C chips
    - [PortMap] and [discover] select and explore the sub-buses behind switches
    - [Eeprom] reads and writes the identity memory, and its [Record](crate::record::Record)

    ```ignore
    let mut master = Master::new(adapter, BusConfig::default());
    let mut bus = master.session()?;
    let ports = PortMap::kasli();
    let eeprom = Eeprom::default();
    let record = ports.enabled(&mut bus, &["EEM0"], |bus| eeprom.read_record(bus, Validation::Strict))?;
    bus.release()?;
    ```
*/

/// pin level interface of the bus adapter
mod transport;
/// implementation of the bus conditions, this is the tricky part of the code
mod signaling;
/// convenient methods to read/write registers on the bus
mod accessing;
/// switch ports and discovery of the device tree behind them
mod topology;
/// identification memory driver
mod eeprom;


pub use transport::*;
pub use signaling::*;
pub use topology::*;
pub use eeprom::*;


use crate::record::RecordError;
use thiserror::Error;

/// error regarding I2C communication
#[derive(Error, Debug)]
pub enum Error {
    #[error("problem with bus adapter")]
    Transport(std::io::Error),
    #[error("address {address:#04x} not acknowledged (read: {read})")]
    AddressNack {address: u8, read: bool},
    #[error("register {register:#04x} of device {address:#04x} not acknowledged")]
    RegisterNack {address: u8, register: u8},
    #[error("data {data:#04x} not acknowledged by device {address:#04x}")]
    DataNack {address: u8, data: u8},
    #[error("an other participant is driving the data line")]
    ArbitrationLost,
    #[error("clock line held low longer than allowed")]
    ClockStretchTimeout,
    #[error("device did not become ready in expected time")]
    Timeout,
    #[error("unexpected line level: {0}")]
    Line(&'static str),
    #[error("invalid use of the bus: {0}")]
    Precondition(&'static str),
    #[error("invalid identity record")]
    Record(#[from] RecordError),
    #[error("memory content at {offset:#04x} differs from what was written")]
    Mismatch {offset: u8},
}
impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Transport(error)
    }
}
