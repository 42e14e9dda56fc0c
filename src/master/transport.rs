use bilge::prelude::*;


/**
    image of the adapter pins, as written, read or set as outputs

    The adapter is a USB to GPIO chip in raw bit-bang mode. The I2C lines are open drain: a line is pulled low only when its pin is an output with a low level, otherwise it floats high. SDA is wired to 2 pins so that its level can be sampled while being driven.
*/
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq)]
pub struct Pins {
    /// I2C clock
    pub scl: bool,
    /// I2C data, driving side
    pub sda_out: bool,
    /// I2C data, sampling side
    pub sda_in: bool,
    reserved_i: u1,
    /// bus buffer enable, carriers up to v2.0
    pub enable: bool,
    /// switches reset, active low
    pub reset_b: bool,
    /// bus buffer enable, carriers after v2.0
    pub enable_alt: bool,
    reserved_ii: u1,
}
impl Pins {
    /// no pin set
    pub fn none() -> Self {
        Self::from(0u8)
    }
    /// control lines for an enabled bus: both enable pins and reset released
    pub fn enabling() -> Self {
        let mut pins = Self::none();
        pins.set_enable(true);
        pins.set_enable_alt(true);
        pins.set_reset_b(true);
        pins
    }
    /// control lines for a disabled bus: only reset released
    pub fn disabling() -> Self {
        let mut pins = Self::none();
        pins.set_reset_b(true);
        pins
    }
    /// whether any of the enable pins is set
    pub fn enabled(&self) -> bool {
        self.enable() || self.enable_alt()
    }
}


/**
    pin level access to a bus adapter

    implementations only forward the pin images to the device, all the bus logic is done by [Session](super::Session)
*/
pub trait Transport {
    /// take exclusive ownership of the device
    fn open(&mut self) -> std::io::Result<()>;
    /// give back the device
    fn close(&mut self) -> std::io::Result<()>;
    /// set the level of output pins
    fn write_pins(&mut self, levels: Pins) -> std::io::Result<()>;
    /// set which pins are outputs, others are inputs
    fn set_direction(&mut self, outputs: Pins) -> std::io::Result<()>;
    /// sample the level of all pins
    fn read_pins(&mut self) -> std::io::Result<Pins>;
}
