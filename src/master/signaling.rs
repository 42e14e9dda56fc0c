use std::{
    thread,
    time::Duration,
    };
use log::*;

use super::{
    Error,
    transport::{Transport, Pins},
    };


/// timing and tolerance settings of the bus
#[derive(Clone, Debug)]
pub struct BusConfig {
    /// number of samples of a low clock line before giving up on a target stretching it
    pub max_clock_stretch: u32,
    /// delay for the bus buffers to power up after enabling them
    pub settle: Duration,
    /// duration of the switches reset pulse, and of the wait after it
    pub reset_pulse: Duration,
    /// additional delay per half clock period, the adapter latency is usually slow enough
    pub half_period: Duration,
}
impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_clock_stretch: 100,
            settle: Duration::from_millis(100),
            reset_pulse: Duration::from_millis(10),
            half_period: Duration::ZERO,
        }
    }
}


/**
    I2C master driving the bus lines through a pin adapter

    The bus must be acquired with [Self::session] before any exchange, the returned [Session] borrows the master for the time of the exchanges so a bus cannot be acquired twice.
*/
pub struct Master<T: Transport> {
    transport: T,
    config: BusConfig,
    /// current output enables
    direction: Pins,
    /// half clock periods issued so far
    ticks: u64,
}
impl<T: Transport> Master<T> {
    pub fn new(transport: T, config: BusConfig) -> Self {
        Self {
            transport,
            config,
            direction: Pins::none(),
            ticks: 0,
        }
    }
    pub fn config(&self) -> &BusConfig {&self.config}
    pub fn transport(&self) -> &T {&self.transport}
    pub fn transport_mut(&mut self) -> &mut T {&mut self.transport}
    pub fn into_inner(self) -> T {self.transport}
    /// half clock periods issued since creation
    pub fn ticks(&self) -> u64 {self.ticks}

    /**
        acquire the bus: open the adapter, enable the bus buffers and check the lines are idle

        the bus is released when the returned session is dropped, or explicitly with [Session::release]
    */
    pub fn session(&mut self) -> Result<Session<'_, T>, Error> {
        self.transport.open()?;
        let mut session = Session {
            master: self,
            transfer: false,
            released: false,
            };
        session.acquire()?;
        Ok(session)
    }
}


/**
    acquired bus

    bit level methods here are implementing the I2C conditions, with clock stretching and arbitration checks. Most of them must be used between [Self::start] and [Self::stop], see [Self::transfer]
*/
pub struct Session<'m, T: Transport> {
    master: &'m mut Master<T>,
    /// a start condition was issued and no stop yet
    transfer: bool,
    released: bool,
}
impl<T: Transport> Session<'_, T> {
    /// half clock periods issued since the master creation
    pub fn ticks(&self) -> u64 {self.master.ticks}
    pub fn config(&self) -> &BusConfig {&self.master.config}
    /// whether a start condition was issued and not yet stopped
    pub fn in_transfer(&self) -> bool {self.transfer}

    fn acquire(&mut self) -> Result<(), Error> {
        let control = Pins::enabling();
        self.master.transport.write_pins(control)?;
        self.master.direction = control;
        self.master.transport.set_direction(control)?;
        self.tick();
        thread::sleep(self.master.config.settle);

        let levels = self.read()?;
        if ! levels.enabled()
            {return Err(Error::Line("bus buffers not enabled"))}
        check_idle(levels)?;
        info!("bus acquired");
        Ok(())
    }

    /// release the bus, reporting any unexpected line level
    pub fn release(mut self) -> Result<(), Error> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), Error> {
        self.released = true;
        self.transfer = false;
        let result = self.disable();
        let closed = self.master.transport.close();
        result?;
        closed?;
        info!("bus released");
        Ok(())
    }
    fn disable(&mut self) -> Result<(), Error> {
        let control = Pins::disabling();
        let mut direction = control;
        direction.set_enable(true);
        direction.set_enable_alt(true);
        self.master.direction = direction;
        self.master.transport.set_direction(direction)?;
        self.master.transport.write_pins(control)?;

        let levels = self.read()?;
        if levels.enabled()
            {return Err(Error::Line("bus buffers still enabled"))}
        check_idle(levels)
    }

    fn read(&mut self) -> Result<Pins, Error> {
        Ok(self.master.transport.read_pins()?)
    }
    fn tick(&mut self) {
        self.master.ticks += 1;
        if ! self.master.config.half_period.is_zero() {
            thread::sleep(self.master.config.half_period);
        }
    }
    /// pull the clock line low or release it
    fn scl_oe(&mut self, low: bool) -> Result<(), Error> {
        self.master.direction.set_scl(low);
        Ok(self.master.transport.set_direction(self.master.direction)?)
    }
    /// pull the data line low or release it
    fn sda_oe(&mut self, low: bool) -> Result<(), Error> {
        self.master.direction.set_sda_out(low);
        Ok(self.master.transport.set_direction(self.master.direction)?)
    }
    /// wait for targets to release the clock line, then sample the data line
    fn clock_stretch(&mut self) -> Result<bool, Error> {
        for _ in 0 .. self.master.config.max_clock_stretch {
            let levels = self.read()?;
            if levels.scl()
                {return Ok(levels.sda_in())}
        }
        Err(Error::ClockStretchTimeout)
    }
    fn ensure_transfer(&self) -> Result<(), Error> {
        if ! self.transfer
            {return Err(Error::Precondition("bus condition outside of a transfer"))}
        Ok(())
    }

    /// issue a start condition, both lines must be idle
    pub fn start(&mut self) -> Result<(), Error> {
        if self.transfer
            {return Err(Error::Precondition("start inside a transfer, use restart"))}
        trace!("S");
        let levels = self.read()?;
        if ! levels.scl()
            {return Err(Error::Line("clock low before start"))}
        if ! levels.sda_in()
            {return Err(Error::ArbitrationLost)}
        self.sda_oe(true)?;
        self.tick();
        self.scl_oe(true)?;
        self.transfer = true;
        Ok(())
    }

    /// issue a stop condition, leaving both lines released
    pub fn stop(&mut self) -> Result<(), Error> {
        self.ensure_transfer()?;
        trace!("P");
        self.transfer = false;
        self.tick();
        self.scl_oe(false)?;
        self.tick();
        let stretched = self.clock_stretch();
        self.sda_oe(false)?;
        stretched?;
        self.tick();
        if ! self.read()?.sda_in()
            {return Err(Error::ArbitrationLost)}
        Ok(())
    }

    /// issue a repeated start condition inside a transfer
    pub fn restart(&mut self) -> Result<(), Error> {
        self.ensure_transfer()?;
        trace!("R");
        self.sda_oe(false)?;
        self.tick();
        self.scl_oe(false)?;
        self.tick();
        if ! self.clock_stretch()?
            {return Err(Error::ArbitrationLost)}
        self.transfer = false;
        self.start()
    }

    /// send one bit, checking nobody else drives the data line
    pub fn write_bit(&mut self, bit: bool) -> Result<(), Error> {
        self.ensure_transfer()?;
        self.sda_oe(! bit)?;
        self.tick();
        self.scl_oe(false)?;
        self.tick();
        if self.clock_stretch()? != bit
            {return Err(Error::ArbitrationLost)}
        self.scl_oe(true)?;
        Ok(())
    }

    /// receive one bit
    pub fn read_bit(&mut self) -> Result<bool, Error> {
        self.ensure_transfer()?;
        self.sda_oe(false)?;
        self.tick();
        self.scl_oe(false)?;
        self.tick();
        let bit = self.clock_stretch()?;
        self.scl_oe(true)?;
        Ok(bit)
    }

    /// send one byte most significant bit first, and return whether the target acknowledged it
    pub fn write_byte(&mut self, byte: u8) -> Result<bool, Error> {
        for i in (0 .. 8).rev() {
            self.write_bit(byte & (1 << i) != 0)?;
        }
        let ack = ! self.read_bit()?;
        self.sda_oe(true)?;
        trace!("W {:#04x} {}", byte, if ack {"A"} else {"N"});
        Ok(ack)
    }

    /// receive one byte most significant bit first, then acknowledge it or not
    pub fn read_byte(&mut self, ack: bool) -> Result<u8, Error> {
        let mut byte = 0;
        for _ in 0 .. 8 {
            byte = (byte << 1) | u8::from(self.read_bit()?);
        }
        self.write_bit(! ack)?;
        self.sda_oe(true)?;
        trace!("R {:#04x} {}", byte, if ack {"A"} else {"N"});
        Ok(byte)
    }

    /**
        run the given exchange between a start and a stop condition

        the stop is issued whatever the exchange result, when the exchange failed the stop failure is only logged
    */
    pub fn transfer<R>(&mut self, exchange: impl FnOnce(&mut Self) -> Result<R, Error>) -> Result<R, Error> {
        self.start()?;
        match exchange(self) {
            Ok(value) => {
                self.stop()?;
                Ok(value)
            },
            Err(error) => {
                if let Err(stop) = self.stop() {
                    warn!("stop after failed transfer: {}", stop);
                }
                Err(error)
            },
        }
    }

    /**
        recover a bus blocked by a target in the middle of a byte

        both lines are released, then the clock is pulsed (at most 9 times) until the data line is released by targets
    */
    pub fn clear(&mut self) -> Result<(), Error> {
        self.transfer = false;
        self.sda_oe(false)?;
        self.scl_oe(false)?;
        self.tick();
        for pulse in 0 .. 9 {
            if self.clock_stretch()? {
                debug!("bus cleared after {} pulses", pulse);
                return Ok(())
            }
            self.scl_oe(true)?;
            self.tick();
            self.scl_oe(false)?;
            self.tick();
        }
        if ! self.clock_stretch()?
            {return Err(Error::Line("data stuck low after clearing"))}
        Ok(())
    }

    /// pulse the reset line of the switches, disabling all their ports
    pub fn reset(&mut self) -> Result<(), Error> {
        if self.transfer
            {return Err(Error::Precondition("reset inside a transfer"))}
        let mut control = Pins::enabling();
        control.set_reset_b(false);
        self.master.transport.write_pins(control)?;
        thread::sleep(self.master.config.reset_pulse);
        self.master.transport.write_pins(Pins::enabling())?;
        thread::sleep(self.master.config.reset_pulse);
        debug!("switches reset");
        Ok(())
    }
}

impl<T: Transport> Drop for Session<'_, T> {
    fn drop(&mut self) {
        if ! self.released {
            if let Err(error) = self.shutdown() {
                warn!("releasing bus: {}", error);
            }
        }
    }
}

fn check_idle(levels: Pins) -> Result<(), Error> {
    if ! levels.scl()
        {return Err(Error::Line("clock stuck low"))}
    if ! levels.sda_in()
        {return Err(Error::Line("data input stuck low"))}
    if ! levels.sda_out()
        {return Err(Error::Line("data output stuck low"))}
    Ok(())
}
