use std::{
    time::{Duration, Instant},
    vec::Vec,
    };
use log::*;

use crate::record::{Record, Validation, Eui48, RECORD_SIZE};
use super::{
    Error,
    signaling::Session,
    transport::Transport,
    };


/// usual address of module identification memories
pub const EEPROM_ADDRESS: u8 = 0x50;
/// address of the identification memory on carriers v2.0
pub const EEPROM_ADDRESS_V2: u8 = 0x57;
/// location of the factory programmed EUI-48
const EUI48_REGISTER: u8 = 0xfa;
/// location of the factory programmed EUI-64
const EUI64_REGISTER: u8 = 0xf8;


/// geometry and timing of an identification memory
#[derive(Clone, Debug)]
pub struct EepromConfig {
    /// bus address
    pub address: u8,
    /// bytes written in one transaction, page writes must be aligned on it
    pub page_size: usize,
    /// maximum duration of a write cycle
    pub poll_timeout: Duration,
    /// number of bytes from the start that can be written, the rest is factory locked
    pub writable: usize,
}
impl Default for EepromConfig {
    fn default() -> Self {
        Self {
            address: EEPROM_ADDRESS,
            page_size: 8,
            poll_timeout: Duration::from_secs(1),
            writable: RECORD_SIZE / 2,
        }
    }
}


/**
    24AA02E48 style identification memory: 256 bytes with paged writes, whose upper half is factory-locked and contains an EUI-48

    the memory must be reachable on the currently enabled bus, see [PortMap::enabled](super::PortMap::enabled)
*/
#[derive(Clone, Debug, Default)]
pub struct Eeprom {
    config: EepromConfig,
}
impl Eeprom {
    pub fn new(config: EepromConfig) -> Self {
        Self {config}
    }
    pub fn config(&self) -> &EepromConfig {&self.config}

    /// read bytes starting at given offset
    pub fn read<T: Transport>(&self, bus: &mut Session<'_, T>, offset: u8, length: usize) -> Result<Vec<u8>, Error> {
        bus.read_many(self.config.address, offset, length)
    }
    /// read the whole memory
    pub fn dump<T: Transport>(&self, bus: &mut Session<'_, T>) -> Result<[u8; RECORD_SIZE], Error> {
        let data = self.read(bus, 0, RECORD_SIZE)?;
        let mut dump = [0; RECORD_SIZE];
        dump.copy_from_slice(&data);
        Ok(dump)
    }

    /// poll the memory until its write cycle is finished, returning how long it took
    pub fn wait_ready<T: Transport>(&self, bus: &mut Session<'_, T>) -> Result<Duration, Error> {
        let start = Instant::now();
        while ! bus.poll(self.config.address, true)? {
            if start.elapsed() > self.config.poll_timeout
                {return Err(Error::Timeout)}
        }
        let elapsed = start.elapsed();
        debug!("write cycle took {:?}", elapsed);
        Ok(elapsed)
    }

    /**
        write bytes starting at given offset, which must be aligned on a page

        the data is written page by page, waiting for the write cycle of each
    */
    pub fn write<T: Transport>(&self, bus: &mut Session<'_, T>, offset: u8, data: &[u8]) -> Result<(), Error> {
        let page = self.config.page_size;
        if page == 0 || usize::from(offset) % page != 0
            {return Err(Error::Precondition("write must start on a page boundary"))}
        if usize::from(offset) + data.len() > RECORD_SIZE
            {return Err(Error::Precondition("write past the end of memory"))}

        for (start, chunk) in (usize::from(offset) ..).step_by(page).zip(data.chunks(page)) {
            let register = u8::try_from(start)
                .map_err(|_| Error::Precondition("write past the end of memory"))?;
            debug!("writing page {:#04x}, {} bytes", register, chunk.len());
            bus.write_many(self.config.address, register, chunk, true)?;
            self.wait_ready(bus)?;
        }
        Ok(())
    }

    /// factory programmed EUI-48
    pub fn eui48<T: Transport>(&self, bus: &mut Session<'_, T>) -> Result<Eui48, Error> {
        let mut eui48 = [0; 6];
        eui48.copy_from_slice(&self.read(bus, EUI48_REGISTER, 6)?);
        Ok(Eui48(eui48))
    }
    /// factory programmed EUI-64
    pub fn eui64<T: Transport>(&self, bus: &mut Session<'_, T>) -> Result<[u8; 8], Error> {
        let mut eui64 = [0; 8];
        eui64.copy_from_slice(&self.read(bus, EUI64_REGISTER, 8)?);
        Ok(eui64)
    }

    /// read and decode the identity record
    pub fn read_record<T: Transport>(&self, bus: &mut Session<'_, T>, validation: Validation) -> Result<Record, Error> {
        let record = Record::decode(&self.dump(bus)?, validation)?;
        info!("read record {} {}", record.title(), record.eui48);
        Ok(record)
    }

    /**
        write the identity record, then read it back and check it strictly

        Only the writable part of the memory is written, and it must read back unchanged: a memory ignoring the write gives [Error::Mismatch]. When the record's EUI-48 lies in the locked part, it is replaced by the factory one, otherwise the checksum could never match.
    */
    pub fn write_record<T: Transport>(&self, bus: &mut Session<'_, T>, record: &Record) -> Result<Record, Error> {
        let writable = self.config.writable.min(RECORD_SIZE);
        let mut record = record.clone();
        if writable < RECORD_SIZE {
            let eui48 = self.eui48(bus)?;
            if record.eui48 != eui48 {
                warn!("record EUI-48 {} replaced by factory {}", record.eui48, eui48);
                record = record.with_eui48(eui48);
            }
        }
        let data = record.encode();
        self.write(bus, 0, &data[.. writable])?;
        let dump = self.dump(bus)?;
        if let Some(offset) = dump[.. writable].iter().zip(&data[.. writable]).position(|(read, written)| read != written) {
            warn!("record read back differs at {:#04x}: {:#04x} instead of {:#04x}", offset, dump[offset], data[offset]);
            return Err(Error::Mismatch {offset: offset as u8});
        }
        let written = Record::decode(&dump, Validation::Strict)?;
        info!("wrote record {}", written.title());
        Ok(written)
    }
}
