use core::ops::Range;
use std::vec::Vec;
use bilge::prelude::*;
use log::*;

use super::{
    Error,
    signaling::Session,
    transport::Transport,
    };


/// first byte of every transaction
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq)]
struct AddressByte {
    /// direction, target to master
    read: bool,
    /// 7 bit target address
    address: u7,
}
fn address_byte(address: u8, read: bool) -> Result<u8, Error> {
    if address > 0x7f
        {return Err(Error::Precondition("device address must fit in 7 bits"))}
    Ok(AddressByte::new(read, u7::new(address)).into())
}


/// register access methods, each of them is a complete transaction from start to stop
impl<T: Transport> Session<'_, T> {
    /**
        write one byte to a device without register address, like for switches

        with `ack` false, the device may refuse the data byte
    */
    pub fn write_single(&mut self, address: u8, data: u8, ack: bool) -> Result<(), Error> {
        let header = address_byte(address, false)?;
        self.transfer(|bus| {
            if ! bus.write_byte(header)?
                {return Err(Error::AddressNack {address, read: false})}
            if ! bus.write_byte(data)? && ack
                {return Err(Error::DataNack {address, data})}
            Ok(())
        })
    }

    /// read one byte from a device without register address
    pub fn read_single(&mut self, address: u8) -> Result<u8, Error> {
        let header = address_byte(address, true)?;
        self.transfer(|bus| {
            if ! bus.write_byte(header)?
                {return Err(Error::AddressNack {address, read: true})}
            bus.read_byte(false)
        })
    }

    /**
        write bytes starting at the given register

        with `ack` false, the device may refuse the last data byte
    */
    pub fn write_many(&mut self, address: u8, register: u8, data: &[u8], ack: bool) -> Result<(), Error> {
        let header = address_byte(address, false)?;
        self.transfer(|bus| {
            if ! bus.write_byte(header)?
                {return Err(Error::AddressNack {address, read: false})}
            if ! bus.write_byte(register)?
                {return Err(Error::RegisterNack {address, register})}
            for (i, &byte) in data.iter().enumerate() {
                let last = i+1 == data.len();
                if ! bus.write_byte(byte)? && (ack || ! last)
                    {return Err(Error::DataNack {address, data: byte})}
            }
            Ok(())
        })
    }

    /// read bytes starting at the given register
    pub fn read_many(&mut self, address: u8, register: u8, length: usize) -> Result<Vec<u8>, Error> {
        if length == 0
            {return Err(Error::Precondition("empty read"))}
        let write = address_byte(address, false)?;
        let read = address_byte(address, true)?;
        self.transfer(|bus| {
            if ! bus.write_byte(write)?
                {return Err(Error::AddressNack {address, read: false})}
            if ! bus.write_byte(register)?
                {return Err(Error::RegisterNack {address, register})}
            bus.restart()?;
            if ! bus.write_byte(read)?
                {return Err(Error::AddressNack {address, read: true})}
            receive(bus, length)
        })
    }

    /// read bytes from the current position of a device, without register address
    pub fn read_stream(&mut self, address: u8, length: usize) -> Result<Vec<u8>, Error> {
        if length == 0
            {return Err(Error::Precondition("empty read"))}
        let header = address_byte(address, true)?;
        self.transfer(|bus| {
            if ! bus.write_byte(header)?
                {return Err(Error::AddressNack {address, read: true})}
            receive(bus, length)
        })
    }

    /// check whether a device acknowledges its address, a refusal is not an error
    pub fn poll(&mut self, address: u8, write: bool) -> Result<bool, Error> {
        let header = address_byte(address, ! write)?;
        self.transfer(|bus| bus.write_byte(header))
    }

    /// addresses in the given range acknowledging a write poll, in ascending order
    pub fn scan(&mut self, range: Range<u8>) -> Result<Vec<u8>, Error> {
        let mut found = Vec::new();
        for address in range {
            if self.poll(address, true)? {
                found.push(address);
            }
        }
        debug!("scan found {:02x?}", found);
        Ok(found)
    }
}

/// read bytes acknowledging all but the last one
fn receive<T: Transport>(bus: &mut Session<'_, T>, length: usize) -> Result<Vec<u8>, Error> {
    let mut data = Vec::with_capacity(length);
    for i in 0 .. length {
        data.push(bus.read_byte(i+1 < length)?);
    }
    Ok(data)
}
