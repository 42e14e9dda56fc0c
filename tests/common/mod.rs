/*!
    pin level simulation of a bus adapter with I2C switches and memories behind it

    lines are open drain: a line is low when any participant pulls it. Targets decode start/stop conditions and bits from the line edges the way real chips do, so the master is exercised down to its pin sequences.
*/
#![allow(dead_code)]

use std::{
    cell::{RefCell, RefMut},
    io,
    rc::Rc,
    };
use eembus::master::{Transport, Pins, BusConfig, Master};


/// shared handle on a simulated bus, one clone goes in the master the other stays in the test
#[derive(Clone)]
pub struct Sim(Rc<RefCell<Bus>>);
impl Sim {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(Bus::new())))
    }
    pub fn bus(&self) -> RefMut<'_, Bus> {
        self.0.borrow_mut()
    }
}

/// master on a simulated bus, without the real hardware delays
pub fn master(sim: &Sim) -> Master<Sim> {
    let _ = env_logger::builder().is_test(true).try_init();
    Master::new(sim.clone(), BusConfig {
        settle: std::time::Duration::ZERO,
        reset_pulse: std::time::Duration::ZERO,
        .. Default::default()
    })
}

/// one complete exchange as seen by targets, from a start to the next start or stop
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub address: u8,
    pub read: bool,
    pub acked: bool,
    /// bytes received by or sent by the target
    pub data: Vec<u8>,
}

pub struct Device {
    pub address: u8,
    /// switch index and port this device is behind
    pub parent: Option<(usize, u8)>,
    pub kind: Kind,
}
pub enum Kind {
    Switch {register: u8},
    Eeprom(Memory),
    /// acknowledges its address, and its data bytes unless `nack_data`
    Plain {value: u8, nack_data: bool},
}

/// 24AA02E48 model
pub struct Memory {
    pub data: [u8; 256],
    pub page_size: usize,
    /// first locked address
    pub locked: usize,
    /// address polls refused after each write cycle
    pub busy_polls: u32,
    /// polls refused so far
    pub refused: u32,
    busy: u32,
    pointer: u8,
    expecting_word: bool,
    pending: Vec<u8>,
}
impl Memory {
    /// blank memory with given EUI-48 in its locked half
    pub fn new(eui48: [u8; 6]) -> Self {
        let mut data = [0xff; 256];
        data[0xfa ..].copy_from_slice(&eui48);
        Self {
            data,
            page_size: 8,
            locked: 0x80,
            busy_polls: 2,
            refused: 0,
            busy: 0,
            pointer: 0,
            expecting_word: false,
            pending: Vec::new(),
        }
    }
    fn select(&mut self, read: bool) -> bool {
        if self.busy > 0 {
            self.busy -= 1;
            self.refused += 1;
            return false
        }
        self.expecting_word = ! read;
        self.pending.clear();
        true
    }
    fn write(&mut self, byte: u8) -> bool {
        if self.expecting_word {
            self.pointer = byte;
            self.expecting_word = false;
        }
        else {
            self.pending.push(byte);
        }
        true
    }
    fn read(&mut self) -> u8 {
        let byte = self.data[usize::from(self.pointer)];
        self.pointer = self.pointer.wrapping_add(1);
        byte
    }
    fn end(&mut self, stop: bool) {
        if stop && ! self.pending.is_empty() {
            let start = usize::from(self.pointer);
            let base = start - start % self.page_size;
            for (i, &byte) in self.pending.iter().enumerate() {
                let address = base + (start + i) % self.page_size;
                if address < self.locked {
                    self.data[address] = byte;
                }
            }
            self.busy = self.busy_polls;
        }
        self.pending.clear();
    }
}

impl Device {
    fn select(&mut self, read: bool) -> bool {
        match &mut self.kind {
            Kind::Eeprom(memory) => memory.select(read),
            _ => true,
        }
    }
    fn write(&mut self, byte: u8) -> bool {
        match &mut self.kind {
            Kind::Switch {register} => {*register = byte; true},
            Kind::Eeprom(memory) => memory.write(byte),
            Kind::Plain {nack_data, ..} => ! *nack_data,
        }
    }
    fn read(&mut self) -> u8 {
        match &mut self.kind {
            Kind::Switch {register} => *register,
            Kind::Eeprom(memory) => memory.read(),
            Kind::Plain {value, ..} => *value,
        }
    }
    fn end(&mut self, stop: bool) {
        if let Kind::Eeprom(memory) = &mut self.kind {
            memory.end(stop);
        }
    }
}


#[derive(Copy, Clone, Debug, PartialEq, Default)]
enum Mode {
    #[default]
    Idle,
    Address,
    Receive(usize),
    Send(usize),
    Ignore,
}

/// state of the targets regarding the current exchange
#[derive(Default)]
struct Decoder {
    mode: Mode,
    /// clock rising edges in the current byte
    clocks: u8,
    shift: u8,
    /// a target is pulling the data line
    drive: bool,
    /// byte being sent by a target
    out: u8,
    master_ack: bool,
    /// the current acknowledge is for the address byte
    addressed: bool,
    current: Option<Transaction>,
}

pub struct Bus {
    pub devices: Vec<Device>,
    pub transactions: Vec<Transaction>,
    /// number of reads a target holds the clock low after the master releases it
    pub stretch: u32,
    /// clock line held low forever
    pub stuck_scl: bool,
    /// an other master pulling the data line
    pub peer_sda_low: bool,
    /// a target holding the data line for this many clock pulses
    pub stuck_sda: u32,
    pub opened: bool,
    pub opens: usize,
    levels: Pins,
    direction: Pins,
    scl: bool,
    sda: bool,
    held: u32,
    stretched: bool,
    decoder: Decoder,
}

impl Bus {
    fn new() -> Self {
        Self {
            devices: Vec::new(),
            transactions: Vec::new(),
            stretch: 0,
            stuck_scl: false,
            peer_sda_low: false,
            stuck_sda: 0,
            opened: false,
            opens: 0,
            levels: Pins::none(),
            direction: Pins::none(),
            scl: true,
            sda: true,
            held: 0,
            stretched: false,
            decoder: Decoder::default(),
        }
    }

    pub fn add(&mut self, address: u8, parent: Option<(usize, u8)>, kind: Kind) -> usize {
        self.devices.push(Device {address, parent, kind});
        self.devices.len() - 1
    }
    pub fn add_switch(&mut self, address: u8, parent: Option<(usize, u8)>) -> usize {
        self.add(address, parent, Kind::Switch {register: 0})
    }
    pub fn add_eeprom(&mut self, address: u8, parent: Option<(usize, u8)>, memory: Memory) -> usize {
        self.add(address, parent, Kind::Eeprom(memory))
    }
    pub fn add_plain(&mut self, address: u8, parent: Option<(usize, u8)>) -> usize {
        self.add(address, parent, Kind::Plain {value: 0x5a, nack_data: false})
    }
    pub fn register(&self, index: usize) -> u8 {
        match self.devices[index].kind {
            Kind::Switch {register} => register,
            _ => panic!("device {} is not a switch", index),
        }
    }
    pub fn set_register(&mut self, index: usize, value: u8) {
        if let Kind::Switch {register} = &mut self.devices[index].kind {
            *register = value;
        }
    }
    pub fn memory(&mut self, index: usize) -> &mut Memory {
        match &mut self.devices[index].kind {
            Kind::Eeprom(memory) => memory,
            _ => panic!("device {} is not a memory", index),
        }
    }
    /// transactions addressed to the given device address
    pub fn transactions_to(&self, address: u8) -> Vec<Transaction> {
        self.transactions.iter()
            .filter(|t| t.address == address)
            .cloned()
            .collect()
    }
    /// whether the bus buffers are enabled by the adapter
    pub fn enabled(&self) -> bool {
        self.image().enabled()
    }
    /// whether the master is pulling any of the I2C lines
    pub fn driving(&self) -> bool {
        self.master_scl_low() || self.master_sda_low()
    }

    fn visible(&self, index: usize) -> bool {
        match self.devices[index].parent {
            None => true,
            Some((switch, port)) => self.visible(switch)
                && self.register(switch) & (1 << port) != 0,
        }
    }
    fn select(&mut self, address: u8, read: bool) -> Option<usize> {
        let index = (0 .. self.devices.len())
            .find(|&i| self.devices[i].address == address && self.visible(i))?;
        self.devices[index].select(read).then_some(index)
    }

    fn master_scl_low(&self) -> bool {
        self.direction.scl() && ! self.levels.scl()
    }
    fn master_sda_low(&self) -> bool {
        self.direction.sda_out() && ! self.levels.sda_out()
    }
    fn scl_line(&self) -> bool {
        ! (self.master_scl_low() || self.stuck_scl || self.held > 0)
    }
    fn sda_line(&self) -> bool {
        ! (self.master_sda_low() || self.decoder.drive || self.peer_sda_low || self.stuck_sda > 0)
    }
    fn image(&self) -> Pins {
        let mut pins = Pins::none();
        pins.set_scl(self.scl);
        pins.set_sda_out(self.sda);
        pins.set_sda_in(self.sda);
        pins.set_enable(self.direction.enable() && self.levels.enable());
        pins.set_enable_alt(self.direction.enable_alt() && self.levels.enable_alt());
        pins.set_reset_b(! self.direction.reset_b() || self.levels.reset_b());
        pins
    }

    fn update(&mut self) {
        if self.master_scl_low() {
            self.stretched = false;
        }
        else if ! self.scl && ! self.stretched && self.stretch > 0 {
            self.stretched = true;
            self.held = self.stretch;
        }
        if self.direction.reset_b() && ! self.levels.reset_b() {
            for device in &mut self.devices {
                if let Kind::Switch {register} = &mut device.kind {
                    *register = 0;
                }
            }
        }
        let (scl, sda) = (self.scl_line(), self.sda_line());
        self.settle(scl, sda);
    }
    fn settle(&mut self, scl: bool, sda: bool) {
        let (was_scl, was_sda) = (self.scl, self.sda);
        self.scl = scl;
        self.sda = sda;
        if was_scl && scl {
            if was_sda && ! sda {self.on_start()}
            else if ! was_sda && sda {self.on_stop()}
        }
        else if ! was_scl && scl {
            self.on_rise();
        }
        else if was_scl && ! scl {
            self.on_fall();
            self.sda = self.sda_line();
        }
    }

    fn finish(&mut self, stop: bool) {
        if let Some(transaction) = self.decoder.current.take() {
            self.transactions.push(transaction);
        }
        if let Mode::Receive(index) | Mode::Send(index) = self.decoder.mode {
            self.devices[index].end(stop);
        }
    }
    fn on_start(&mut self) {
        self.finish(false);
        self.decoder = Decoder {mode: Mode::Address, .. Decoder::default()};
    }
    fn on_stop(&mut self) {
        self.finish(true);
        self.decoder = Decoder::default();
    }
    fn on_rise(&mut self) {
        let decoder = &mut self.decoder;
        match decoder.mode {
            Mode::Idle | Mode::Ignore => {},
            mode => {
                decoder.clocks += 1;
                if decoder.clocks <= 8 {
                    if let Mode::Address | Mode::Receive(_) = mode {
                        decoder.shift = (decoder.shift << 1) | u8::from(self.sda);
                    }
                }
                else if let Mode::Send(_) = mode {
                    decoder.master_ack = ! self.sda;
                }
            },
        }
    }
    fn on_fall(&mut self) {
        if self.stuck_sda > 0 {
            self.stuck_sda -= 1;
        }
        match self.decoder.clocks {
            8 => match self.decoder.mode {
                Mode::Address => {
                    let address = self.decoder.shift >> 1;
                    let read = self.decoder.shift & 1 != 0;
                    let selected = self.select(address, read);
                    self.decoder.current = Some(Transaction {
                        address,
                        read,
                        acked: selected.is_some(),
                        data: Vec::new(),
                        });
                    match selected {
                        Some(index) => {
                            self.decoder.drive = true;
                            self.decoder.addressed = true;
                            self.decoder.mode = if read {Mode::Send(index)} else {Mode::Receive(index)};
                        },
                        None => {
                            self.decoder.drive = false;
                            self.decoder.mode = Mode::Ignore;
                        },
                    }
                },
                Mode::Receive(index) => {
                    let byte = self.decoder.shift;
                    self.decoder.drive = self.devices[index].write(byte);
                    if let Some(current) = &mut self.decoder.current {
                        current.data.push(byte);
                    }
                },
                Mode::Send(_) => self.decoder.drive = false,
                _ => {},
            },
            9 => {
                self.decoder.clocks = 0;
                self.decoder.shift = 0;
                self.decoder.drive = false;
                if let Mode::Send(index) = self.decoder.mode {
                    if self.decoder.addressed || self.decoder.master_ack {
                        let byte = self.devices[index].read();
                        self.decoder.out = byte;
                        self.decoder.drive = byte & 0x80 == 0;
                        if let Some(current) = &mut self.decoder.current {
                            current.data.push(byte);
                        }
                    }
                    else {
                        self.decoder.mode = Mode::Ignore;
                    }
                }
                self.decoder.addressed = false;
            },
            clocks @ 1 ..= 7 => {
                if let Mode::Send(_) = self.decoder.mode {
                    self.decoder.drive = self.decoder.out & (0x80 >> clocks) == 0;
                }
            },
            _ => {},
        }
    }
}

impl Transport for Sim {
    fn open(&mut self) -> io::Result<()> {
        let mut bus = self.bus();
        if bus.opened
            {return Err(io::Error::other("adapter already opened"))}
        bus.opened = true;
        bus.opens += 1;
        Ok(())
    }
    fn close(&mut self) -> io::Result<()> {
        self.bus().opened = false;
        Ok(())
    }
    fn write_pins(&mut self, levels: Pins) -> io::Result<()> {
        let mut bus = self.bus();
        bus.levels = levels;
        bus.update();
        Ok(())
    }
    fn set_direction(&mut self, outputs: Pins) -> io::Result<()> {
        let mut bus = self.bus();
        bus.direction = outputs;
        bus.update();
        Ok(())
    }
    fn read_pins(&mut self) -> io::Result<Pins> {
        let mut bus = self.bus();
        if bus.held > 0 {
            bus.held -= 1;
        }
        bus.update();
        Ok(bus.image())
    }
}
