use core::ops::Range;
use std::{
    boxed::Box,
    collections::{BTreeMap, BTreeSet},
    string::{String, ToString},
    vec::Vec,
    };
use log::*;

use super::{
    Error,
    signaling::Session,
    transport::Transport,
    };


/// one switch port to enable on the way to a device
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hop {
    /// switch address
    pub switch: u8,
    /// bit index of the port in the switch register
    pub port: u8,
}
impl Hop {
    pub const fn new(switch: u8, port: u8) -> Self {
        Self {switch, port}
    }
    fn check(&self) -> Result<(), Error> {
        if self.port >= 8
            {return Err(Error::Precondition("switch port index must be lower than 8"))}
        if self.switch > 0x7f
            {return Err(Error::Precondition("switch address must fit in 7 bits"))}
        Ok(())
    }
}
/// list of hops from the root bus to a sub-bus
pub type Path = Vec<Hop>;


const KASLI_SWITCHES: [u8; 2] = [0x70, 0x71];
const KASLI_PORTS: &[(&str, &[Hop])] = &[
    ("ROOT", &[]),
    ("EEM0", &[Hop::new(0x70, 7)]),
    ("EEM1", &[Hop::new(0x70, 5)]),
    ("EEM2", &[Hop::new(0x70, 4)]),
    ("EEM3", &[Hop::new(0x70, 3)]),
    ("EEM4", &[Hop::new(0x70, 2)]),
    ("EEM5", &[Hop::new(0x70, 1)]),
    ("EEM6", &[Hop::new(0x70, 0)]),
    ("EEM7", &[Hop::new(0x70, 6)]),
    ("EEM8", &[Hop::new(0x71, 4)]),
    ("EEM9", &[Hop::new(0x71, 5)]),
    ("EEM10", &[Hop::new(0x71, 7)]),
    ("EEM11", &[Hop::new(0x71, 6)]),
    ("SFP0", &[Hop::new(0x71, 0)]),
    ("SFP1", &[Hop::new(0x71, 1)]),
    ("SFP2", &[Hop::new(0x71, 2)]),
    ("LOC0", &[Hop::new(0x71, 3)]),
];


/**
    named sub-buses behind the switches of a carrier

    each port is a path of switch ports to enable, ports can be marked as skipped when their sub-bus is known to be unusable (missing or shorted device). Skipped ports can be neither enabled nor explored.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortMap {
    ports: BTreeMap<String, Path>,
    switches: BTreeSet<u8>,
    skip: BTreeSet<String>,
}
impl PortMap {
    /// build from a port table, switches are all the switches referenced by the table
    pub fn new<'a>(ports: impl IntoIterator<Item=(&'a str, &'a [Hop])>) -> Result<Self, Error> {
        let mut map = Self::empty();
        for (name, path) in ports {
            for hop in path {
                hop.check()?;
                map.switches.insert(hop.switch);
            }
            map.ports.insert(name.to_string(), path.to_vec());
        }
        Ok(map)
    }
    /// port table of the Kasli carrier
    pub fn kasli() -> Self {
        let mut map = Self::empty();
        map.switches.extend(KASLI_SWITCHES);
        for &(name, path) in KASLI_PORTS {
            map.ports.insert(name.to_string(), path.to_vec());
        }
        map
    }
    fn empty() -> Self {
        Self {
            ports: BTreeMap::new(),
            switches: BTreeSet::new(),
            skip: BTreeSet::new(),
        }
    }
    /// also clear the given switch when enabling ports
    pub fn with_switch(mut self, address: u8) -> Result<Self, Error> {
        Hop::new(address, 0).check()?;
        self.switches.insert(address);
        Ok(self)
    }
    /// mark a port as unusable
    pub fn with_skip(mut self, port: &str) -> Result<Self, Error> {
        if ! self.ports.contains_key(port)
            {return Err(Error::Precondition("unknown port"))}
        self.skip.insert(port.to_string());
        Ok(self)
    }

    /// addresses of all known switches, ascending
    pub fn switches(&self) -> impl Iterator<Item=u8> + '_ {
        self.switches.iter().copied()
    }
    /// names of all usable ports, sorted
    pub fn ports(&self) -> impl Iterator<Item=&str> + '_ {
        self.ports.keys()
            .filter(|name| ! self.skip.contains(*name))
            .map(String::as_str)
    }
    /// path to the given port, skipped or not
    pub fn path(&self, port: &str) -> Option<&[Hop]> {
        self.ports.get(port).map(Vec::as_slice)
    }
    /// name of the port reached by the given path
    pub fn name_of(&self, path: &[Hop]) -> Option<&str> {
        self.ports.iter()
            .find(|(_, p)| p.as_slice() == path)
            .map(|(name, _)| name.as_str())
    }
    /// switch ports that must never be enabled
    pub fn skipped_hops(&self) -> BTreeSet<Hop> {
        self.skip.iter()
            .filter_map(|name| self.ports.get(name))
            .flatten()
            .copied()
            .collect()
    }

    /**
        register value of every known switch for enabling the given ports

        fails for unknown or skipped ports
    */
    pub fn registers(&self, ports: &[&str]) -> Result<BTreeMap<u8, u8>, Error> {
        let mut registers: BTreeMap<u8, u8> = self.switches.iter()
            .map(|&switch| (switch, 0))
            .collect();
        for &port in ports {
            if self.skip.contains(port)
                {return Err(Error::Precondition("port is marked as skipped"))}
            let path = self.ports.get(port)
                .ok_or(Error::Precondition("unknown port"))?;
            for hop in path {
                *registers.entry(hop.switch).or_insert(0) |= 1 << hop.port;
            }
        }
        Ok(registers)
    }

    /**
        enable exactly the given ports, disabling all others

        every known switch is written once, in ascending address order. Enabling no port clears all switches.
    */
    pub fn enable<T: Transport>(&self, bus: &mut Session<'_, T>, ports: &[&str]) -> Result<(), Error> {
        let registers = self.registers(ports)?;
        for (&switch, &register) in &registers {
            bus.write_single(switch, register, true)?;
        }
        debug!("enabled ports {:?}", ports);
        Ok(())
    }

    /// enable the given ports for the time of an exchange, they are disabled afterwards even on failure
    pub fn enabled<T: Transport, R>(
        &self,
        bus: &mut Session<'_, T>,
        ports: &[&str],
        exchange: impl FnOnce(&mut Session<'_, T>) -> Result<R, Error>,
        ) -> Result<R, Error>
    {
        self.enable(bus, ports)?;
        let result = exchange(bus);
        let disabled = self.enable(bus, &[]);
        match (result, disabled) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(error)) => Err(error),
            (Err(error), disabled) => {
                if let Err(disable) = disabled {
                    warn!("disabling ports after failed exchange: {}", disable);
                }
                Err(error)
            },
        }
    }
}


/// settings of the device tree exploration
#[derive(Clone, Debug)]
pub struct DiscoverConfig {
    /// addresses to probe
    pub range: Range<u8>,
    /// bits of the address block common to all switches
    pub mask: u8,
    /// value of these bits for switches
    pub value: u8,
    /// switch ports never to enable
    pub skip: BTreeSet<Hop>,
}
impl Default for DiscoverConfig {
    fn default() -> Self {
        Self {
            range: 0x08 .. 0x78,
            mask: 0x78,
            value: 0x70,
            skip: BTreeSet::new(),
        }
    }
}
impl DiscoverConfig {
    /// whether a device at this address is assumed to be a switch
    pub fn is_switch(&self, address: u8) -> bool {
        (address ^ self.value) & self.mask == 0
    }
}

/// devices found on a bus, by address
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tree {
    nodes: BTreeMap<u8, Node>,
}
/// device found on a bus
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Leaf,
    /// switch with the tree found behind each of its ports
    Switch(Box<[Tree; 8]>),
}
impl Tree {
    pub fn nodes(&self) -> &BTreeMap<u8, Node> {&self.nodes}
    pub fn is_empty(&self) -> bool {self.nodes.is_empty()}

    /// add a leaf at given path, creating the switches on the way
    pub fn insert(&mut self, path: &[Hop], address: u8) -> Result<(), Error> {
        for hop in path {
            hop.check()?;
        }
        self.insert_checked(path, address);
        Ok(())
    }
    fn insert_checked(&mut self, path: &[Hop], address: u8) {
        match path.split_first() {
            None => {
                self.nodes.entry(address).or_insert(Node::Leaf);
            },
            Some((hop, rest)) => {
                let node = self.nodes.entry(hop.switch)
                    .or_insert_with(|| Node::Switch(Box::default()));
                if let Node::Leaf = node {
                    *node = Node::Switch(Box::default());
                }
                if let Node::Switch(ports) = node {
                    ports[usize::from(hop.port)].insert_checked(rest, address);
                }
            },
        }
    }
    /// sub-tree behind the given path
    pub fn get(&self, path: &[Hop]) -> Option<&Tree> {
        match path.split_first() {
            None => Some(self),
            Some((hop, rest)) => match self.nodes.get(&hop.switch)? {
                Node::Switch(ports) => ports.get(usize::from(hop.port))?.get(rest),
                Node::Leaf => None,
            },
        }
    }
    /// all leaves with their path, depth first in ascending address and port order
    pub fn leaves(&self) -> Vec<(Path, u8)> {
        let mut found = Vec::new();
        self.walk(&mut Vec::new(), &mut |path, address, node| {
            if let Node::Leaf = node {
                found.push((path.to_vec(), address));
            }
        });
        found
    }
    /// all switches with their path, depth first in ascending address and port order
    pub fn switches(&self) -> Vec<(Path, u8)> {
        let mut found = Vec::new();
        self.walk(&mut Vec::new(), &mut |path, address, node| {
            if let Node::Switch(_) = node {
                found.push((path.to_vec(), address));
            }
        });
        found
    }
    fn walk(&self, path: &mut Path, visit: &mut impl FnMut(&[Hop], u8, &Node)) {
        for (&address, node) in &self.nodes {
            visit(path, address, node);
            if let Node::Switch(ports) = node {
                for (port, tree) in (0u8 ..).zip(ports.iter()) {
                    path.push(Hop::new(address, port));
                    tree.walk(path, visit);
                    path.pop();
                }
            }
        }
    }
}

/**
    explore the devices reachable from the currently enabled bus

    every address answering in the probe range and not excluded is a device, devices in the switch block are explored port by port. Devices found at a level are excluded from the levels below, since they stay visible when a port opens. All switch ports are expected to be disabled when calling this.
*/
pub fn discover<T: Transport>(bus: &mut Session<'_, T>, config: &DiscoverConfig, exclude: &BTreeSet<u8>) -> Result<Tree, Error> {
    let found: Vec<u8> = bus.scan(config.range.clone())?
        .into_iter()
        .filter(|address| ! exclude.contains(address))
        .collect();
    let mut below = exclude.clone();
    below.extend(found.iter().copied());

    let mut tree = Tree::default();
    for address in found {
        if ! config.is_switch(address) {
            info!("found device {:#04x}", address);
            tree.nodes.insert(address, Node::Leaf);
            continue
        }
        info!("found switch {:#04x}", address);
        let mut ports: Box<[Tree; 8]> = Box::default();
        for port in 0 .. 8u8 {
            if config.skip.contains(&Hop::new(address, port)) {
                debug!("skipping port {} of switch {:#04x}", port, address);
                continue
            }
            debug!("exploring port {} of switch {:#04x}", port, address);
            bus.write_single(address, 1 << port, true)?;
            let explored = discover(bus, config, &below);
            let cleared = bus.write_single(address, 0, true);
            ports[usize::from(port)] = explored?;
            cleared?;
        }
        tree.nodes.insert(address, Node::Switch(ports));
    }
    Ok(tree)
}
