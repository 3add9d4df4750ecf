// yosys json netlist; connected signals are aliased through a sigmap and
// merged into one net id on write
use crate::glob::glob;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum NetlistError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed netlist: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad selection pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Constants order before nets, so the smallest bit of a set of aliases is
/// the one to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SigBit {
    Zero,
    One,
    Undef,
    HiZ,
    Net(usize),
}

pub type SigSpec = Vec<SigBit>;

impl Serialize for SigBit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SigBit::Net(net) => serializer.serialize_u64(*net as u64),
            SigBit::Zero => serializer.serialize_str("0"),
            SigBit::One => serializer.serialize_str("1"),
            SigBit::Undef => serializer.serialize_str("x"),
            SigBit::HiZ => serializer.serialize_str("z"),
        }
    }
}

impl<'de> Deserialize<'de> for SigBit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Net(usize),
            Const(String),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Net(net) => Ok(SigBit::Net(net)),
            Repr::Const(text) => match text.as_str() {
                "0" => Ok(SigBit::Zero),
                "1" => Ok(SigBit::One),
                "x" => Ok(SigBit::Undef),
                "z" => Ok(SigBit::HiZ),
                other => Err(serde::de::Error::custom(format!("bad bit value '{other}'"))),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    Input,
    Output,
    Inout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    pub direction: PortDirection,
    pub bits: SigSpec,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cell {
    #[serde(default)]
    pub hide_name: u8,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub attributes: BTreeMap<String, JsonValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub port_directions: BTreeMap<String, PortDirection>,
    #[serde(default)]
    pub connections: BTreeMap<String, SigSpec>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl Cell {
    pub fn new(kind: &str) -> Self {
        Cell {
            kind: kind.to_owned(),
            ..Cell::default()
        }
    }

    pub fn port(&self, name: &str) -> Option<&SigSpec> {
        self.connections.get(name)
    }

    pub fn set_port(&mut self, name: &str, sig: SigSpec) {
        self.connections.insert(name.to_owned(), sig);
    }

    pub fn src(&self) -> Option<&str> {
        self.attributes.get("src").and_then(JsonValue::as_str)
    }

    pub fn set_src(&mut self, src: &str) {
        self.attributes
            .insert("src".to_owned(), JsonValue::String(src.to_owned()));
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetName {
    #[serde(default)]
    pub hide_name: u8,
    pub bits: SigSpec,
    #[serde(default)]
    pub attributes: BTreeMap<String, JsonValue>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Module {
    #[serde(default)]
    pub attributes: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub ports: BTreeMap<String, Port>,
    #[serde(default)]
    pub cells: BTreeMap<String, Cell>,
    #[serde(default)]
    pub netnames: BTreeMap<String, NetName>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
    #[serde(skip)]
    connections: Vec<(SigSpec, SigSpec)>,
    #[serde(skip)]
    next_net: usize,
    #[serde(skip)]
    next_id: usize,
}

fn truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Number(number) => number.as_u64() != Some(0),
        JsonValue::String(text) => text.contains('1'),
        JsonValue::Bool(value) => *value,
        _ => false,
    }
}

impl Module {
    pub fn new() -> Self {
        Module::default()
    }

    pub fn is_blackbox(&self) -> bool {
        self.attributes.get("blackbox").is_some_and(truthy)
    }

    fn all_bits(&self) -> impl Iterator<Item = &SigBit> {
        self.ports
            .values()
            .flat_map(|port| port.bits.iter())
            .chain(self.netnames.values().flat_map(|netname| netname.bits.iter()))
            .chain(
                self.cells
                    .values()
                    .flat_map(|cell| cell.connections.values().flatten()),
            )
            .chain(
                self.connections
                    .iter()
                    .flat_map(|(lhs, rhs)| lhs.iter().chain(rhs.iter())),
            )
    }

    fn fresh_net(&mut self) -> SigBit {
        if self.next_net == 0 {
            let max = self
                .all_bits()
                .filter_map(|bit| match bit {
                    SigBit::Net(net) => Some(*net),
                    _ => None,
                })
                .max();
            // ids 0 and 1 are avoided, as yosys does
            self.next_net = max.map_or(2, |max| (max + 1).max(2));
        }
        let net = self.next_net;
        self.next_net += 1;
        SigBit::Net(net)
    }

    fn new_id(&mut self) -> String {
        loop {
            self.next_id += 1;
            let name = format!("$auto$dfflibmap${}", self.next_id);
            if !self.cells.contains_key(&name) && !self.netnames.contains_key(&name) {
                return name;
            }
        }
    }

    pub fn add_port(&mut self, name: &str, direction: PortDirection, width: usize) -> SigSpec {
        let bits: SigSpec = (0..width).map(|_| self.fresh_net()).collect();
        self.ports.insert(
            name.to_owned(),
            Port {
                direction,
                bits: bits.clone(),
                extra: BTreeMap::new(),
            },
        );
        self.netnames.insert(
            name.to_owned(),
            NetName {
                hide_name: 0,
                bits: bits.clone(),
                attributes: BTreeMap::new(),
                extra: BTreeMap::new(),
            },
        );
        bits
    }

    pub fn add_wire(&mut self, width: usize) -> SigSpec {
        let bits: SigSpec = (0..width).map(|_| self.fresh_net()).collect();
        let name = self.new_id();
        self.netnames.insert(
            name,
            NetName {
                hide_name: 1,
                bits: bits.clone(),
                attributes: BTreeMap::new(),
                extra: BTreeMap::new(),
            },
        );
        bits
    }

    pub fn add_cell(&mut self, name: &str, kind: &str) -> &mut Cell {
        let cell = self.cells.entry(name.to_owned()).or_default();
        *cell = Cell::new(kind);
        cell
    }

    pub fn remove_cell(&mut self, name: &str) -> Option<Cell> {
        self.cells.remove(name)
    }

    /// Adds `$_NOT_` cells driving `y` from `a`, one per bit.
    pub fn add_not_gate(&mut self, a: SigSpec, y: SigSpec) {
        assert_eq!(a.len(), y.len());
        for (a_bit, y_bit) in a.into_iter().zip(y) {
            let name = self.new_id();
            let mut cell = Cell::new("$_NOT_");
            cell.hide_name = 1;
            cell.port_directions
                .insert("A".to_owned(), PortDirection::Input);
            cell.port_directions
                .insert("Y".to_owned(), PortDirection::Output);
            cell.set_port("A", vec![a_bit]);
            cell.set_port("Y", vec![y_bit]);
            self.cells.insert(name, cell);
        }
    }

    /// Returns a new signal driven by the inverse of `a`.
    pub fn not_gate(&mut self, a: SigSpec) -> SigSpec {
        let y = self.add_wire(a.len());
        self.add_not_gate(a, y.clone());
        y
    }

    /// Makes `lhs` and `rhs` the same signal.
    pub fn connect(&mut self, lhs: SigSpec, rhs: SigSpec) {
        assert_eq!(lhs.len(), rhs.len());
        self.connections.push((lhs, rhs));
    }

    pub fn sigmap(&self) -> SigMap {
        let mut sigmap = SigMap::default();
        for (lhs, rhs) in self.connections.iter() {
            for (&a, &b) in lhs.iter().zip(rhs.iter()) {
                sigmap.add(a, b);
            }
        }
        sigmap
    }

    /// Rewrites every bit to its canonical alias and forgets the connections.
    pub fn resolve_connections(&mut self) {
        if self.connections.is_empty() {
            return;
        }
        let sigmap = self.sigmap();
        for port in self.ports.values_mut() {
            sigmap.apply_mut(&mut port.bits);
        }
        for netname in self.netnames.values_mut() {
            sigmap.apply_mut(&mut netname.bits);
        }
        for cell in self.cells.values_mut() {
            for sig in cell.connections.values_mut() {
                sigmap.apply_mut(sig);
            }
        }
        self.connections.clear();
    }
}

/// Canonical identity of signals that were connected together.
#[derive(Debug, Default)]
pub struct SigMap {
    parent: HashMap<SigBit, SigBit>,
}

impl SigMap {
    fn find(&self, mut bit: SigBit) -> SigBit {
        while let Some(&parent) = self.parent.get(&bit) {
            bit = parent;
        }
        bit
    }

    fn add(&mut self, a: SigBit, b: SigBit) {
        let (a, b) = (self.find(a), self.find(b));
        if a != b {
            self.parent.insert(a.max(b), a.min(b));
        }
    }

    pub fn bit(&self, bit: SigBit) -> SigBit {
        self.find(bit)
    }

    pub fn apply(&self, sig: &[SigBit]) -> SigSpec {
        sig.iter().map(|&bit| self.find(bit)).collect()
    }

    fn apply_mut(&self, sig: &mut SigSpec) {
        for bit in sig.iter_mut() {
            *bit = self.find(*bit);
        }
    }
}

#[derive(Debug, Clone)]
struct Selector {
    module: Regex,
    cell: Option<Regex>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Design {
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub modules: BTreeMap<String, Module>,
    #[serde(skip)]
    selection: Vec<Selector>,
}

impl Design {
    pub fn new() -> Self {
        Design::default()
    }

    pub fn from_json(text: &str) -> Result<Self, NetlistError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn read_file(path: &Path) -> Result<Self, NetlistError> {
        let text = std::fs::read_to_string(path).map_err(|source| NetlistError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn to_json(&mut self) -> Result<String, NetlistError> {
        for module in self.modules.values_mut() {
            module.resolve_connections();
        }
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_file(&mut self, path: &Path) -> Result<(), NetlistError> {
        let text = self.to_json()?;
        std::fs::write(path, text).map_err(|source| NetlistError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Restricts the selection to `module` or `module/cell` patterns. No
    /// patterns select everything.
    pub fn select(&mut self, patterns: &[String]) -> Result<(), NetlistError> {
        let compile = |pattern: &str| {
            glob(pattern).map_err(|source| NetlistError::Pattern {
                pattern: pattern.to_owned(),
                source,
            })
        };
        let mut selection = Vec::new();
        for pattern in patterns {
            let selector = match pattern.split_once('/') {
                Some((module, cell)) => Selector {
                    module: compile(module)?,
                    cell: Some(compile(cell)?),
                },
                None => Selector {
                    module: compile(pattern)?,
                    cell: None,
                },
            };
            selection.push(selector);
        }
        self.selection = selection;
        Ok(())
    }

    pub fn selected_module(&self, module: &str) -> bool {
        self.selection.is_empty()
            || self
                .selection
                .iter()
                .any(|selector| selector.module.is_match(module))
    }

    pub fn selected_cell(&self, module: &str, cell: &str) -> bool {
        self.selection.is_empty()
            || self.selection.iter().any(|selector| {
                selector.module.is_match(module)
                    && selector
                        .cell
                        .as_ref()
                        .map_or(true, |re| re.is_match(cell))
            })
    }

    pub fn selected_modules(&self) -> Vec<String> {
        self.modules
            .keys()
            .filter(|name| self.selected_module(name))
            .cloned()
            .collect()
    }
}
