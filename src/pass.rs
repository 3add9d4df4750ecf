// invocation of the flop mapping pass: modes, libraries and the legalize step
use crate::glob::glob;
use crate::netlist::{Design, NetlistError};
use crate::rewrite::{self, RewriteStats};
use crate::shape::FfShape;
use crate::sm::{MappingTable, SelectError};
use crate::target::{Library, LibertyError};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing --liberty option")]
    MissingLiberty,
    #[error("only one of --prepare, --map-only and --info may be given")]
    ConflictingModes,
    #[error(transparent)]
    Liberty(#[from] LibertyError),
    #[error(transparent)]
    Select(#[from] SelectError),
    #[error(transparent)]
    Netlist(#[from] NetlistError),
    #[error("bad legalize selector '{pattern}': {source}")]
    Selector {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Legalize, then rewrite.
    Full,
    /// Legalize only.
    Prepare,
    /// Rewrite only.
    MapOnly,
    /// Report the table and the legalize command, change nothing.
    Info,
}

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub liberty_files: Vec<PathBuf>,
    pub dont_use: Vec<String>,
    pub prepare: bool,
    pub map_only: bool,
    pub info: bool,
}

impl Options {
    pub fn mode(&self) -> Result<Mode, Error> {
        let mode = match (self.prepare, self.map_only, self.info) {
            (false, false, false) => Mode::Full,
            (true, false, false) => Mode::Prepare,
            (false, true, false) => Mode::MapOnly,
            (false, false, true) => Mode::Info,
            _ => return Err(Error::ConflictingModes),
        };
        if self.liberty_files.is_empty() {
            return Err(Error::MissingLiberty);
        }
        Ok(mode)
    }
}

/// Arguments for the downstream pass that brings every abstract flop into
/// one of the shapes the library can implement directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegalizeCommand {
    /// Allowed cell types, each with the initial values it may carry.
    pub cells: Vec<(String, &'static str)>,
    pub selectors: Vec<String>,
}

impl LegalizeCommand {
    pub fn new(table: &MappingTable) -> Self {
        let cells = FfShape::all()
            .into_iter()
            .filter(|shape| table.get(shape).is_some())
            .map(|shape| (shape.type_name(), "01"))
            .collect();
        LegalizeCommand {
            cells,
            selectors: vec!["t:$_DFF*".to_owned(), "t:$_SDFF*".to_owned()],
        }
    }

    pub fn allows(&self, kind: &str) -> bool {
        self.cells.iter().any(|(cell, _)| cell == kind)
    }
}

impl fmt::Display for LegalizeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dfflegalize")?;
        for (cell, init) in self.cells.iter() {
            write!(f, " -cell {cell} {init}")?;
        }
        for selector in self.selectors.iter() {
            write!(f, " {selector}")?;
        }
        Ok(())
    }
}

pub trait Legalize {
    fn legalize(&mut self, design: &mut Design, command: &LegalizeCommand) -> Result<(), Error>;
}

/// Stands in for the legalize step when none is available: leaves the design
/// as is and reports the abstract flops that stay unmapped as a result.
#[derive(Debug, Default)]
pub struct CheckLegal {
    pub leftover: usize,
}

impl Legalize for CheckLegal {
    fn legalize(&mut self, design: &mut Design, command: &LegalizeCommand) -> Result<(), Error> {
        let selectors = command
            .selectors
            .iter()
            .map(|selector| {
                let pattern = selector.strip_prefix("t:").unwrap_or(selector);
                glob(pattern).map_err(|source| Error::Selector {
                    pattern: selector.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        for module_name in design.selected_modules() {
            let module = &design.modules[&module_name];
            if module.is_blackbox() {
                continue;
            }
            for (cell_name, cell) in module.cells.iter() {
                if design.selected_cell(&module_name, cell_name)
                    && selectors.iter().any(|re| re.is_match(&cell.kind))
                    && !command.allows(&cell.kind)
                {
                    log::warn!(
                        "cell {cell_name} in module {module_name} has type {} which the library cannot implement directly",
                        cell.kind
                    );
                    self.leftover += 1;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Outcome {
    pub table: MappingTable,
    pub command: LegalizeCommand,
    pub stats: BTreeMap<String, RewriteStats>,
}

/// Validates `options`, reads the libraries and maps `design`.
pub fn run(
    design: &mut Design,
    options: &Options,
    legalize: &mut dyn Legalize,
) -> Result<Outcome, Error> {
    let mode = options.mode()?;
    let mut library = Library::new();
    for path in options.liberty_files.iter() {
        library.read_file(path)?;
    }
    execute(design, &library, mode, &options.dont_use, legalize)
}

pub fn execute(
    design: &mut Design,
    library: &Library,
    mode: Mode,
    dont_use: &[String],
    legalize: &mut dyn Legalize,
) -> Result<Outcome, Error> {
    let table = MappingTable::create(library, dont_use)?;
    log::info!("final dff cell mappings:");
    for line in table.describe() {
        log::info!("  {line}");
    }

    let command = LegalizeCommand::new(&table);
    match mode {
        Mode::Info => log::info!("dfflegalize command line: {command}"),
        Mode::Full | Mode::Prepare => legalize.legalize(design, &command)?,
        Mode::MapOnly => {}
    }

    let stats = match mode {
        Mode::Full | Mode::MapOnly => rewrite::map(design, &table),
        Mode::Prepare | Mode::Info => BTreeMap::new(),
    };
    Ok(Outcome {
        table,
        command,
        stats,
    })
}
