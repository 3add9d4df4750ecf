// sequential mapper: picks the library cell standing in for each abstract flop
use crate::classify::{
    resolve_data_and_enable, resolve_simple_pin, strip, ClassifyError, WarnOnce,
};
use crate::glob::glob;
use crate::shape::{FfControl, FfShape, PinRole};
use crate::target::{FlopBlock, Library, LibraryCell, PinDirection};
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    #[error("set/reset cell with enable is unimplemented ({0})")]
    SetClearEnable(FfShape),
    #[error("bad dont_use pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// The library cell chosen for one abstract shape, with the role of each of
/// its pins.
#[derive(Debug, Clone, PartialEq)]
pub struct CellMapping {
    pub cell_name: String,
    pub ports: BTreeMap<String, PinRole>,
}

impl CellMapping {
    pub fn has_role(&self, role: PinRole) -> bool {
        self.ports.values().any(|&r| r == role)
    }
}

#[derive(Debug, Clone)]
struct MapTarget<'a> {
    cell: &'a LibraryCell,
    ports: BTreeMap<String, PinRole>,
    pins: usize,
    noninverted: bool,
}

impl<'a> MapTarget<'a> {
    fn beats(&self, other: Option<&MapTarget>) -> bool {
        let Some(other) = other else {
            return true;
        };
        match self.pins.cmp(&other.pins) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => {
                !(other.noninverted && !self.noninverted) && self.cell.area < other.cell.area
            }
        }
    }
}

fn attribute<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, ClassifyError> {
    value.as_deref().ok_or(ClassifyError::MissingAttribute(name))
}

// Ok(None): a well-formed cell, just not of this shape
fn resolve_roles(
    cell: &LibraryCell,
    ff: &FlopBlock,
    shape: &FfShape,
) -> Result<Option<(BTreeMap<String, PinRole>, bool)>, ClassifyError> {
    let mut ports = BTreeMap::new();

    let (clk_pin, clk_pol) = resolve_simple_pin(cell, attribute(&ff.clocked_on, "clocked_on")?)?;
    if clk_pol != shape.clock_polarity {
        return Ok(None);
    }
    ports.insert(clk_pin, PinRole::Clock { inverted: false });

    let next = resolve_data_and_enable(cell, attribute(&ff.next_state, "next_state")?)?;
    if let Some(polarity) = shape.enable_polarity() {
        match next.enable {
            Some((ref enable_pin, enable_pol)) if enable_pol == polarity => {
                ports.insert(enable_pin.clone(), PinRole::Enable { inverted: false });
            }
            _ => return Ok(None),
        }
    }

    match shape.control {
        FfControl::None | FfControl::Enable { .. } => {}
        FfControl::Reset { polarity, value } => {
            let (attr, name) = if value {
                (&ff.preset, "preset")
            } else {
                (&ff.clear, "clear")
            };
            let (rst_pin, rst_pol) = resolve_simple_pin(cell, attribute(attr, name)?)?;
            if rst_pol != polarity {
                return Ok(None);
            }
            ports.insert(rst_pin, PinRole::Reset { inverted: false });
        }
        FfControl::SetClear {
            set_polarity,
            clear_polarity,
            ..
        } => {
            let mut set = resolve_simple_pin(cell, attribute(&ff.preset, "preset")?)?;
            let mut clr = resolve_simple_pin(cell, attribute(&ff.clear, "clear")?)?;
            if !next.data_noninverted {
                // the inversion is propagated to the outputs, which turns
                // the library's preset into our clear and vice versa
                std::mem::swap(&mut set, &mut clr);
            }
            if set.1 != set_polarity || clr.1 != clear_polarity {
                return Ok(None);
            }
            ports.insert(set.0, PinRole::Set { inverted: false });
            ports.insert(clr.0, PinRole::Clear { inverted: false });
        }
    }

    ports.insert(next.data, PinRole::Data { inverted: false });
    Ok(Some((ports, next.data_noninverted)))
}

fn detect_cell<'a>(cell: &'a LibraryCell, shape: &FfShape) -> Result<Option<MapTarget<'a>>, ClassifyError> {
    let Some(ff) = &cell.ff else {
        return Err(ClassifyError::NoFlop);
    };
    let Some((mut ports, data_noninverted)) = resolve_roles(cell, ff, shape)? else {
        return Ok(None);
    };

    let mut pins = 0;
    for pin in cell.pins.iter() {
        let Some(direction) = pin.direction else {
            continue;
        };
        if direction == PinDirection::Internal {
            continue;
        }
        pins += 1;

        if direction == PinDirection::Input && !ports.contains_key(&pin.name) {
            return Err(ClassifyError::UnexplainedInput(pin.name.clone()));
        }

        if let (PinDirection::Output, Some(function)) = (direction, &pin.function) {
            let value = strip(function, &[]);
            if value == ff.state {
                let role = if data_noninverted {
                    PinRole::TrueOutput
                } else {
                    PinRole::ComplementOutput
                };
                ports.insert(pin.name.clone(), role);
            } else if value == ff.state_negated {
                let role = if data_noninverted {
                    PinRole::ComplementOutput
                } else {
                    PinRole::TrueOutput
                };
                ports.insert(pin.name.clone(), role);
            }
        }

        ports.entry(pin.name.clone()).or_insert(PinRole::Unconnected);
    }

    if !ports.values().any(PinRole::is_output) {
        return Err(ClassifyError::NoStateOutput);
    }
    let noninverted = ports.values().any(|&role| role == PinRole::TrueOutput);
    Ok(Some(MapTarget {
        cell,
        ports,
        pins,
        noninverted,
    }))
}

fn find_cell<'a>(
    cells: &[&'a LibraryCell],
    shape: &FfShape,
    warned: &mut WarnOnce,
) -> Option<MapTarget<'a>> {
    let best = cells
        .iter()
        .copied()
        .filter_map(|cell| match detect_cell(cell, shape) {
            Ok(target) => target,
            Err(error) => {
                warned.skip(&cell.name, &error);
                None
            }
        })
        .fold(None, |best: Option<MapTarget<'a>>, target| {
            if target.beats(best.as_ref()) {
                Some(target)
            } else {
                best
            }
        })?;

    log::info!(
        "cell {} ({}inv, pins={}, area={:.2}) is a direct match for cell type {}.",
        best.cell.name,
        if best.noninverted { "non" } else { "" },
        best.pins,
        best.cell.area,
        shape
    );
    Some(best)
}

/// Library cell choices for a set of abstract shapes, made for one run.
#[derive(Debug, Default)]
pub struct MappingTable {
    mappings: Vec<(FfShape, CellMapping)>,
}

impl MappingTable {
    /// Selects cells for every shape in `FfShape::all()`.
    pub fn create(library: &Library, dont_use: &[String]) -> Result<Self, SelectError> {
        Self::create_for(library, dont_use, &FfShape::all())
    }

    pub fn create_for(
        library: &Library,
        dont_use: &[String],
        shapes: &[FfShape],
    ) -> Result<Self, SelectError> {
        if let Some(shape) = shapes.iter().find(|shape| {
            matches!(
                shape.control,
                FfControl::SetClear {
                    enable: Some(_),
                    ..
                }
            )
        }) {
            return Err(SelectError::SetClearEnable(*shape));
        }

        let patterns = dont_use
            .iter()
            .map(|pattern| {
                glob(pattern).map_err(|source| SelectError::Pattern {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let cells: Vec<&LibraryCell> = library
            .cells
            .iter()
            .filter(|cell| {
                !cell.dont_use
                    && !patterns.iter().any(|re| re.is_match(&cell.name))
                    && cell.ff.is_some()
            })
            .collect();

        let mut warned = WarnOnce::default();
        let mut mappings = Vec::new();
        for shape in shapes {
            if let Some(target) = find_cell(&cells, shape, &mut warned) {
                mappings.push((
                    *shape,
                    CellMapping {
                        cell_name: target.cell.name.clone(),
                        ports: target.ports,
                    },
                ));
            }
        }
        Ok(MappingTable { mappings })
    }

    pub fn get(&self, shape: &FfShape) -> Option<&CellMapping> {
        self.mappings
            .iter()
            .find(|(s, _)| s == shape)
            .map(|(_, mapping)| mapping)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FfShape, &CellMapping)> {
        self.mappings.iter().map(|(shape, mapping)| (shape, mapping))
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// One line per shape, in the notation `CELL SHAPE (.PIN(ROLE), ...);`.
    pub fn describe(&self) -> Vec<String> {
        FfShape::all()
            .iter()
            .map(|shape| match self.get(shape) {
                None => format!("unmapped dff cell: {shape}"),
                Some(mapping) => {
                    let type_name = shape.type_name();
                    let mut line = format!("{} {} (", mapping.cell_name, &type_name[1..]);
                    let mut first = true;
                    for (port, role) in mapping.ports.iter() {
                        if !first {
                            line.push_str(", ");
                        }
                        line.push_str(&format!(".{port}({role})"));
                        first = false;
                    }
                    line.push_str(");");
                    line
                }
            })
            .collect()
    }
}

impl FromIterator<(FfShape, CellMapping)> for MappingTable {
    fn from_iter<I: IntoIterator<Item = (FfShape, CellMapping)>>(iter: I) -> Self {
        MappingTable {
            mappings: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::shape::{FfControl, FfShape, PinRole};
    use crate::sm::{MappingTable, SelectError};
    use crate::target::Library;
    use std::collections::BTreeMap;

    fn library(cells: &[String]) -> Library {
        let mut library = Library::new();
        library
            .read_liberty(&format!("library(test) {{\n{}\n}}", cells.join("\n")))
            .unwrap();
        library
    }

    // pins: (name, direction, function)
    fn cell(name: &str, area: f64, ff: &str, pins: &[(&str, &str, &str)]) -> String {
        let mut text = format!("cell({name}) {{\n area : {area};\n ff(IQ, IQN) {{ {ff} }}\n");
        for (pin, direction, function) in pins {
            text.push_str(&format!(" pin({pin}) {{ direction : {direction}; "));
            if !function.is_empty() {
                text.push_str(&format!("function : \"{function}\"; "));
            }
            text.push_str("}\n");
        }
        text.push_str("}\n");
        text
    }

    fn dff(name: &str, area: f64) -> String {
        cell(
            name,
            area,
            r#"next_state : "D"; clocked_on : "CLK";"#,
            &[
                ("D", "input", ""),
                ("CLK", "input", ""),
                ("Q", "output", "IQ"),
                ("QN", "output", "IQN"),
            ],
        )
    }

    fn dff_p() -> FfShape {
        FfShape::new(true, FfControl::None)
    }

    fn ports(entries: &[(&str, PinRole)]) -> BTreeMap<String, PinRole> {
        entries.iter().map(|(pin, role)| (pin.to_string(), *role)).collect()
    }

    #[test]
    fn test_simple_dff() {
        let library = library(&[dff("DFF_X1", 4.0)]);
        let table = MappingTable::create(&library, &[]).unwrap();
        assert_eq!(table.len(), 1);
        let mapping = table.get(&dff_p()).unwrap();
        assert_eq!(mapping.cell_name, "DFF_X1");
        assert_eq!(
            mapping.ports,
            ports(&[
                ("CLK", PinRole::Clock { inverted: false }),
                ("D", PinRole::Data { inverted: false }),
                ("Q", PinRole::TrueOutput),
                ("QN", PinRole::ComplementOutput),
            ])
        );
        assert!(table.get(&FfShape::new(false, FfControl::None)).is_none());

        let lines = table.describe();
        assert_eq!(lines.len(), 22);
        assert_eq!(lines[0], "unmapped dff cell: $_DFF_N_");
        assert_eq!(lines[1], "DFF_X1 _DFF_P_ (.CLK(C), .D(D), .Q(Q), .QN(~Q));");
    }

    #[test]
    fn test_fewer_pins_win() {
        let five_pins = cell(
            "DFF_SCAN",
            1.0,
            r#"next_state : "D"; clocked_on : "CLK";"#,
            &[
                ("D", "input", ""),
                ("CLK", "input", ""),
                ("Q", "output", "IQ"),
                ("QN", "output", "IQN"),
                ("SO", "output", "IQ"),
            ],
        );
        for cells in [
            [dff("DFF_X1", 4.0), five_pins.clone()],
            [five_pins.clone(), dff("DFF_X1", 4.0)],
        ] {
            let table = MappingTable::create(&library(&cells), &[]).unwrap();
            assert_eq!(table.get(&dff_p()).unwrap().cell_name, "DFF_X1");
        }
    }

    #[test]
    fn test_smaller_area_wins() {
        for cells in [
            [dff("DFF_A", 2.0), dff("DFF_B", 1.5)],
            [dff("DFF_B", 1.5), dff("DFF_A", 2.0)],
        ] {
            let table = MappingTable::create(&library(&cells), &[]).unwrap();
            assert_eq!(table.get(&dff_p()).unwrap().cell_name, "DFF_B");
        }
        for (first, second) in [("DFF_A", "DFF_B"), ("DFF_B", "DFF_A")] {
            let cells = [dff(first, 2.0), dff(second, 2.0)];
            let table = MappingTable::create(&library(&cells), &[]).unwrap();
            assert_eq!(table.get(&dff_p()).unwrap().cell_name, first);
        }
    }

    #[test]
    fn test_noninverted_output_preferred() {
        let qn_only = cell(
            "DFF_QN",
            1.0,
            r#"next_state : "D"; clocked_on : "CLK";"#,
            &[("D", "input", ""), ("CLK", "input", ""), ("QN", "output", "IQN")],
        );
        let q_only = cell(
            "DFF_Q",
            2.0,
            r#"next_state : "D"; clocked_on : "CLK";"#,
            &[("D", "input", ""), ("CLK", "input", ""), ("Q", "output", "IQ")],
        );
        let table = MappingTable::create(&library(&[q_only.clone(), qn_only.clone()]), &[]).unwrap();
        assert_eq!(table.get(&dff_p()).unwrap().cell_name, "DFF_Q");

        // an inverted-output cell found first is kept only until a cheaper one shows up
        let table = MappingTable::create(&library(&[qn_only, q_only]), &[]).unwrap();
        let mapping = table.get(&dff_p()).unwrap();
        assert_eq!(mapping.cell_name, "DFF_QN");
        assert_eq!(mapping.ports["QN"], PinRole::ComplementOutput);
    }

    #[test]
    fn test_dont_use() {
        let flagged = dff("DFF_X1", 1.0).replace("area : 1;", "area : 1; dont_use : true;");
        let table = MappingTable::create(&library(&[flagged]), &[]).unwrap();
        assert!(table.is_empty());

        let cells = [dff("DFF_X1", 1.0), dff("DFF_X2", 2.0)];
        let table = MappingTable::create(&library(&cells), &["*_X1".to_string()]).unwrap();
        assert_eq!(table.get(&dff_p()).unwrap().cell_name, "DFF_X2");
        let table = MappingTable::create(&library(&cells), &["DFF_X?".to_string()]).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_reset_and_enable() {
        let cells = [
            dff("DFF_X1", 1.0),
            cell(
                "DFFR_X1",
                2.0,
                r#"next_state : "D"; clocked_on : "CK"; clear : "!RN";"#,
                &[
                    ("D", "input", ""),
                    ("CK", "input", ""),
                    ("RN", "input", ""),
                    ("Q", "output", "IQ"),
                ],
            ),
            cell(
                "DFFS_X1",
                2.0,
                r#"next_state : "D"; clocked_on : "CK"; preset : "SET";"#,
                &[
                    ("D", "input", ""),
                    ("CK", "input", ""),
                    ("SET", "input", ""),
                    ("Q", "output", "IQ"),
                ],
            ),
            cell(
                "EDFF_X1",
                2.0,
                r#"next_state : "(D & E) | (IQ & !E)"; clocked_on : "CK";"#,
                &[
                    ("D", "input", ""),
                    ("E", "input", ""),
                    ("CK", "input", ""),
                    ("Q", "output", "IQ"),
                ],
            ),
        ];
        let table = MappingTable::create(&library(&cells), &[]).unwrap();
        let get = |name: &str| {
            table
                .get(&FfShape::from_type_name(name).unwrap())
                .map(|mapping| mapping.cell_name.as_str())
        };
        assert_eq!(get("$_DFF_P_"), Some("DFF_X1"));
        assert_eq!(get("$_DFF_PN0_"), Some("DFFR_X1"));
        assert_eq!(get("$_DFF_PP0_"), None);
        assert_eq!(get("$_DFF_PP1_"), Some("DFFS_X1"));
        assert_eq!(get("$_DFFE_PP_"), Some("EDFF_X1"));
        assert_eq!(get("$_DFFE_PN_"), None);
        assert_eq!(table.len(), 4);

        let mapping = table.get(&FfShape::from_type_name("$_DFFE_PP_").unwrap()).unwrap();
        assert_eq!(
            mapping.ports,
            ports(&[
                ("CK", PinRole::Clock { inverted: false }),
                ("D", PinRole::Data { inverted: false }),
                ("E", PinRole::Enable { inverted: false }),
                ("Q", PinRole::TrueOutput),
            ])
        );
    }

    #[test]
    fn test_set_clear() {
        let cells = [
            cell(
                "DFFSR_X1",
                3.0,
                r#"next_state : "D"; clocked_on : "CK"; preset : "SN'"; clear : "R";"#,
                &[
                    ("D", "input", ""),
                    ("CK", "input", ""),
                    ("SN", "input", ""),
                    ("R", "input", ""),
                    ("Q", "output", "IQ"),
                ],
            ),
            cell(
                "DFFSR_INV",
                3.0,
                r#"next_state : "!D"; clocked_on : "CK"; preset : "!SN"; clear : "RN'";"#,
                &[
                    ("D", "input", ""),
                    ("CK", "input", ""),
                    ("SN", "input", ""),
                    ("RN", "input", ""),
                    ("Q", "output", "IQ"),
                    ("QN", "output", "IQN"),
                    ("X", "internal", ""),
                ],
            ),
        ];
        let table = MappingTable::create(&library(&cells), &[]).unwrap();
        let mapping = table.get(&FfShape::from_type_name("$_DFFSR_PNP_").unwrap()).unwrap();
        assert_eq!(mapping.cell_name, "DFFSR_X1");
        assert_eq!(mapping.ports["SN"], PinRole::Set { inverted: false });
        assert_eq!(mapping.ports["R"], PinRole::Clear { inverted: false });

        let mapping = table.get(&FfShape::from_type_name("$_DFFSR_PNN_").unwrap()).unwrap();
        assert_eq!(mapping.cell_name, "DFFSR_INV");
        assert_eq!(
            mapping.ports,
            ports(&[
                ("CK", PinRole::Clock { inverted: false }),
                ("D", PinRole::Data { inverted: false }),
                ("Q", PinRole::ComplementOutput),
                ("QN", PinRole::TrueOutput),
                ("RN", PinRole::Set { inverted: false }),
                ("SN", PinRole::Clear { inverted: false }),
            ])
        );
    }

    #[test]
    fn test_set_clear_enable_refused() {
        let shape = FfShape::new(
            true,
            FfControl::SetClear {
                set_polarity: true,
                clear_polarity: true,
                enable: Some(true),
            },
        );
        let result = MappingTable::create_for(&library(&[dff("DFF_X1", 1.0)]), &[], &[shape]);
        assert!(matches!(result, Err(SelectError::SetClearEnable(_))));
    }

    #[test]
    fn test_rejected_cells() {
        let cells = [
            // no output carries the state
            cell(
                "NOOUT",
                1.0,
                r#"next_state : "D"; clocked_on : "CLK";"#,
                &[("D", "input", ""), ("CLK", "input", ""), ("Y", "output", "D")],
            ),
            // unsupported clock expression
            cell(
                "GATED",
                1.0,
                r#"next_state : "D"; clocked_on : "CLK & G";"#,
                &[
                    ("D", "input", ""),
                    ("CLK", "input", ""),
                    ("G", "input", ""),
                    ("Q", "output", "IQ"),
                ],
            ),
            // malformed next state
            cell(
                "BROKEN",
                1.0,
                r#"next_state : "(D &"; clocked_on : "CLK";"#,
                &[("D", "input", ""), ("CLK", "input", ""), ("Q", "output", "IQ")],
            ),
        ];
        let table = MappingTable::create(&library(&cells), &[]).unwrap();
        assert!(table.is_empty());
    }
}
