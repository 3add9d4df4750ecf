// replaces abstract flops with the library cells chosen for them
use crate::netlist::{Cell, Design, Module, PortDirection, SigBit, SigSpec};
use crate::shape::{FfShape, PinRole};
use crate::sm::MappingTable;
use std::collections::{BTreeMap, HashMap};

/// Number of abstract cells of a type (first) turned into a library cell
/// (second).
pub type RewriteStats = BTreeMap<(String, String), usize>;

/// Rewrites the selected abstract flops of every selected, non-blackbox
/// module. Returns stats per module.
pub fn map(design: &mut Design, table: &MappingTable) -> BTreeMap<String, RewriteStats> {
    let mut stats = BTreeMap::new();
    for module_name in design.selected_modules() {
        let module = &design.modules[&module_name];
        if module.is_blackbox() {
            continue;
        }
        let cell_names: Vec<String> = module
            .cells
            .iter()
            .filter(|(cell_name, cell)| {
                design.selected_cell(&module_name, cell_name)
                    && FfShape::from_type_name(&cell.kind)
                        .is_some_and(|shape| table.get(&shape).is_some())
            })
            .map(|(cell_name, _)| cell_name.clone())
            .collect();
        let Some(module) = design.modules.get_mut(&module_name) else {
            continue;
        };
        let module_stats = map_module(module, &cell_names, table);
        for ((from, to), count) in module_stats.iter() {
            log::info!("  mapped {count} {from} cells to {to} cells in module {module_name}.");
        }
        stats.insert(module_name, module_stats);
    }
    stats
}

fn input(module: &mut Module, old: &Cell, port: &str, inverted: bool) -> SigSpec {
    let sig = match old.port(port) {
        Some(sig) => sig.clone(),
        None => {
            log::warn!("abstract cell of type {} has no port {port}", old.kind);
            vec![SigBit::Undef]
        }
    };
    if inverted {
        module.not_gate(sig)
    } else {
        sig
    }
}

/// Rewrites the named cells of `module`. Cells whose type has no mapping in
/// `table` are left alone.
pub fn map_module(module: &mut Module, cell_names: &[String], table: &MappingTable) -> RewriteStats {
    let sigmap = module.sigmap();
    let mut notmap: HashMap<SigBit, Vec<String>> = HashMap::new();
    for (name, cell) in module.cells.iter() {
        if cell.kind != "$_NOT_" {
            continue;
        }
        if let Some([a]) = cell.port("A").map(Vec::as_slice) {
            notmap.entry(sigmap.bit(*a)).or_default().push(name.clone());
        }
    }

    let mut stats = RewriteStats::new();
    for name in cell_names {
        let Some(mapping) = module
            .cells
            .get(name)
            .and_then(|cell| FfShape::from_type_name(&cell.kind))
            .and_then(|shape| table.get(&shape))
        else {
            continue;
        };
        let Some(old) = module.remove_cell(name) else {
            continue;
        };
        let has_q = mapping.has_role(PinRole::TrueOutput);
        let has_qn = mapping.has_role(PinRole::ComplementOutput);
        let old_q = old.port("Q").cloned().unwrap_or_default();

        let new_cell = module.add_cell(name, &mapping.cell_name);
        new_cell.hide_name = old.hide_name;
        if let Some(src) = old.src() {
            new_cell.set_src(src);
        }

        for (pin, role) in mapping.ports.iter() {
            let (sig, direction) = if let Some((port, inverted)) = role.source_port() {
                (input(module, &old, port, inverted), PortDirection::Input)
            } else {
                match role {
                    PinRole::TrueOutput => (old_q.clone(), PortDirection::Output),
                    PinRole::ComplementOutput => {
                        let sig = module.add_wire(old_q.len());
                        if has_q && has_qn {
                            for (&q_bit, &qn_bit) in old_q.iter().zip(sig.iter()) {
                                let inverters = notmap.get(&sigmap.bit(q_bit));
                                for inverter in inverters.into_iter().flatten() {
                                    let Some(y) = module
                                        .cells
                                        .get(inverter)
                                        .and_then(|cell| cell.port("Y"))
                                        .cloned()
                                    else {
                                        continue;
                                    };
                                    module.connect(y, vec![qn_bit]);
                                    let fresh = module.add_wire(1);
                                    if let Some(cell) = module.cells.get_mut(inverter) {
                                        cell.set_port("Y", fresh);
                                    }
                                }
                            }
                        } else {
                            module.add_not_gate(sig.clone(), old_q.clone());
                        }
                        (sig, PortDirection::Output)
                    }
                    PinRole::TiedZero => (vec![SigBit::Zero], PortDirection::Input),
                    PinRole::TiedOne => (vec![SigBit::One], PortDirection::Input),
                    _ => (module.add_wire(1), PortDirection::Output),
                }
            };
            if let Some(cell) = module.cells.get_mut(name) {
                if *role != PinRole::Unconnected {
                    cell.port_directions.insert(pin.clone(), direction);
                }
                cell.set_port(pin, sig);
            }
        }

        *stats
            .entry((old.kind.clone(), mapping.cell_name.clone()))
            .or_default() += 1;
    }
    stats
}

#[cfg(test)]
mod test {
    use crate::netlist::{Cell, Design, Module, PortDirection, SigBit, SigSpec};
    use crate::rewrite::{map, map_module};
    use crate::shape::{FfShape, PinRole};
    use crate::sm::{CellMapping, MappingTable};

    fn table(shape: &str, cell: &str, ports: &[(&str, PinRole)]) -> MappingTable {
        let mapping = CellMapping {
            cell_name: cell.into(),
            ports: ports.iter().map(|(pin, role)| (pin.to_string(), *role)).collect(),
        };
        [(FfShape::from_type_name(shape).unwrap(), mapping)]
            .into_iter()
            .collect()
    }

    // a module with one abstract flop `ff` whose ports are wired to module
    // ports of the same name
    fn flop_module(kind: &str, ports: &[&str]) -> Module {
        let mut module = Module::new();
        let mut cell = Cell::new(kind);
        cell.set_src("top.v:7.3-9.6");
        for port in ports {
            let direction = if *port == "Q" {
                PortDirection::Output
            } else {
                PortDirection::Input
            };
            let sig = module.add_port(port, direction, 1);
            cell.set_port(port, sig);
        }
        module.cells.insert("ff".into(), cell);
        module
    }

    fn port(module: &Module, name: &str) -> SigSpec {
        module.ports[name].bits.clone()
    }

    fn inverters(module: &Module) -> Vec<&Cell> {
        module.cells.values().filter(|cell| cell.kind == "$_NOT_").collect()
    }

    #[test]
    fn test_direct_connections() {
        let mut module = flop_module("$_DFF_PN0_", &["C", "R", "D", "Q"]);
        let table = table(
            "$_DFF_PN0_",
            "DFFR_X1",
            &[
                ("CK", PinRole::Clock { inverted: false }),
                ("RN", PinRole::Reset { inverted: false }),
                ("D", PinRole::Data { inverted: false }),
                ("Q", PinRole::TrueOutput),
            ],
        );
        let stats = map_module(&mut module, &["ff".to_string()], &table);
        assert_eq!(stats[&("$_DFF_PN0_".to_string(), "DFFR_X1".to_string())], 1);

        let cell = &module.cells["ff"];
        assert_eq!(cell.kind, "DFFR_X1");
        assert_eq!(cell.src(), Some("top.v:7.3-9.6"));
        assert_eq!(cell.port("CK"), Some(&port(&module, "C")));
        assert_eq!(cell.port("RN"), Some(&port(&module, "R")));
        assert_eq!(cell.port("D"), Some(&port(&module, "D")));
        assert_eq!(cell.port("Q"), Some(&port(&module, "Q")));
        assert_eq!(cell.port_directions["Q"], PortDirection::Output);
        assert_eq!(module.cells.len(), 1);
    }

    #[test]
    fn test_inverted_inputs_and_ties() {
        let mut module = flop_module("$_DFF_N_", &["C", "D", "Q"]);
        let table = table(
            "$_DFF_N_",
            "ODD_FF",
            &[
                ("CK", PinRole::Clock { inverted: true }),
                ("D", PinRole::Data { inverted: false }),
                ("Q", PinRole::TrueOutput),
                ("SE", PinRole::TiedZero),
                ("TE", PinRole::TiedOne),
                ("SO", PinRole::Unconnected),
            ],
        );
        map_module(&mut module, &["ff".to_string()], &table);

        let cell = &module.cells["ff"];
        assert_eq!(cell.port("SE"), Some(&vec![SigBit::Zero]));
        assert_eq!(cell.port("TE"), Some(&vec![SigBit::One]));
        let so = cell.port("SO").unwrap();
        assert_eq!(so.len(), 1);
        assert!(!cell.port_directions.contains_key("SO"));
        assert_ne!(so, &port(&module, "Q"));

        let inverters = inverters(&module);
        assert_eq!(inverters.len(), 1);
        assert_eq!(inverters[0].port("A"), Some(&port(&module, "C")));
        assert_eq!(inverters[0].port("Y"), cell.port("CK"));
    }

    #[test]
    fn test_complement_output_only() {
        let mut module = flop_module("$_DFF_P_", &["C", "D", "Q"]);
        let table = table(
            "$_DFF_P_",
            "DFFN_ONLY",
            &[
                ("CK", PinRole::Clock { inverted: false }),
                ("D", PinRole::Data { inverted: true }),
                ("QN", PinRole::ComplementOutput),
            ],
        );
        map_module(&mut module, &["ff".to_string()], &table);

        let cell = &module.cells["ff"];
        let qn = cell.port("QN").unwrap().clone();
        assert_ne!(qn, port(&module, "Q"));
        let inverters = inverters(&module);
        assert_eq!(inverters.len(), 2);
        assert!(inverters.iter().any(|inv| {
            inv.port("A") == Some(&qn) && inv.port("Y") == Some(&port(&module, "Q"))
        }));
        assert!(inverters.iter().any(|inv| {
            inv.port("A") == Some(&port(&module, "D")) && inv.port("Y") == cell.port("D")
        }));
    }

    #[test]
    fn test_existing_inverter_reused() {
        let mut module = flop_module("$_DFF_P_", &["C", "D", "Q"]);
        let q = port(&module, "Q");
        let qn_out = module.add_port("QN", PortDirection::Output, 1);
        let inverter = module.add_cell("inv", "$_NOT_");
        inverter.set_port("A", q.clone());
        inverter.set_port("Y", qn_out.clone());
        let table = table(
            "$_DFF_P_",
            "DFF_X1",
            &[
                ("CK", PinRole::Clock { inverted: false }),
                ("D", PinRole::Data { inverted: false }),
                ("Q", PinRole::TrueOutput),
                ("QN", PinRole::ComplementOutput),
            ],
        );
        map_module(&mut module, &["ff".to_string()], &table);

        assert_eq!(inverters(&module).len(), 1);
        let cell = &module.cells["ff"];
        let sigmap = module.sigmap();
        assert_eq!(sigmap.apply(cell.port("QN").unwrap()), sigmap.apply(&qn_out));
        assert_ne!(module.cells["inv"].port("Y"), Some(&qn_out));

        let mut design = Design::new();
        design.modules.insert("top".into(), module);
        design.to_json().unwrap();
        let module = &design.modules["top"];
        assert_eq!(module.cells["ff"].port("QN"), Some(&module.ports["QN"].bits));
    }

    #[test]
    fn test_selection_and_blackbox() {
        let table = table(
            "$_DFF_P_",
            "DFF_X1",
            &[
                ("CK", PinRole::Clock { inverted: false }),
                ("D", PinRole::Data { inverted: false }),
                ("Q", PinRole::TrueOutput),
            ],
        );
        let mut design = Design::new();
        let mut top = flop_module("$_DFF_P_", &["C", "D", "Q"]);
        let copy = top.cells["ff"].clone();
        top.cells.insert("keep".into(), copy);
        top.cells.insert("other".into(), Cell::new("$_DFF_N_"));
        design.modules.insert("top".into(), top);
        let mut bb = flop_module("$_DFF_P_", &["C", "D", "Q"]);
        bb.attributes.insert("blackbox".into(), 1.into());
        design.modules.insert("bb".into(), bb);

        design.select(&["*/ff".to_string()]).unwrap();
        let stats = map(&mut design, &table);
        assert_eq!(stats.len(), 1);
        assert_eq!(stats["top"].values().sum::<usize>(), 1);
        let top = &design.modules["top"];
        assert_eq!(top.cells["ff"].kind, "DFF_X1");
        assert_eq!(top.cells["keep"].kind, "$_DFF_P_");
        assert_eq!(top.cells["other"].kind, "$_DFF_N_");
        assert_eq!(design.modules["bb"].cells["ff"].kind, "$_DFF_P_");
    }
}
