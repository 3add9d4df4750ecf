// abstract flip-flop shapes and the roles library pins take on for them
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FfControl {
    None,
    /// Single asynchronous reset; `value` is the state it forces.
    Reset { polarity: bool, value: bool },
    Enable { polarity: bool },
    /// Independent asynchronous set and clear.
    SetClear {
        set_polarity: bool,
        clear_polarity: bool,
        enable: Option<bool>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FfShape {
    pub clock_polarity: bool,
    pub control: FfControl,
}

fn pol(polarity: bool) -> char {
    if polarity {
        'P'
    } else {
        'N'
    }
}

impl FfShape {
    pub fn new(clock_polarity: bool, control: FfControl) -> Self {
        FfShape {
            clock_polarity,
            control,
        }
    }

    /// The shapes that get mapped, in reporting order.
    pub fn all() -> Vec<FfShape> {
        let mut ret = Vec::new();
        for clk in [false, true] {
            ret.push(FfShape::new(clk, FfControl::None));
        }
        for clk in [false, true] {
            for polarity in [false, true] {
                for value in [false, true] {
                    ret.push(FfShape::new(clk, FfControl::Reset { polarity, value }));
                }
            }
        }
        for clk in [false, true] {
            for polarity in [false, true] {
                ret.push(FfShape::new(clk, FfControl::Enable { polarity }));
            }
        }
        for clk in [false, true] {
            for set_polarity in [false, true] {
                for clear_polarity in [false, true] {
                    ret.push(FfShape::new(
                        clk,
                        FfControl::SetClear {
                            set_polarity,
                            clear_polarity,
                            enable: None,
                        },
                    ));
                }
            }
        }
        ret
    }

    /// Parses the mapped cell types (`$_DFF_*`, `$_DFFE_*`, `$_DFFSR_*`).
    pub fn from_type_name(name: &str) -> Option<FfShape> {
        fn polarity(ch: u8) -> Option<bool> {
            match ch {
                b'P' => Some(true),
                b'N' => Some(false),
                _ => None,
            }
        }
        let (family, code) = name.strip_prefix("$_")?.strip_suffix('_')?.split_once('_')?;
        let shape = match (family, code.as_bytes()) {
            ("DFF", &[clk]) => FfShape::new(polarity(clk)?, FfControl::None),
            ("DFF", &[clk, rst, value]) => FfShape::new(
                polarity(clk)?,
                FfControl::Reset {
                    polarity: polarity(rst)?,
                    value: match value {
                        b'0' => false,
                        b'1' => true,
                        _ => return None,
                    },
                },
            ),
            ("DFFE", &[clk, en]) => FfShape::new(
                polarity(clk)?,
                FfControl::Enable {
                    polarity: polarity(en)?,
                },
            ),
            ("DFFSR", &[clk, set, clr]) => FfShape::new(
                polarity(clk)?,
                FfControl::SetClear {
                    set_polarity: polarity(set)?,
                    clear_polarity: polarity(clr)?,
                    enable: None,
                },
            ),
            _ => return None,
        };
        Some(shape)
    }

    pub fn type_name(&self) -> String {
        let clk = pol(self.clock_polarity);
        match self.control {
            FfControl::None => format!("$_DFF_{clk}_"),
            FfControl::Reset { polarity, value } => {
                format!("$_DFF_{clk}{}{}_", pol(polarity), value as u8)
            }
            FfControl::Enable { polarity } => format!("$_DFFE_{clk}{}_", pol(polarity)),
            FfControl::SetClear {
                set_polarity,
                clear_polarity,
                enable: None,
            } => format!("$_DFFSR_{clk}{}{}_", pol(set_polarity), pol(clear_polarity)),
            FfControl::SetClear {
                set_polarity,
                clear_polarity,
                enable: Some(enable_polarity),
            } => format!(
                "$_DFFSRE_{clk}{}{}{}_",
                pol(set_polarity),
                pol(clear_polarity),
                pol(enable_polarity)
            ),
        }
    }

    pub fn enable_polarity(&self) -> Option<bool> {
        match self.control {
            FfControl::Enable { polarity } => Some(polarity),
            FfControl::SetClear { enable, .. } => enable,
            _ => None,
        }
    }
}

impl fmt::Display for FfShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_name())
    }
}

/// What a pin of a library cell is connected to when it stands in for an
/// abstract flip-flop. Input roles name the abstract cell port they are fed
/// from, `inverted` asks for an inverter in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinRole {
    Clock { inverted: bool },
    Reset { inverted: bool },
    Enable { inverted: bool },
    Set { inverted: bool },
    Clear { inverted: bool },
    Data { inverted: bool },
    TrueOutput,
    ComplementOutput,
    TiedZero,
    TiedOne,
    Unconnected,
}

impl PinRole {
    /// The abstract cell port feeding an input role.
    pub fn source_port(&self) -> Option<(&'static str, bool)> {
        match *self {
            PinRole::Clock { inverted } => Some(("C", inverted)),
            PinRole::Reset { inverted } | PinRole::Clear { inverted } => Some(("R", inverted)),
            PinRole::Set { inverted } => Some(("S", inverted)),
            PinRole::Enable { inverted } => Some(("E", inverted)),
            PinRole::Data { inverted } => Some(("D", inverted)),
            _ => None,
        }
    }

    pub fn is_output(&self) -> bool {
        matches!(self, PinRole::TrueOutput | PinRole::ComplementOutput)
    }
}

impl fmt::Display for PinRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinRole::TrueOutput => f.write_str("Q"),
            PinRole::ComplementOutput => f.write_str("~Q"),
            PinRole::TiedZero => f.write_str("0"),
            PinRole::TiedOne => f.write_str("1"),
            PinRole::Unconnected => Ok(()),
            role => {
                let Some((port, inverted)) = role.source_port() else {
                    unreachable!()
                };
                if inverted {
                    f.write_str("~")?;
                }
                f.write_str(port)
            }
        }
    }
}
