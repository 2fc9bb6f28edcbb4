use crate::register_map::{Bound, CustomType, RegisterMap};

/// Holding registers are numbered from this base in the register map.
pub const HOLDING_REGISTER_BASE: u32 = 40000;

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("register {register}: bound `{token}` is not an integer")]
    MalformedBound { register: u32, token: String },
    #[error(
        "register {register}: bound refers to comm. object {comm_obj}, whose bound refers to \
         comm. object {target} in turn"
    )]
    ChainedIndirection { register: u32, comm_obj: u32, target: u32 },
}

/// A register description with its bounds resolved and its custom type attached.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ResolvedSchema {
    pub register: u32,
    pub comm_obj: u32,
    pub name: String,
    pub units: String,
    pub datatype: String,
    pub points: u16,
    pub decimals: Option<i32>,
    /// Unscaled minimum.
    pub min: Option<i64>,
    /// Unscaled maximum.
    pub max: Option<i64>,
    pub group: String,
    #[serde(skip)]
    pub custom_type: Option<CustomType>,
}

/// `value · 10^(-decimals)`, correctly rounded for non-negative `decimals`.
pub fn scale_by_decimals(value: f64, decimals: i32) -> f64 {
    if decimals >= 0 { value / 10f64.powi(decimals) } else { value * 10f64.powi(-decimals) }
}

impl ResolvedSchema {
    /// The 1-based holding register index to read this value from.
    pub fn address(&self) -> Option<u16> {
        let offset = self.register.checked_sub(HOLDING_REGISTER_BASE)?;
        u16::try_from(offset).ok().filter(|&a| a != 0)
    }

    pub fn scale(&self) -> Option<f64> {
        self.decimals.map(|d| 10f64.powi(-d))
    }

    pub fn apply_scale(&self, value: f64) -> f64 {
        self.decimals.map_or(value, |d| scale_by_decimals(value, d))
    }

    pub fn min_scaled(&self) -> Option<f64> {
        self.min.map(|m| self.apply_scale(m as f64))
    }

    pub fn max_scaled(&self) -> Option<f64> {
        self.max.map(|m| self.apply_scale(m as f64))
    }

    /// Enumerations are looked up rather than measured, so they are never range checked.
    pub fn is_list(&self) -> bool {
        self.datatype.contains("list")
    }
}

#[derive(Clone, Copy)]
enum Side {
    Min,
    Max,
}

impl Side {
    fn of(self, bounds: &(Option<Bound>, Option<Bound>)) -> &Option<Bound> {
        match self {
            Side::Min => &bounds.0,
            Side::Max => &bounds.1,
        }
    }

    fn of_mut(self, bounds: &mut (Option<Bound>, Option<Bound>)) -> &mut Option<Bound> {
        match self {
            Side::Min => &mut bounds.0,
            Side::Max => &mut bounds.1,
        }
    }
}

/// Resolve the register map into a list of schema entries, in the register map order.
///
/// Bound indirections are resolved in a single pass, in place and in order: an indirection to a
/// register listed earlier sees that register's already resolved bound, while an indirection to
/// a register listed later sees its bound as written. Should that bound be an indirection
/// itself, [`ResolveError::ChainedIndirection`] is returned. An indirection to a communication
/// object that no register has resolves to no bound at all.
pub fn resolve(map: &RegisterMap) -> Result<Vec<ResolvedSchema>, ResolveError> {
    let registers = &map.registers;
    let mut bounds = registers.iter().map(|r| (r.min.clone(), r.max.clone())).collect::<Vec<_>>();
    for index in 0..bounds.len() {
        for side in [Side::Max, Side::Min] {
            let Some(Bound::Indirect(comm_obj)) = *side.of(&bounds[index]) else {
                continue;
            };
            let replacement = registers
                .iter()
                .position(|r| r.comm_obj == comm_obj)
                .and_then(|target| side.of(&bounds[target]).clone());
            *side.of_mut(&mut bounds[index]) = match replacement {
                Some(Bound::Indirect(target)) => {
                    return Err(ResolveError::ChainedIndirection {
                        register: registers[index].register,
                        comm_obj,
                        target,
                    });
                }
                other => other,
            };
        }
    }

    let to_integer = |register: u32, bound: Option<Bound>| match bound {
        None => Ok(None),
        Some(Bound::Literal(token)) => token
            .parse()
            .map(Some)
            .map_err(|_| ResolveError::MalformedBound { register, token }),
        Some(Bound::Indirect(target)) => unreachable!("indirection to {target} left unresolved"),
    };
    registers
        .iter()
        .zip(bounds)
        .map(|(descriptor, (min, max))| {
            Ok(ResolvedSchema {
                register: descriptor.register,
                comm_obj: descriptor.comm_obj,
                name: descriptor.name.clone(),
                units: descriptor.units.clone(),
                datatype: descriptor.datatype.clone(),
                points: descriptor.points,
                decimals: descriptor.decimals,
                min: to_integer(descriptor.register, min)?,
                max: to_integer(descriptor.register, max)?,
                group: descriptor.group.clone(),
                custom_type: map.types.get(&descriptor.datatype).cloned(),
            })
        })
        .collect()
}
