use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Column boundaries (in characters) of a register table row.
///
/// ```text
///  Register(s)      Com.Obj. Name           Dim  Type       Len Dec   Min    Max Group
/// |40003            8235     BIN                 Binary#1    2   -      -      - Bin inputs CU |
///  ^                ^        ^              ^    ^          ^   ^  ^      ^      ^
///  0                17       26             41   46         57  61 64     71     78
/// ```
const REGISTER_COLUMNS: [usize; 9] = [17, 26, 41, 46, 57, 61, 64, 71, 78];
/// The register table follows two lines of column headers.
const FIRST_REGISTER_LINE: usize = 2;
/// Lines taken up by the protection table header, counted from the blank line closing the
/// register table.
const PROTECTION_LINES: usize = 10;
const EQUALS_RULE: &str = "===========";
const DASH_RULE: &str = "-----------";
const TYPE_HEADERS: [&str; 2] = ["Bit  Name", "Value  Name"];
const TYPES_END: &str = "Table# Types Meaning";
const TYPE_BODY_RULE_LEN: usize = 86;

#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    #[error("could not read the register map at {1:?}")]
    Read(#[source] std::io::Error, PathBuf),
    #[error("line {line}: register number `{field}` does not start with a number")]
    RegisterNumber { line: usize, field: String },
    #[error("line {line}: decimal places `{field}` is not an integer")]
    Decimals { line: usize, field: String },
    #[error("line {line}: custom type key `{field}` is not an integer")]
    TypeKey { line: usize, field: String },
}

/// A minimum or maximum as written in the register table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bound {
    Literal(String),
    /// `*N`: use the same-side bound of the register with communication object `N`.
    Indirect(u32),
}

impl Bound {
    fn parse(field: &str) -> Option<Self> {
        if field == "-" {
            return None;
        }
        if field.contains('*') {
            if let Ok(comm_obj) = field.replace('*', "").parse() {
                return Some(Bound::Indirect(comm_obj));
            }
        }
        Some(Bound::Literal(field.to_string()))
    }
}

impl std::fmt::Display for Bound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Bound::Literal(s) => f.write_str(s),
            Bound::Indirect(comm_obj) => f.write_fmt(format_args!("*{comm_obj}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterDescriptor {
    pub register: u32,
    pub comm_obj: u32,
    pub name: String,
    pub units: String,
    pub datatype: String,
    pub points: u16,
    pub decimals: Option<i32>,
    pub min: Option<Bound>,
    pub max: Option<Bound>,
    pub group: String,
}

impl RegisterDescriptor {
    /// Parse a single register table row.
    ///
    /// `Ok(None)` means the line does not have the shape of a register row at all, which is how
    /// the end of the register table gets detected.
    fn parse_row(line_index: usize, line: &str) -> Result<Option<Self>, ScanError> {
        let [register, comm_obj, name, units, datatype, points, decimals, min, max, group] =
            split_columns(line);
        let (Ok(comm_obj), Ok(points)) = (comm_obj.parse(), points.parse()) else {
            return Ok(None);
        };
        let digits = register.find(|c: char| !c.is_ascii_digit()).unwrap_or(register.len());
        let register = register[..digits].parse().map_err(|_| ScanError::RegisterNumber {
            line: line_index,
            field: register.to_string(),
        })?;
        let decimals = match decimals {
            "-" => None,
            d => Some(d.parse().map_err(|_| ScanError::Decimals {
                line: line_index,
                field: d.to_string(),
            })?),
        };
        Ok(Some(RegisterDescriptor {
            register,
            comm_obj,
            name: name.to_string(),
            units: if units == "-" { String::new() } else { units.to_string() },
            datatype: normalize_type_name(datatype),
            points,
            decimals,
            min: Bound::parse(min),
            max: Bound::parse(max),
            group: group.to_string(),
        }))
    }
}

/// `Binary#1` → `binary1`
pub fn normalize_type_name(name: &str) -> String {
    name.trim().replace('#', "").to_lowercase()
}

fn char_slice(line: &str, start: usize, end: usize) -> &str {
    let byte_at = |n: usize| line.char_indices().nth(n).map_or(line.len(), |(i, _)| i);
    &line[byte_at(start)..byte_at(end)]
}

fn split_columns(line: &str) -> [&str; 10] {
    let mut fields = [""; 10];
    let mut start = 0;
    let ends = REGISTER_COLUMNS.into_iter().chain([usize::MAX]);
    for (field, end) in fields.iter_mut().zip(ends) {
        *field = char_slice(line, start, end).trim();
        start = end;
    }
    fields
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Keys are bit indices, 0 being the least significant bit.
    Bits,
    /// Keys are the literal register values.
    List,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomType {
    pub name: String,
    pub values: BTreeMap<u16, String>,
}

impl CustomType {
    pub fn kind(&self) -> TypeKind {
        if self.name.contains("binary") {
            TypeKind::Bits
        } else if self.name.contains("list") {
            TypeKind::List
        } else {
            TypeKind::Other
        }
    }

    /// Width of the key column in the type's body.
    ///
    /// The "Bit" column of bit maps is narrower than the "Value" column of value lists.
    fn key_width(&self) -> usize {
        if self.kind() == TypeKind::Bits { 4 } else { 6 }
    }
}

/// All custom types of a register map, by normalized name.
#[derive(Debug, Clone, Default)]
pub struct TypeTable(BTreeMap<String, CustomType>);

impl TypeTable {
    pub fn get(&self, name: &str) -> Option<&CustomType> {
        self.0.get(name)
    }

    /// Add a custom type to the table.
    ///
    /// A type with the same name already in the table is replaced (the later definition wins)
    /// and returned.
    pub fn merge(&mut self, custom_type: CustomType) -> Option<CustomType> {
        let previous = self.0.insert(custom_type.name.clone(), custom_type);
        if let Some(previous) = &previous {
            warn!(message = "custom type defined more than once, keeping the last", name = %previous.name);
        }
        previous
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CustomType> {
        self.0.values()
    }
}

pub struct RegisterMap {
    pub registers: Vec<RegisterDescriptor>,
    pub types: TypeTable,
}

impl RegisterMap {
    pub fn load(path: &Path) -> Result<Self, ScanError> {
        let bytes = std::fs::read(path).map_err(|e| ScanError::Read(e, path.to_path_buf()))?;
        Self::from_text(&decode_export(bytes))
    }

    pub fn from_text(text: &str) -> Result<Self, ScanError> {
        scan(&text.lines().collect::<Vec<_>>())
    }
}

/// Exports are UTF-8 or a legacy 8-bit code page. The latter is mapped one byte to one char so
/// that the fixed columns stay in place.
fn decode_export(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            let at = e.utf8_error().valid_up_to();
            debug!(message = "export is not UTF-8, decoding byte by byte", at);
            e.into_bytes().into_iter().map(char::from).collect()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    RegisterTable(usize),
    SkipProtection(usize),
    SeekTypeSection(usize),
    TypeTable(usize),
    Done,
}

struct Scanner<'a, L> {
    lines: &'a [L],
    registers: Vec<RegisterDescriptor>,
    types: TypeTable,
}

impl<'a, L: AsRef<str>> Scanner<'a, L> {
    fn line(&self, index: usize) -> Option<&'a str> {
        self.lines.get(index).map(|l| l.as_ref().trim_end_matches('\r'))
    }

    fn starts_with_rule(&self, index: usize, rule: &str) -> bool {
        self.line(index).is_some_and(|l| l.starts_with(rule))
    }

    /// The custom type section is introduced by a header bracketed by two `=` rules.
    fn is_type_section_bracket(&self, index: usize) -> bool {
        self.starts_with_rule(index, EQUALS_RULE) && self.starts_with_rule(index + 2, EQUALS_RULE)
    }

    /// Returns the name line if a custom type header starts at `index`.
    ///
    /// ```text
    /// ---------------------------------
    /// List#1
    ///
    /// Value  Name
    /// ---------------------------------
    /// ```
    fn type_header_at(&self, index: usize) -> Option<&'a str> {
        let is_header = self.starts_with_rule(index, DASH_RULE)
            && self.line(index + 3).is_some_and(|l| TYPE_HEADERS.contains(&l))
            && self.starts_with_rule(index + 4, DASH_RULE);
        is_header.then(|| self.line(index + 1)).flatten()
    }

    fn is_type_body_end(line: &str) -> bool {
        line.is_empty() || (line.len() == TYPE_BODY_RULE_LEN && line.bytes().all(|b| b == b'-'))
    }

    fn step(&mut self, state: State) -> Result<State, ScanError> {
        Ok(match state {
            State::RegisterTable(index) => match self.line(index) {
                None => {
                    debug!(message = "register table runs until the end of input", line = index);
                    State::Done
                }
                Some("") => State::SkipProtection(index),
                Some(line) => match RegisterDescriptor::parse_row(index, line)? {
                    Some(register) => {
                        self.registers.push(register);
                        State::RegisterTable(index + 1)
                    }
                    None => {
                        debug!(message = "register table ends at a non-register row", line = index);
                        State::SkipProtection(index)
                    }
                },
            },
            State::SkipProtection(index) => State::SeekTypeSection(index + PROTECTION_LINES),
            State::SeekTypeSection(index) => {
                match (index..self.lines.len()).find(|&i| self.is_type_section_bracket(i)) {
                    Some(bracket) => State::TypeTable(bracket + 3),
                    None => {
                        debug!(message = "no custom type section found", from_line = index);
                        State::Done
                    }
                }
            }
            State::TypeTable(index) => {
                let mut index = index;
                loop {
                    let Some(line) = self.line(index) else {
                        debug!(message = "custom type section runs until the end of input");
                        break State::Done;
                    };
                    if line == TYPES_END {
                        break State::Done;
                    }
                    if let Some(name) = self.type_header_at(index) {
                        let (custom_type, body_end) = self.parse_type(name, index + 5)?;
                        debug!(
                            message = "parsed custom type",
                            name = %custom_type.name,
                            values = custom_type.values.len(),
                            line = index
                        );
                        self.types.merge(custom_type);
                        break State::TypeTable(body_end);
                    }
                    index += 1;
                }
            }
            State::Done => State::Done,
        })
    }

    /// Parse the body of a custom type, returning the type and the index of the line that
    /// closed the body.
    fn parse_type(&self, name: &str, start: usize) -> Result<(CustomType, usize), ScanError> {
        let mut custom_type =
            CustomType { name: normalize_type_name(name), values: BTreeMap::new() };
        let key_width = custom_type.key_width();
        let mut index = start;
        while let Some(line) = self.line(index) {
            if Self::is_type_body_end(line) {
                break;
            }
            let key = char_slice(line, 0, key_width).trim();
            let key = key
                .parse()
                .map_err(|_| ScanError::TypeKey { line: index, field: key.to_string() })?;
            let label = char_slice(line, key_width, usize::MAX).trim();
            custom_type.values.insert(key, label.to_string());
            index += 1;
        }
        Ok((custom_type, index))
    }
}

/// Scan a GenConfig register map export.
pub fn scan<L: AsRef<str>>(lines: &[L]) -> Result<RegisterMap, ScanError> {
    let mut scanner = Scanner { lines, registers: Vec::new(), types: TypeTable::default() };
    let mut state = State::RegisterTable(FIRST_REGISTER_LINE);
    while state != State::Done {
        state = scanner.step(state)?;
    }
    Ok(RegisterMap { registers: scanner.registers, types: scanner.types })
}
